use ahash::AHashMap;
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::modules::campaign::entity::{CampaignStatus, EmailStatus};
use crate::modules::context::CoreServices;
use crate::modules::error::RustBulkResult;
use crate::modules::queue::progress_field;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct AccountProgress {
    pub sent: u64,
    pub failed: u64,
    pub pending: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CampaignProgress {
    pub campaign_id: u64,
    pub status: CampaignStatus,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub per_account: AHashMap<String, AccountProgress>,
}

/// Read-side of campaign execution: queue-backed counters joined with
/// the datastore's per-recipient records.
#[derive(Clone)]
pub struct ProgressReader {
    services: Arc<CoreServices>,
}

impl ProgressReader {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    /// One progress snapshot. The queue-side hash is authoritative for
    /// near-real-time counters; when it has expired the datastore
    /// counters take over.
    pub async fn snapshot(&self, campaign_id: u64) -> RustBulkResult<CampaignProgress> {
        let services = &self.services;
        let campaign = services.store.get_campaign(campaign_id).await?;
        let progress = services.queue.progress(campaign_id).await?;

        let (total, sent, failed, pending) = if progress.is_empty() {
            (
                campaign.total_recipients as i64,
                campaign.sent_count as i64,
                campaign.failed_count as i64,
                campaign.pending_count as i64,
            )
        } else {
            (
                progress_field(&progress, "total"),
                progress_field(&progress, "sent"),
                progress_field(&progress, "failed"),
                progress_field(&progress, "pending"),
            )
        };

        let logs = services.store.list_email_logs(campaign_id).await?;
        let mut per_account: AHashMap<String, AccountProgress> = AHashMap::new();
        for (account_id, logs) in logs
            .iter()
            .into_group_map_by(|log| log.service_account_id)
        {
            let name = match services.store.get_account(account_id).await {
                Ok(account) => account.name,
                Err(_) => format!("account-{account_id}"),
            };
            let mut aggregate = AccountProgress::default();
            for log in logs {
                match log.status {
                    EmailStatus::Sent => aggregate.sent += 1,
                    EmailStatus::Failed => aggregate.failed += 1,
                    _ => aggregate.pending += 1,
                }
            }
            per_account.insert(name, aggregate);
        }

        Ok(CampaignProgress {
            campaign_id,
            status: campaign.status,
            total,
            sent,
            failed,
            pending,
            started_at: campaign.started_at,
            completed_at: campaign.completed_at,
            per_account,
        })
    }

    /// Push-style progress stream: one snapshot roughly every second
    /// until the campaign reaches a terminal state, then the channel
    /// closes.
    pub fn stream(&self, campaign_id: u64) -> mpsc::Receiver<CampaignProgress> {
        let (tx, rx) = mpsc::channel(16);
        let reader = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                match reader.snapshot(campaign_id).await {
                    Ok(snapshot) => {
                        let terminal = snapshot.status.is_terminal();
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(campaign_id, "Progress stream stopped: {}", e.message());
                        break;
                    }
                }
            }
        });
        rx
    }
}
