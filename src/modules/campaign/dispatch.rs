// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::modules::campaign::batch::BatchExecutor;
use crate::modules::campaign::entity::CampaignStatus;
use crate::modules::campaign::prepare::build_batches;
use crate::modules::context::CoreServices;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::queue::SenderBatch;
use crate::modules::sender::build_sender_pool;
use crate::modules::store::CampaignPatch;
use crate::modules::utils::request_id;
use crate::raise_error;

#[derive(Clone, Debug, Serialize)]
pub struct ResumeReport {
    pub campaign_id: u64,
    pub task_handle: String,
    pub status: CampaignStatus,
}

/// Fans pre-rendered batches out to executors. Fire-and-forget: the
/// caller gets a handle immediately and executors drive the campaign
/// to its terminal state on their own.
pub struct Dispatcher {
    services: Arc<CoreServices>,
}

impl Dispatcher {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    pub async fn resume(&self, campaign_id: u64) -> RustBulkResult<ResumeReport> {
        let request = request_id();
        let services = &self.services;
        let campaign = services.store.get_campaign(campaign_id).await?;

        if !campaign.status.resumable() {
            return Err(raise_error!(
                format!(
                    "Campaign must be READY, PAUSED, or SENDING. Current: {}",
                    campaign.status
                ),
                ErrorCode::InvalidStateTransition
            ));
        }

        info!(request, campaign_id, "Resume start");
        services
            .queue
            .append_log(campaign_id, services.clock.now(), "RESUME START")
            .await;

        let mut batches = Vec::new();
        while let Some(batch) = services.queue.pop_batch(campaign_id).await? {
            batches.push(batch);
        }

        // A drained queue is recoverable as long as the datastore still
        // owes recipients a send: rebuild the batches from email logs.
        if batches.is_empty() {
            batches = self.rebuild_from_store(campaign_id, &request).await?;
        }

        if batches.is_empty() {
            return Err(raise_error!(
                "No tasks found in queue. Campaign may not be prepared.".into(),
                ErrorCode::NotPrepared
            ));
        }

        let task_handle = format!("dispatch-{request}");
        services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    status: Some(CampaignStatus::Sending),
                    started_at: Some(services.clock.now_millis()),
                    paused_at: Some(None),
                    dispatch_handle: Some(task_handle.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let batch_count = batches.len();
        for batch in batches {
            let services = self.services.clone();
            let request = request.clone();
            tokio::spawn(async move {
                BatchExecutor::execute(services, batch, request).await;
            });
        }

        info!(request, campaign_id, batches = batch_count, "All batches dispatched");
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!("Dispatched {batch_count} sender batches"),
            )
            .await;

        Ok(ResumeReport {
            campaign_id,
            task_handle,
            status: CampaignStatus::Sending,
        })
    }

    async fn rebuild_from_store(
        &self,
        campaign_id: u64,
        request: &str,
    ) -> RustBulkResult<Vec<SenderBatch>> {
        let services = &self.services;
        let logs = services.store.list_pending_email_logs(campaign_id).await?;
        if logs.is_empty() {
            return Ok(vec![]);
        }

        let campaign = services.store.get_campaign(campaign_id).await?;
        let pool = build_sender_pool(
            services.store.as_ref(),
            services.credentials.as_ref(),
            &campaign,
        )
        .await?;
        let batches = build_batches(&campaign, &pool, &logs);

        let total_tasks: u64 = batches.iter().map(|batch| batch.tasks.len() as u64).sum();
        services
            .queue
            .init_progress(
                campaign_id,
                total_tasks,
                campaign.test_after_enabled(),
                campaign.test_after_email.as_deref(),
                campaign.test_after_count,
            )
            .await?;

        info!(
            request,
            campaign_id,
            batches = batches.len(),
            tasks = total_tasks,
            "Rebuilt task batches from the datastore"
        );
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!(
                    "Rebuilt {} batches ({total_tasks} tasks) from the datastore",
                    batches.len()
                ),
            )
            .await;
        Ok(batches)
    }
}
