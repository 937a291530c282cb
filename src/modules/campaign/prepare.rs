// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::modules::campaign::entity::{
    Campaign, CampaignStatus, EmailLog, EmailStatus, NewEmailLog,
};
use crate::modules::campaign::planner::{expected_probes, probe_task, sender_assignments};
use crate::modules::context::CoreServices;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{RustBulkError, RustBulkResult};
use crate::modules::queue::{RenderedTask, SenderBatch};
use crate::modules::render::{coerce_to_string, substitute_variables};
use crate::modules::sender::{build_sender_pool, Sender};
use crate::modules::store::CampaignPatch;
use crate::modules::utils::request_id;
use crate::raise_error;

#[derive(Clone, Debug, Serialize)]
pub struct PrepareReport {
    pub campaign_id: u64,
    pub status: CampaignStatus,
    pub total_tasks: u64,
    pub sender_count: usize,
    pub elapsed_ms: u128,
}

/// Materializes a campaign's durable work queue: sender pool, recipient
/// distribution, pre-rendered tasks, progress hash.
pub struct Preparer {
    services: Arc<CoreServices>,
}

impl Preparer {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    pub async fn prepare(&self, campaign_id: u64) -> RustBulkResult<PrepareReport> {
        let request = request_id();
        let services = &self.services;
        let campaign = services.store.get_campaign(campaign_id).await?;

        if !campaign.status.preparable() {
            return Err(raise_error!(
                format!(
                    "Can only prepare draft or failed campaigns. Current: {}",
                    campaign.status
                ),
                ErrorCode::InvalidStateTransition
            ));
        }

        // Input validation happens before the PREPARING transition so a
        // rejected draft stays a draft.
        validate_inputs(&campaign)?;

        info!(request, campaign_id, "Prepare start");
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!("PREPARE START - campaign {campaign_id}"),
            )
            .await;

        services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    status: Some(CampaignStatus::Preparing),
                    prepared_at: Some(services.clock.now_millis()),
                    ..Default::default()
                },
            )
            .await?;

        match self.run(&campaign, &request).await {
            Ok(report) => Ok(report),
            Err(error) => {
                warn!(request, campaign_id, "Prepare failed: {}", error.message());
                services
                    .store
                    .update_campaign(
                        campaign_id,
                        CampaignPatch {
                            status: Some(CampaignStatus::Failed),
                            ..Default::default()
                        },
                    )
                    .await
                    .ok();
                services
                    .queue
                    .append_log(
                        campaign_id,
                        services.clock.now(),
                        format!("PREPARE FAILED: {}", error.message()),
                    )
                    .await;
                Err(error)
            }
        }
    }

    async fn run(&self, campaign: &Campaign, request: &str) -> RustBulkResult<PrepareReport> {
        let started = Instant::now();
        let services = &self.services;
        let campaign_id = campaign.id;

        let pool = build_sender_pool(
            services.store.as_ref(),
            services.credentials.as_ref(),
            campaign,
        )
        .await?;

        if services.store.count_email_logs(campaign_id).await? == 0 {
            self.create_email_logs(campaign, &pool).await?;
        }

        let logs = services.store.list_pending_email_logs(campaign_id).await?;
        let batches = build_batches(campaign, &pool, &logs);

        services.queue.clear_tasks(campaign_id).await?;
        let mut total_tasks = 0u64;
        for batch in &batches {
            total_tasks += batch.tasks.len() as u64;
            services.queue.push_batch(batch).await?;
        }

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

        // The DB pending counter tracks real recipients only; probes
        // live exclusively in the queue-side progress hash.
        let all_logs = services.store.list_email_logs(campaign_id).await?;
        let sent_count = all_logs
            .iter()
            .filter(|log| log.status == EmailStatus::Sent)
            .count() as u32;
        let pending_count = logs.len() as u32;
        let failed_count = (campaign.recipients.len() as u32)
            .saturating_sub(sent_count)
            .saturating_sub(pending_count);

        services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    status: Some(CampaignStatus::Ready),
                    total_recipients: Some(campaign.recipients.len() as u32),
                    sent_count: Some(sent_count),
                    failed_count: Some(failed_count),
                    pending_count: Some(pending_count),
                    ..Default::default()
                },
            )
            .await?;

        let elapsed_ms = started.elapsed().as_millis();
        info!(
            request,
            campaign_id,
            batches = batches.len(),
            tasks = total_tasks,
            elapsed_ms,
            "Prepare complete, campaign READY"
        );
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!(
                    "Prepared {total_tasks} tasks in {} batches",
                    batches.len()
                ),
            )
            .await;
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                "PREPARE COMPLETE - status READY",
            )
            .await;

        Ok(PrepareReport {
            campaign_id,
            status: CampaignStatus::Ready,
            total_tasks,
            sender_count: batches.len(),
            elapsed_ms,
        })
    }

    /// First prepare of a campaign: one pending row per recipient,
    /// senders assigned by the contiguous equal-distribution rule.
    async fn create_email_logs(
        &self,
        campaign: &Campaign,
        pool: &[Sender],
    ) -> RustBulkResult<()> {
        let assignments = sender_assignments(campaign.recipients.len(), pool.len());
        let rows: Vec<NewEmailLog> = campaign
            .recipients
            .iter()
            .zip(assignments)
            .map(|(recipient, sender_index)| {
                let sender = &pool[sender_index];
                NewEmailLog {
                    campaign_id: campaign.id,
                    recipient_email: recipient.email.clone(),
                    recipient_name: recipient.variables.get("name").cloned(),
                    sender_email: sender.principal_email.clone(),
                    service_account_id: sender.account_id,
                    subject: campaign.subject.clone(),
                }
            })
            .collect();
        info!(
            campaign_id = campaign.id,
            rows = rows.len(),
            senders = pool.len(),
            "Creating email logs with equal distribution"
        );
        self.services.store.bulk_insert_email_logs(rows).await
    }
}

fn validate_inputs(campaign: &Campaign) -> RustBulkResult<()> {
    let invalid = |message: String| -> RustBulkError {
        raise_error!(message, ErrorCode::ValidationError)
    };

    if campaign.recipients.is_empty() {
        return Err(invalid("No recipients provided".into()));
    }
    if campaign.is_full_custom() {
        let has_header = campaign
            .custom_header
            .as_deref()
            .is_some_and(|header| !header.trim().is_empty());
        if !has_header {
            return Err(invalid(
                "Full-custom header mode requires custom_header to be provided".into(),
            ));
        }
    } else {
        if campaign.subject.trim().is_empty() {
            return Err(invalid(
                "Subject is required when not using a full-custom header".into(),
            ));
        }
        let has_from = campaign
            .from_name
            .as_deref()
            .is_some_and(|from| !from.trim().is_empty());
        if !has_from {
            return Err(invalid(
                "From name is required when not using a full-custom header".into(),
            ));
        }
    }
    Ok(())
}

/// Pre-render every outstanding email log and group the results into
/// one batch per sender, interleaving test-after probes on a
/// campaign-global counter. Also used by the dispatcher to rebuild a
/// drained queue from the datastore.
pub(crate) fn build_batches(
    campaign: &Campaign,
    pool: &[Sender],
    logs: &[EmailLog],
) -> Vec<SenderBatch> {
    let recipients_by_email: AHashMap<&str, &crate::modules::campaign::entity::Recipient> =
        campaign
            .recipients
            .iter()
            .map(|recipient| (recipient.email.as_str(), recipient))
            .collect();

    let html_template = campaign
        .body_html
        .as_ref()
        .map(coerce_to_string)
        .unwrap_or_default();
    let plain_template = campaign
        .body_plain
        .as_ref()
        .map(coerce_to_string)
        .unwrap_or_default();

    let mut batch_index: AHashMap<String, usize> = AHashMap::new();
    let mut batches: Vec<(Sender, Vec<RenderedTask>)> = Vec::new();
    let mut task_counter: u32 = 0;

    for log in logs {
        let sender = pool
            .iter()
            .find(|sender| sender.principal_email == log.sender_email)
            .unwrap_or_else(|| {
                warn!(
                    sender = log.sender_email,
                    "No pool entry for assigned sender, using first available"
                );
                &pool[0]
            });

        let index = *batch_index
            .entry(sender.principal_email.clone())
            .or_insert_with(|| {
                batches.push((sender.clone(), Vec::new()));
                batches.len() - 1
            });

        let empty_variables = AHashMap::new();
        let variables = recipients_by_email
            .get(log.recipient_email.as_str())
            .map(|recipient| &recipient.variables)
            .unwrap_or(&empty_variables);

        let subject = substitute_variables(&campaign.subject, variables);
        let body_html = substitute_variables(&html_template, variables);
        let body_plain = substitute_variables(&plain_template, variables);

        let custom_header_text = if campaign.is_full_custom() {
            campaign.custom_header.clone()
        } else {
            None
        };

        batches[index].1.push(RenderedTask {
            email_log_id: Some(log.id),
            recipient_email: log.recipient_email.clone(),
            subject: subject.clone(),
            body_html: body_html.clone(),
            body_plain: body_plain.clone(),
            from_name: campaign.from_name.clone(),
            custom_headers: campaign.custom_headers.clone(),
            attachments: campaign.attachments.clone(),
            custom_header_text,
        });
        task_counter += 1;

        if campaign.test_after_enabled() && task_counter % campaign.test_after_count == 0 {
            batches[index].1.push(probe_task(
                campaign,
                task_counter,
                &subject,
                &body_html,
                &body_plain,
            ));
        }
    }

    debug_assert_eq!(
        expected_probes(
            logs.len() as u64,
            if campaign.test_after_enabled() {
                campaign.test_after_count
            } else {
                0
            }
        ),
        batches
            .iter()
            .flat_map(|(_, tasks)| tasks.iter())
            .filter(|task| task.is_probe())
            .count() as u64
    );

    batches
        .into_iter()
        .map(|(sender, tasks)| SenderBatch::new(campaign.id, sender.queued(), tasks))
        .collect()
}
