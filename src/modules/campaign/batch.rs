// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::modules::account::limits::DailyLimits;
use crate::modules::campaign::entity::CampaignStatus;
use crate::modules::context::CoreServices;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{RustBulkError, RustBulkResult};
use crate::modules::queue::{RenderedTask, SenderBatch};
use crate::modules::render::{derive_display_name, process_header_tags, HeaderTagContext};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::store::{CampaignPatch, EmailLogPatch, UserPatch};
use crate::modules::transport::send::{DelegatedSender, OutgoingMessage};
use crate::raise_error;

const CANCELED_MESSAGE: &str = "Campaign canceled";

/// Per-task result collected by the executor and reduced into one
/// commit. No error ever crosses the batch boundary as a panic.
#[derive(Clone, Debug)]
struct TaskOutcome {
    email_log_id: Option<u64>,
    recipient_email: String,
    success: bool,
    message_id: Option<String>,
    error: Option<String>,
}

impl TaskOutcome {
    fn sent(task: &RenderedTask, message_id: String) -> Self {
        Self {
            email_log_id: task.email_log_id,
            recipient_email: task.recipient_email.clone(),
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    fn failed(email_log_id: Option<u64>, recipient_email: &str, error: String) -> Self {
        Self {
            email_log_id,
            recipient_email: recipient_email.to_string(),
            success: false,
            message_id: None,
            error: Some(error),
        }
    }
}

/// Drains one sender's batch through a bounded worker pool.
pub struct BatchExecutor;

impl BatchExecutor {
    /// Entry point for one batch. Never propagates an error: an
    /// executor-level failure marks the batch's unfinished tasks failed
    /// and leaves the campaign status untouched.
    pub async fn execute(services: Arc<CoreServices>, batch: SenderBatch, request: String) {
        let principal = batch.sender.principal_email.clone();
        if let Err(e) = Self::run(&services, &batch, &request).await {
            error!(
                request,
                campaign_id = batch.campaign_id,
                sender = principal,
                "Batch executor failed: {}",
                e.message()
            );
            Self::fail_unfinished(&services, &batch, e.message()).await;
        }
    }

    async fn run(
        services: &Arc<CoreServices>,
        batch: &SenderBatch,
        request: &str,
    ) -> RustBulkResult<()> {
        let campaign_id = batch.campaign_id;
        let principal = &batch.sender.principal_email;
        let tasks = &batch.tasks;

        info!(
            request,
            campaign_id,
            sender = principal.as_str(),
            tasks = tasks.len(),
            "Executing sender batch"
        );
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!("Sender {principal}: executing {} tasks", tasks.len()),
            )
            .await;

        let check = DailyLimits::check(
            services.store.as_ref(),
            services.clock.as_ref(),
            batch.sender.account_id,
            tasks.len() as u32,
        )
        .await?;
        if !check.can_send {
            let reason = format!("Daily limit exceeded: {} over limit", check.would_exceed_by);
            warn!(
                request,
                campaign_id,
                sender = principal.as_str(),
                remaining = check.remaining_today,
                "{reason}"
            );
            Self::reject_batch(services, batch, &reason).await?;
            return Ok(());
        }

        let sender = batch
            .sender
            .clone()
            .into_sender(services.credentials.as_ref())?;
        let delegated = Arc::new(DelegatedSender::new(services.transport.clone(), &sender));

        let limit = tasks
            .len()
            .min(SETTINGS.rustbulk_max_parallel_per_sender)
            .max(1);
        let poll_interval = SETTINGS.rustbulk_status_poll_interval.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(tasks.len());
        let mut metas = Vec::with_capacity(tasks.len());
        let mut submitted = 0usize;
        let mut paused = false;
        let mut canceled = false;

        for (index, task) in tasks.iter().enumerate() {
            if index % poll_interval == 0 {
                let current = services.store.get_campaign(campaign_id).await?;
                match current.status {
                    CampaignStatus::Paused => {
                        info!(request, campaign_id, sender = principal.as_str(), "Campaign paused, stopping batch");
                        services
                            .queue
                            .append_log(
                                campaign_id,
                                services.clock.now(),
                                format!("Campaign paused. Sender {principal} batch stopped."),
                            )
                            .await;
                        paused = true;
                        break;
                    }
                    CampaignStatus::Canceled => {
                        info!(request, campaign_id, sender = principal.as_str(), "Campaign canceled, stopping batch");
                        services
                            .queue
                            .append_log(
                                campaign_id,
                                services.clock.now(),
                                format!("Campaign canceled. Sender {principal} batch stopped."),
                            )
                            .await;
                        canceled = true;
                        break;
                    }
                    _ => {}
                }
            }

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                raise_error!(
                    format!("Failed to acquire semaphore: {e}"),
                    ErrorCode::InternalError
                )
            })?;
            let services = services.clone();
            let delegated = delegated.clone();
            let task = task.clone();
            metas.push((task.email_log_id, task.recipient_email.clone()));
            handles.push(tokio::spawn(async move {
                let outcome = send_task(&services, &delegated, campaign_id, &task).await;
                drop(permit);
                outcome
            }));
            submitted = index + 1;
        }

        // Await whatever was already submitted so nothing runs detached.
        let joined = futures::future::join_all(handles).await;
        let mut outcomes = Vec::with_capacity(joined.len());
        for ((email_log_id, recipient), result) in metas.into_iter().zip(joined) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(TaskOutcome::failed(
                    email_log_id,
                    &recipient,
                    format!("Task panicked or was cancelled: {e}"),
                )),
            }
        }

        if paused {
            // Unsubmitted tasks stay pending. What was already in
            // flight completed above and is committed, so a later
            // resume only owes the untouched remainder.
            if outcomes.is_empty() {
                return Ok(());
            }
            return Self::commit(services, batch, outcomes, request, true).await;
        }

        if canceled {
            Self::cancel_remaining(services, batch, &tasks[submitted..]).await?;
            return Ok(());
        }

        Self::commit(services, batch, outcomes, request, false).await
    }

    /// Single commit per batch: email-log rows, campaign counters, the
    /// terminal COMPLETED transition, sender stats and the queue-side
    /// progress mirror.
    async fn commit(
        services: &Arc<CoreServices>,
        batch: &SenderBatch,
        outcomes: Vec<TaskOutcome>,
        request: &str,
        observed_pause: bool,
    ) -> RustBulkResult<()> {
        let campaign_id = batch.campaign_id;
        let principal = &batch.sender.principal_email;

        // When the executor itself observed the pause it knows exactly
        // which tasks ran, so their outcomes are recorded. A pause or
        // cancel that raced in from outside skips the mutation instead.
        let campaign = services.store.get_campaign(campaign_id).await?;
        if campaign.status == CampaignStatus::Canceled
            || (campaign.status == CampaignStatus::Paused && !observed_pause)
        {
            info!(
                request,
                campaign_id,
                status = %campaign.status,
                "Skipping batch count updates"
            );
            return Ok(());
        }

        let now = services.clock.now_millis();
        let mut sent = 0u32;
        let mut failed = 0u32;
        let mut probes_sent = 0u32;
        let mut processed_real = 0u32;

        for outcome in &outcomes {
            let Some(log_id) = outcome.email_log_id else {
                if outcome.success {
                    probes_sent += 1;
                } else {
                    warn!(
                        request,
                        campaign_id,
                        recipient = outcome.recipient_email.as_str(),
                        "Test-after probe failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                continue;
            };
            processed_real += 1;
            if outcome.success {
                let message_id = outcome.message_id.clone().unwrap_or_default();
                services
                    .store
                    .update_email_log(log_id, EmailLogPatch::sent(message_id, now))
                    .await?;
                sent += 1;
            } else {
                let error = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown send failure".to_string());
                services
                    .store
                    .update_email_log(log_id, EmailLogPatch::failed(error, now))
                    .await?;
                failed += 1;
            }
        }

        Self::finalize_counters(services, campaign_id, sent, failed, processed_real, outcomes.len())
            .await?;

        services
            .store
            .update_user(
                batch.sender.user_id,
                UserPatch {
                    emails_sent_today_delta: Some(sent),
                    last_used: Some(now),
                },
            )
            .await?;
        if sent > 0 {
            DailyLimits::apply(services.store.as_ref(), batch.sender.account_id, sent).await?;
        }

        if probes_sent > 0 {
            info!(request, campaign_id, probes_sent, "Test-after probes delivered");
        }
        info!(
            request,
            campaign_id,
            sender = principal.as_str(),
            sent,
            failed,
            "Sender batch finished"
        );
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!("Sender {principal}: sent {sent}, failed {failed}"),
            )
            .await;
        Ok(())
    }

    /// Daily-limit pre-check rejected the whole batch: every real task
    /// fails with the over-limit message, the account counter is left
    /// untouched.
    async fn reject_batch(
        services: &Arc<CoreServices>,
        batch: &SenderBatch,
        reason: &str,
    ) -> RustBulkResult<()> {
        let campaign_id = batch.campaign_id;
        let now = services.clock.now_millis();
        let mut failed = 0u32;
        for task in &batch.tasks {
            if let Some(log_id) = task.email_log_id {
                services
                    .store
                    .update_email_log(log_id, EmailLogPatch::failed(reason.to_string(), now))
                    .await?;
                failed += 1;
            }
        }
        Self::finalize_counters(services, campaign_id, 0, failed, failed, batch.tasks.len())
            .await?;
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!(
                    "Sender {}: batch rejected - {reason}",
                    batch.sender.principal_email
                ),
            )
            .await;
        Ok(())
    }

    /// Cancel observed mid-batch: tasks that were never submitted are
    /// terminal failures; in-flight results are discarded.
    async fn cancel_remaining(
        services: &Arc<CoreServices>,
        batch: &SenderBatch,
        remaining: &[RenderedTask],
    ) -> RustBulkResult<()> {
        let campaign_id = batch.campaign_id;
        let now = services.clock.now_millis();
        let mut failed = 0u32;
        for task in remaining {
            if let Some(log_id) = task.email_log_id {
                services
                    .store
                    .update_email_log(
                        log_id,
                        EmailLogPatch::failed(CANCELED_MESSAGE.to_string(), now),
                    )
                    .await?;
                failed += 1;
            }
        }
        // Canceled is already terminal; only the counters move.
        services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    failed_delta: Some(failed),
                    pending_sub: Some(failed),
                    ..Default::default()
                },
            )
            .await?;
        services
            .queue
            .bump_progress(campaign_id, 0, failed as i64, remaining.len() as i64)
            .await?;
        Ok(())
    }

    /// Executor-level crash: whatever is still pending in this batch is
    /// failed with the crash message. The campaign status is not
    /// changed by a single batch's internal error.
    async fn fail_unfinished(services: &Arc<CoreServices>, batch: &SenderBatch, message: &str) {
        let campaign_id = batch.campaign_id;
        services
            .queue
            .append_log(
                campaign_id,
                services.clock.now(),
                format!(
                    "Sender {} failed: {message}",
                    batch.sender.principal_email
                ),
            )
            .await;

        let pending: std::collections::HashSet<u64> =
            match services.store.list_pending_email_logs(campaign_id).await {
                Ok(logs) => logs.iter().map(|log| log.id).collect(),
                Err(e) => {
                    error!(campaign_id, "Unable to load pending logs: {}", e.message());
                    return;
                }
            };

        let now = services.clock.now_millis();
        let mut failed = 0u32;
        let mut processed_all = 0usize;
        for task in &batch.tasks {
            match task.email_log_id {
                Some(log_id) if pending.contains(&log_id) => {
                    if services
                        .store
                        .update_email_log(
                            log_id,
                            EmailLogPatch::failed(message.to_string(), now),
                        )
                        .await
                        .is_ok()
                    {
                        failed += 1;
                        processed_all += 1;
                    }
                }
                Some(_) => {}
                None => processed_all += 1,
            }
        }

        if let Err(e) = Self::finalize_counters(
            services,
            campaign_id,
            0,
            failed,
            failed,
            processed_all,
        )
        .await
        {
            error!(campaign_id, "Failed to update counters: {}", e.message());
        }
    }

    async fn finalize_counters(
        services: &Arc<CoreServices>,
        campaign_id: u64,
        sent: u32,
        failed: u32,
        processed_real: u32,
        processed_all: usize,
    ) -> RustBulkResult<()> {
        let updated = services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    sent_delta: Some(sent),
                    failed_delta: Some(failed),
                    pending_sub: Some(processed_real),
                    ..Default::default()
                },
            )
            .await?;

        if updated.pending_count == 0 && !updated.status.is_terminal() {
            let now = services.clock.now_millis();
            services
                .store
                .update_campaign(
                    campaign_id,
                    CampaignPatch {
                        status: Some(CampaignStatus::Completed),
                        completed_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?;
            info!(
                campaign_id,
                sent = updated.sent_count,
                failed = updated.failed_count,
                "Campaign completed"
            );
            services
                .queue
                .append_log(
                    campaign_id,
                    services.clock.now(),
                    format!(
                        "Campaign completed: {} sent, {} failed",
                        updated.sent_count, updated.failed_count
                    ),
                )
                .await;
        }

        services
            .queue
            .bump_progress(
                campaign_id,
                sent as i64,
                failed as i64,
                processed_all as i64,
            )
            .await
    }
}

/// Send one pre-rendered task. Runs inside a worker slot; the optional
/// micro-delay is applied here so operators can smear load without
/// serializing the batch.
async fn send_task(
    services: &Arc<CoreServices>,
    delegated: &DelegatedSender,
    campaign_id: u64,
    task: &RenderedTask,
) -> TaskOutcome {
    let micro_delay = SETTINGS.rustbulk_micro_delay_ms;
    if micro_delay > 0 {
        tokio::time::sleep(Duration::from_millis(micro_delay)).await;
    }

    match delegated.is_mail_enabled().await {
        Ok(true) => {}
        Ok(false) => {
            services
                .queue
                .append_log(
                    campaign_id,
                    services.clock.now(),
                    format!("Mail disabled for {} - skipping", delegated.principal()),
                )
                .await;
            return TaskOutcome::failed(
                task.email_log_id,
                &task.recipient_email,
                "Mail service not enabled for this user".to_string(),
            );
        }
        Err(e) => {
            return TaskOutcome::failed(
                task.email_log_id,
                &task.recipient_email,
                e.message().to_string(),
            );
        }
    }

    let message = outgoing_message(task);
    let result = match &task.custom_header_text {
        Some(block) => {
            // Tag macros expand per transmission: dates and random ids
            // must be fresh for every message.
            let sender_name = task
                .from_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| derive_display_name(delegated.principal()));
            let context = HeaderTagContext {
                recipient_email: task.recipient_email.clone(),
                sender_name,
                subject: task.subject.clone(),
                smtp_username: delegated.principal().to_string(),
                domain: None,
                now: services.clock.now(),
            };
            let processed = process_header_tags(block, &context);
            delegated.send_with_custom_headers(&message, &processed).await
        }
        None => delegated.send_email(&message).await,
    };

    match result {
        Ok(message_id) => TaskOutcome::sent(task, message_id),
        Err(e) => {
            let error = describe_send_error(&e);
            services
                .queue
                .append_log(
                    campaign_id,
                    services.clock.now(),
                    format!("Send failed for {}: {error}", task.recipient_email),
                )
                .await;
            TaskOutcome::failed(task.email_log_id, &task.recipient_email, error)
        }
    }
}

fn outgoing_message(task: &RenderedTask) -> OutgoingMessage {
    OutgoingMessage {
        recipient: task.recipient_email.clone(),
        subject: task.subject.clone(),
        body_html: task.body_html.clone(),
        body_plain: task.body_plain.clone(),
        from_name: task.from_name.clone(),
        custom_headers: task.custom_headers.clone(),
        attachments: task.attachments.clone(),
    }
}

fn describe_send_error(error: &RustBulkError) -> String {
    match error.code() {
        ErrorCode::MailDisabled => "Mail service not enabled for this user".to_string(),
        _ => error.message().to_string(),
    }
}
