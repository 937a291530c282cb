// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::modules::account::limits::{DailyLimitResetTask, ResetTaskHandle};
use crate::modules::campaign::control::{ControlAction, ControlOutcome, LifecycleController};
use crate::modules::campaign::dispatch::{Dispatcher, ResumeReport};
use crate::modules::campaign::prepare::{PrepareReport, Preparer};
use crate::modules::campaign::progress::{CampaignProgress, ProgressReader};
use crate::modules::context::CoreServices;
use crate::modules::error::RustBulkResult;
use crate::modules::queue::LogPage;

/// Facade over the campaign execution core. One instance per process,
/// shared by every API handler of the embedding service.
pub struct CampaignEngine {
    services: Arc<CoreServices>,
}

impl CampaignEngine {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<CoreServices> {
        &self.services
    }

    /// Resolve the sender pool, distribute recipients, pre-render every
    /// message and materialize the durable work queue.
    pub async fn prepare_campaign(&self, campaign_id: u64) -> RustBulkResult<PrepareReport> {
        Preparer::new(self.services.clone()).prepare(campaign_id).await
    }

    /// Fan all queued batches out to executors. Returns immediately;
    /// the executors drive the campaign to a terminal state.
    pub async fn resume_campaign(&self, campaign_id: u64) -> RustBulkResult<ResumeReport> {
        Dispatcher::new(self.services.clone()).resume(campaign_id).await
    }

    pub async fn control_campaign(
        &self,
        campaign_id: u64,
        action: ControlAction,
    ) -> RustBulkResult<ControlOutcome> {
        LifecycleController::new(self.services.clone())
            .control(campaign_id, action)
            .await
    }

    pub async fn campaign_progress(&self, campaign_id: u64) -> RustBulkResult<CampaignProgress> {
        ProgressReader::new(self.services.clone())
            .snapshot(campaign_id)
            .await
    }

    pub fn stream_campaign_progress(&self, campaign_id: u64) -> mpsc::Receiver<CampaignProgress> {
        ProgressReader::new(self.services.clone()).stream(campaign_id)
    }

    pub async fn tail_campaign_logs(
        &self,
        campaign_id: u64,
        offset: i64,
        limit: i64,
    ) -> RustBulkResult<LogPage> {
        self.services.queue.tail_logs(campaign_id, offset, limit).await
    }

    /// Start the local-midnight sweep that resets stale daily-limit
    /// counters for accounts that saw no traffic.
    pub fn start_daily_limit_reset(&self) -> ResetTaskHandle {
        DailyLimitResetTask::start(self.services.store.clone(), self.services.clock.clone())
    }
}
