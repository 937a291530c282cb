// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::modules::campaign::dispatch::Dispatcher;
use crate::modules::campaign::entity::CampaignStatus;
use crate::modules::context::CoreServices;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::store::CampaignPatch;
use crate::raise_error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

#[derive(Clone, Debug, Serialize)]
pub struct ControlOutcome {
    pub campaign_id: u64,
    pub status: CampaignStatus,
    /// Present when the action started a new dispatcher run
    pub task_handle: Option<String>,
}

/// Pause/resume/cancel signals. Executors observe the resulting status
/// at their poll points; nothing is forcibly terminated.
pub struct LifecycleController {
    services: Arc<CoreServices>,
}

impl LifecycleController {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    pub async fn control(
        &self,
        campaign_id: u64,
        action: ControlAction,
    ) -> RustBulkResult<ControlOutcome> {
        match action {
            ControlAction::Pause => self.pause(campaign_id).await,
            ControlAction::Resume => self.resume(campaign_id).await,
            ControlAction::Cancel => self.cancel(campaign_id).await,
        }
    }

    async fn pause(&self, campaign_id: u64) -> RustBulkResult<ControlOutcome> {
        let services = &self.services;
        let campaign = services.store.get_campaign(campaign_id).await?;
        if !campaign.status.pausable() {
            return Err(raise_error!(
                format!("Cannot pause campaign in {} status", campaign.status),
                ErrorCode::InvalidStateTransition
            ));
        }
        services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    status: Some(CampaignStatus::Paused),
                    paused_at: Some(Some(services.clock.now_millis())),
                    ..Default::default()
                },
            )
            .await?;
        info!(campaign_id, "Campaign paused");
        services
            .queue
            .append_log(campaign_id, services.clock.now(), "Campaign paused")
            .await;
        Ok(ControlOutcome {
            campaign_id,
            status: CampaignStatus::Paused,
            task_handle: None,
        })
    }

    async fn resume(&self, campaign_id: u64) -> RustBulkResult<ControlOutcome> {
        let campaign = self.services.store.get_campaign(campaign_id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Ready | CampaignStatus::Paused
        ) {
            return Err(raise_error!(
                format!("Cannot resume campaign in {} status", campaign.status),
                ErrorCode::InvalidStateTransition
            ));
        }
        let report = Dispatcher::new(self.services.clone())
            .resume(campaign_id)
            .await?;
        Ok(ControlOutcome {
            campaign_id,
            status: report.status,
            task_handle: Some(report.task_handle),
        })
    }

    async fn cancel(&self, campaign_id: u64) -> RustBulkResult<ControlOutcome> {
        let services = &self.services;
        let campaign = services.store.get_campaign(campaign_id).await?;

        // Idempotent: canceling a canceled campaign holds its state.
        if campaign.status == CampaignStatus::Canceled {
            return Ok(ControlOutcome {
                campaign_id,
                status: CampaignStatus::Canceled,
                task_handle: None,
            });
        }
        if !campaign.status.cancelable() {
            return Err(raise_error!(
                format!("Cannot cancel campaign in {} status", campaign.status),
                ErrorCode::InvalidStateTransition
            ));
        }

        services
            .store
            .update_campaign(
                campaign_id,
                CampaignPatch {
                    status: Some(CampaignStatus::Canceled),
                    completed_at: Some(services.clock.now_millis()),
                    ..Default::default()
                },
            )
            .await?;
        // A stale queue must never be drained after cancellation.
        services.queue.clear_tasks(campaign_id).await?;
        info!(campaign_id, "Campaign canceled and queue cleared");
        services
            .queue
            .append_log(campaign_id, services.clock.now(), "Campaign canceled")
            .await;
        Ok(ControlOutcome {
            campaign_id,
            status: CampaignStatus::Canceled,
            task_handle: None,
        })
    }
}
