// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::modules::account::entity::{Account, WorkspaceUser};
use crate::modules::campaign::entity::{
    Campaign, CampaignStatus, EmailLog, EmailStatus, NewEmailLog,
};
use crate::modules::error::RustBulkResult;

pub mod memory;

/// Field-wise update of a campaign row. Absolute fields overwrite;
/// `*_delta` fields are applied atomically inside the store so that
/// concurrent batch commits never lose increments.
#[derive(Clone, Debug, Default)]
pub struct CampaignPatch {
    pub status: Option<CampaignStatus>,
    pub prepared_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// `Some(None)` clears the pause marker on resume
    pub paused_at: Option<Option<i64>>,
    pub dispatch_handle: Option<String>,
    pub total_recipients: Option<u32>,
    pub sent_count: Option<u32>,
    pub failed_count: Option<u32>,
    pub pending_count: Option<u32>,
    pub sent_delta: Option<u32>,
    pub failed_delta: Option<u32>,
    /// Subtracted from `pending_count`, clamped at zero
    pub pending_sub: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct AccountPatch {
    pub daily_sent: Option<u32>,
    pub daily_sent_delta: Option<u32>,
    pub daily_reset_date: Option<NaiveDate>,
    pub total_sent_all_time_delta: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub emails_sent_today_delta: Option<u32>,
    pub last_used: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct EmailLogPatch {
    pub status: Option<EmailStatus>,
    pub message_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count_delta: Option<u32>,
    pub sent_at: Option<i64>,
    pub failed_at: Option<i64>,
}

impl EmailLogPatch {
    pub fn sent(message_id: String, at: i64) -> Self {
        Self {
            status: Some(EmailStatus::Sent),
            message_id: Some(message_id),
            sent_at: Some(at),
            ..Default::default()
        }
    }

    pub fn failed(error: String, at: i64) -> Self {
        Self {
            status: Some(EmailStatus::Failed),
            error_message: Some(error),
            failed_at: Some(at),
            ..Default::default()
        }
    }
}

/// Relational collaborator consumed by the execution core.
///
/// Semantics expected of implementations: read-committed reads,
/// single-row writes, and atomic application of the delta fields in
/// each patch. The engine batches its mutations so one batch executor
/// performs one commit.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get_campaign(&self, id: u64) -> RustBulkResult<Campaign>;

    async fn update_campaign(&self, id: u64, patch: CampaignPatch) -> RustBulkResult<Campaign>;

    async fn get_accounts_for_campaign(&self, campaign_id: u64) -> RustBulkResult<Vec<Account>>;

    async fn get_account(&self, id: u64) -> RustBulkResult<Account>;

    async fn update_account(&self, id: u64, patch: AccountPatch) -> RustBulkResult<Account>;

    async fn list_accounts(&self) -> RustBulkResult<Vec<Account>>;

    async fn get_active_users_for_account(
        &self,
        account_id: u64,
    ) -> RustBulkResult<Vec<WorkspaceUser>>;

    async fn update_user(&self, id: u64, patch: UserPatch) -> RustBulkResult<()>;

    async fn count_email_logs(&self, campaign_id: u64) -> RustBulkResult<u64>;

    async fn bulk_insert_email_logs(&self, rows: Vec<NewEmailLog>) -> RustBulkResult<()>;

    /// Rows still owed a delivery attempt: pending, failed, or retry.
    async fn list_pending_email_logs(&self, campaign_id: u64) -> RustBulkResult<Vec<EmailLog>>;

    async fn list_email_logs(&self, campaign_id: u64) -> RustBulkResult<Vec<EmailLog>>;

    async fn update_email_log(&self, id: u64, patch: EmailLogPatch) -> RustBulkResult<()>;
}
