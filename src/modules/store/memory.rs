// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::modules::account::entity::{Account, WorkspaceUser};
use crate::modules::campaign::entity::{Campaign, EmailLog, EmailStatus, NewEmailLog};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::store::{
    AccountPatch, CampaignPatch, Datastore, EmailLogPatch, UserPatch,
};
use crate::{raise_error, utc_now};

/// In-process [`Datastore`] over concurrent maps.
///
/// Reference implementation used by the test suite and by embedders
/// that have no relational database. Patch deltas are applied under
/// the per-key shard lock, which gives the same lost-update protection
/// a row-level transaction would.
#[derive(Default)]
pub struct MemoryStore {
    campaigns: DashMap<u64, Campaign>,
    accounts: DashMap<u64, Account>,
    users: DashMap<u64, WorkspaceUser>,
    email_logs: DashMap<u64, EmailLog>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_campaign(&self, mut campaign: Campaign) -> u64 {
        if campaign.id == 0 {
            campaign.id = self.allocate_id();
        }
        let id = campaign.id;
        self.campaigns.insert(id, campaign);
        id
    }

    pub fn insert_account(&self, mut account: Account) -> u64 {
        if account.id == 0 {
            account.id = self.allocate_id();
        }
        let id = account.id;
        self.accounts.insert(id, account);
        id
    }

    pub fn insert_user(&self, mut user: WorkspaceUser) -> u64 {
        if user.id == 0 {
            user.id = self.allocate_id();
        }
        let id = user.id;
        self.users.insert(id, user);
        id
    }

    pub fn email_log(&self, id: u64) -> Option<EmailLog> {
        self.email_logs.get(&id).map(|e| e.clone())
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get_campaign(&self, id: u64) -> RustBulkResult<Campaign> {
        self.campaigns
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| {
                raise_error!(
                    format!("Campaign id='{id}' not found"),
                    ErrorCode::ResourceNotFound
                )
            })
    }

    async fn update_campaign(&self, id: u64, patch: CampaignPatch) -> RustBulkResult<Campaign> {
        let mut entry = self.campaigns.get_mut(&id).ok_or_else(|| {
            raise_error!(
                format!("Campaign id='{id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })?;
        let campaign = entry.value_mut();
        if let Some(status) = patch.status {
            campaign.status = status;
        }
        if let Some(at) = patch.prepared_at {
            campaign.prepared_at = Some(at);
        }
        if let Some(at) = patch.started_at {
            campaign.started_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            campaign.completed_at = Some(at);
        }
        if let Some(paused) = patch.paused_at {
            campaign.paused_at = paused;
        }
        if let Some(handle) = patch.dispatch_handle {
            campaign.dispatch_handle = Some(handle);
        }
        if let Some(total) = patch.total_recipients {
            campaign.total_recipients = total;
        }
        if let Some(sent) = patch.sent_count {
            campaign.sent_count = sent;
        }
        if let Some(failed) = patch.failed_count {
            campaign.failed_count = failed;
        }
        if let Some(pending) = patch.pending_count {
            campaign.pending_count = pending;
        }
        if let Some(delta) = patch.sent_delta {
            campaign.sent_count += delta;
        }
        if let Some(delta) = patch.failed_delta {
            campaign.failed_count += delta;
        }
        if let Some(sub) = patch.pending_sub {
            campaign.pending_count = campaign.pending_count.saturating_sub(sub);
        }
        campaign.updated_at = utc_now!();
        Ok(campaign.clone())
    }

    async fn get_accounts_for_campaign(&self, campaign_id: u64) -> RustBulkResult<Vec<Account>> {
        let campaign = self.get_campaign(campaign_id).await?;
        let mut accounts = Vec::new();
        for account_id in &campaign.sender_account_ids {
            if let Some(account) = self.accounts.get(account_id) {
                accounts.push(account.clone());
            }
        }
        Ok(accounts)
    }

    async fn get_account(&self, id: u64) -> RustBulkResult<Account> {
        self.accounts.get(&id).map(|a| a.clone()).ok_or_else(|| {
            raise_error!(
                format!("Account id='{id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    async fn update_account(&self, id: u64, patch: AccountPatch) -> RustBulkResult<Account> {
        let mut entry = self.accounts.get_mut(&id).ok_or_else(|| {
            raise_error!(
                format!("Account id='{id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })?;
        let account = entry.value_mut();
        if let Some(daily_sent) = patch.daily_sent {
            account.daily_sent = daily_sent;
        }
        if let Some(delta) = patch.daily_sent_delta {
            account.daily_sent += delta;
        }
        if let Some(date) = patch.daily_reset_date {
            account.daily_reset_date = date;
        }
        if let Some(delta) = patch.total_sent_all_time_delta {
            account.total_sent_all_time += delta;
        }
        account.updated_at = utc_now!();
        Ok(account.clone())
    }

    async fn list_accounts(&self) -> RustBulkResult<Vec<Account>> {
        Ok(self.accounts.iter().map(|a| a.clone()).collect())
    }

    async fn get_active_users_for_account(
        &self,
        account_id: u64,
    ) -> RustBulkResult<Vec<WorkspaceUser>> {
        let mut users: Vec<WorkspaceUser> = self
            .users
            .iter()
            .filter(|u| u.account_id == account_id && u.is_active)
            .map(|u| u.clone())
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn update_user(&self, id: u64, patch: UserPatch) -> RustBulkResult<()> {
        let mut entry = self.users.get_mut(&id).ok_or_else(|| {
            raise_error!(
                format!("User id='{id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })?;
        let user = entry.value_mut();
        if let Some(delta) = patch.emails_sent_today_delta {
            user.emails_sent_today += delta;
        }
        if let Some(last_used) = patch.last_used {
            user.last_used = Some(last_used);
        }
        Ok(())
    }

    async fn count_email_logs(&self, campaign_id: u64) -> RustBulkResult<u64> {
        Ok(self
            .email_logs
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .count() as u64)
    }

    async fn bulk_insert_email_logs(&self, rows: Vec<NewEmailLog>) -> RustBulkResult<()> {
        let created_at = utc_now!();
        for row in rows {
            let id = self.allocate_id();
            self.email_logs.insert(
                id,
                EmailLog {
                    id,
                    campaign_id: row.campaign_id,
                    recipient_email: row.recipient_email,
                    recipient_name: row.recipient_name,
                    sender_email: row.sender_email,
                    service_account_id: row.service_account_id,
                    subject: row.subject,
                    message_id: None,
                    status: EmailStatus::Pending,
                    error_message: None,
                    retry_count: 0,
                    created_at,
                    sent_at: None,
                    failed_at: None,
                },
            );
        }
        Ok(())
    }

    async fn list_pending_email_logs(&self, campaign_id: u64) -> RustBulkResult<Vec<EmailLog>> {
        let mut logs: Vec<EmailLog> = self
            .email_logs
            .iter()
            .filter(|e| e.campaign_id == campaign_id && e.needs_send())
            .map(|e| e.clone())
            .collect();
        logs.sort_by_key(|e| e.id);
        Ok(logs)
    }

    async fn list_email_logs(&self, campaign_id: u64) -> RustBulkResult<Vec<EmailLog>> {
        let mut logs: Vec<EmailLog> = self
            .email_logs
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .map(|e| e.clone())
            .collect();
        logs.sort_by_key(|e| e.id);
        Ok(logs)
    }

    async fn update_email_log(&self, id: u64, patch: EmailLogPatch) -> RustBulkResult<()> {
        let mut entry = self.email_logs.get_mut(&id).ok_or_else(|| {
            raise_error!(
                format!("EmailLog id='{id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })?;
        let log = entry.value_mut();
        if let Some(status) = patch.status {
            log.status = status;
        }
        if let Some(message_id) = patch.message_id {
            log.message_id = Some(message_id);
        }
        if let Some(error) = patch.error_message {
            log.error_message = Some(error);
        }
        if let Some(delta) = patch.retry_count_delta {
            log.retry_count += delta;
        }
        if let Some(at) = patch.sent_at {
            log.sent_at = Some(at);
        }
        if let Some(at) = patch.failed_at {
            log.failed_at = Some(at);
        }
        Ok(())
    }
}
