// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use chrono::{Duration as ChronoDuration, NaiveTime};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::modules::account::entity::Account;
use crate::modules::common::clock::Clock;
use crate::modules::error::RustBulkResult;
use crate::modules::store::{AccountPatch, Datastore};

/// Outcome of a pre-batch limit check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LimitCheck {
    pub can_send: bool,
    pub remaining_today: u32,
    pub would_exceed_by: u32,
}

/// Per-account daily-limit accounting.
///
/// Enforcement is the two-step check/apply pattern, not a hard lock:
/// a batch is checked before it runs and the account counter is bumped
/// once after its commit.
pub struct DailyLimits;

impl DailyLimits {
    /// Check whether `requested` more sends fit into today's budget,
    /// rolling the counter over first when the reset date is stale.
    pub async fn check(
        store: &dyn Datastore,
        clock: &dyn Clock,
        account_id: u64,
        requested: u32,
    ) -> RustBulkResult<LimitCheck> {
        let account = store.get_account(account_id).await?;
        let account = Self::rollover_if_stale(store, clock, account).await?;

        let remaining_today = account.remaining_today();
        let would_exceed_by =
            (account.daily_sent + requested).saturating_sub(account.daily_limit);
        Ok(LimitCheck {
            can_send: remaining_today >= requested,
            remaining_today,
            would_exceed_by,
        })
    }

    /// Record `sent` successful deliveries against the account.
    pub async fn apply(
        store: &dyn Datastore,
        account_id: u64,
        sent: u32,
    ) -> RustBulkResult<Account> {
        store
            .update_account(
                account_id,
                AccountPatch {
                    daily_sent_delta: Some(sent),
                    ..Default::default()
                },
            )
            .await
    }

    /// Reset every account whose reset date lies before today. Covers
    /// accounts that saw no traffic and therefore never hit the lazy
    /// rollover in `check`.
    pub async fn reset_stale_accounts(
        store: &dyn Datastore,
        clock: &dyn Clock,
    ) -> RustBulkResult<usize> {
        let today = clock.today();
        let mut reset = 0usize;
        for account in store.list_accounts().await? {
            if account.daily_reset_date < today {
                Self::rollover_if_stale(store, clock, account).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            info!("Daily limits reset for {reset} accounts");
        }
        Ok(reset)
    }

    async fn rollover_if_stale(
        store: &dyn Datastore,
        clock: &dyn Clock,
        account: Account,
    ) -> RustBulkResult<Account> {
        let today = clock.today();
        if account.daily_reset_date >= today {
            return Ok(account);
        }
        info!(
            account = account.name,
            carried = account.daily_sent,
            "Rolling over stale daily counter"
        );
        store
            .update_account(
                account.id,
                AccountPatch {
                    daily_sent: Some(0),
                    daily_reset_date: Some(today),
                    total_sent_all_time_delta: Some(account.daily_sent as u64),
                    ..Default::default()
                },
            )
            .await
    }
}

pub struct ResetTaskHandle {
    cancel_sender: Option<oneshot::Sender<()>>,
    join_handle: tokio::task::JoinHandle<()>,
}

impl ResetTaskHandle {
    pub async fn cancel(self) {
        if let Some(sender) = self.cancel_sender {
            let _ = sender.send(());
        }
        let _ = self.join_handle.await;
    }
}

/// Background job firing at each local midnight to sweep stale
/// daily counters.
pub struct DailyLimitResetTask;

impl DailyLimitResetTask {
    pub fn start(store: Arc<dyn Datastore>, clock: Arc<dyn Clock>) -> ResetTaskHandle {
        info!("Task 'daily-limit-reset' started");
        let (cancel_sender, mut cancel_receiver) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            loop {
                let sleep = Self::until_next_midnight();
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {
                        if let Err(e) = DailyLimits::reset_stale_accounts(store.as_ref(), clock.as_ref()).await {
                            warn!("Task 'daily-limit-reset' failed: {:?}", e);
                        }
                    }
                    _ = &mut cancel_receiver => {
                        info!("Task 'daily-limit-reset' received cancellation signal");
                        break;
                    }
                }
            }
            info!("Task 'daily-limit-reset' stopped");
        });

        ResetTaskHandle {
            cancel_sender: Some(cancel_sender),
            join_handle,
        }
    }

    fn until_next_midnight() -> std::time::Duration {
        let now = chrono::Local::now();
        let tomorrow = now.date_naive() + ChronoDuration::days(1);
        let midnight = tomorrow.and_time(NaiveTime::MIN);
        let wait = midnight - now.naive_local();
        wait.to_std().unwrap_or(std::time::Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::common::clock::ManualClock;
    use crate::modules::store::memory::MemoryStore;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn account(daily_limit: u32, daily_sent: u32, reset: NaiveDate) -> Account {
        Account {
            id: 0,
            name: "acme".into(),
            client_email: "svc@acme.test".into(),
            domain: Some("acme.test".into()),
            admin_email: Some("admin@acme.test".into()),
            encrypted_credential: "blob".into(),
            daily_limit,
            daily_sent,
            daily_reset_date: reset,
            total_sent_all_time: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn clock_on(date: NaiveDate) -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(), date)
    }

    #[tokio::test]
    async fn check_within_budget() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let id = store.insert_account(account(2000, 100, today));
        let clock = clock_on(today);

        let check = DailyLimits::check(&store, &clock, id, 500).await.unwrap();
        assert!(check.can_send);
        assert_eq!(check.remaining_today, 1900);
        assert_eq!(check.would_exceed_by, 0);
    }

    #[tokio::test]
    async fn check_over_budget_reports_excess() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let id = store.insert_account(account(10, 9, today));
        let clock = clock_on(today);

        let check = DailyLimits::check(&store, &clock, id, 5).await.unwrap();
        assert!(!check.can_send);
        assert_eq!(check.remaining_today, 1);
        assert_eq!(check.would_exceed_by, 4);
    }

    #[tokio::test]
    async fn stale_counter_rolls_over_on_check() {
        let store = MemoryStore::new();
        let yesterday = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let id = store.insert_account(account(2000, 1500, yesterday));
        let clock = clock_on(today);

        let check = DailyLimits::check(&store, &clock, id, 100).await.unwrap();
        assert!(check.can_send);
        assert_eq!(check.remaining_today, 2000);

        let account = store.get_account(id).await.unwrap();
        assert_eq!(account.daily_sent, 0);
        assert_eq!(account.daily_reset_date, today);
        assert_eq!(account.total_sent_all_time, 1500);
    }

    #[tokio::test]
    async fn sweep_resets_idle_accounts() {
        let store = MemoryStore::new();
        let yesterday = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        store.insert_account(account(2000, 40, yesterday));
        store.insert_account(account(2000, 0, today));
        let clock = clock_on(today);

        let reset = DailyLimits::reset_stale_accounts(&store, &clock)
            .await
            .unwrap();
        assert_eq!(reset, 1);
    }

    #[tokio::test]
    async fn apply_increments_daily_sent() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let id = store.insert_account(account(2000, 10, today));

        let updated = DailyLimits::apply(&store, id, 25).await.unwrap();
        assert_eq!(updated.daily_sent, 35);
    }

    #[tokio::test]
    async fn reset_task_stops_on_cancel() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let handle = DailyLimitResetTask::start(store, Arc::new(clock_on(today)));
        handle.cancel().await;
    }
}
