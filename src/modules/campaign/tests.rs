// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::modules::account::entity::{Account, WorkspaceUser};
use crate::modules::campaign::control::ControlAction;
use crate::modules::campaign::engine::CampaignEngine;
use crate::modules::campaign::entity::{
    Campaign, CampaignStatus, EmailStatus, HeaderType, Recipient,
};
use crate::modules::common::clock::{Clock, ManualClock};
use crate::modules::context::{AesCredentialStore, CoreServices, CredentialStore};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::queue::memory::MemoryQueueBackend;
use crate::modules::queue::{CampaignQueue, SenderBatch};
use crate::modules::store::memory::MemoryStore;
use crate::modules::store::{CampaignPatch, Datastore};
use crate::modules::transport::MailTransport;
use crate::raise_error;

#[derive(Clone, Debug)]
struct SentMail {
    principal: String,
    recipient: String,
    raw: String,
}

struct StatusTrigger {
    after_sends: u64,
    campaign_id: u64,
    status: CampaignStatus,
}

/// Scripted wire client: records every accepted message, fails scripted
/// recipients, reports scripted principals as mail-disabled and can
/// flip a campaign's status after N successful sends to drive the
/// pause/cancel observation paths deterministically.
struct MockTransport {
    store: Arc<MemoryStore>,
    sent: Mutex<Vec<SentMail>>,
    counter: AtomicU64,
    fail_recipients: Mutex<HashSet<String>>,
    disabled_principals: Mutex<HashSet<String>>,
    trigger: Mutex<Option<StatusTrigger>>,
}

impl MockTransport {
    fn new(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            sent: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            fail_recipients: Mutex::new(HashSet::new()),
            disabled_principals: Mutex::new(HashSet::new()),
            trigger: Mutex::new(None),
        })
    }

    fn fail_recipient(&self, recipient: &str) {
        self.fail_recipients.lock().unwrap().insert(recipient.to_string());
    }

    fn disable_principal(&self, principal: &str) {
        self.disabled_principals.lock().unwrap().insert(principal.to_string());
    }

    fn set_status_after_sends(&self, after_sends: u64, campaign_id: u64, status: CampaignStatus) {
        *self.trigger.lock().unwrap() = Some(StatusTrigger {
            after_sends,
            campaign_id,
            status,
        });
    }

    fn sent_mails(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send_raw(
        &self,
        _credential: &str,
        principal: &str,
        recipient: &str,
        raw_message: Vec<u8>,
    ) -> RustBulkResult<String> {
        if self.fail_recipients.lock().unwrap().contains(recipient) {
            return Err(raise_error!(
                format!("Remote rejected mail to {recipient}: 550 mailbox unavailable"),
                ErrorCode::TransportError
            ));
        }
        self.sent.lock().unwrap().push(SentMail {
            principal: principal.to_string(),
            recipient: recipient.to_string(),
            raw: String::from_utf8_lossy(&raw_message).to_string(),
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        let fire = {
            let trigger = self.trigger.lock().unwrap();
            trigger.as_ref().and_then(|t| {
                (t.after_sends == n).then_some((t.campaign_id, t.status))
            })
        };
        if let Some((campaign_id, status)) = fire {
            let paused_at = (status == CampaignStatus::Paused).then_some(Some(1_i64));
            self.store
                .update_campaign(
                    campaign_id,
                    CampaignPatch {
                        status: Some(status),
                        paused_at,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        Ok(format!("msg-{n}"))
    }

    async fn is_mail_enabled(&self, _credential: &str, principal: &str) -> RustBulkResult<bool> {
        Ok(!self.disabled_principals.lock().unwrap().contains(principal))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    transport: Arc<MockTransport>,
    clock: Arc<ManualClock>,
    engine: CampaignEngine,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let transport = MockTransport::new(store.clone());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
    ));
    let queue = CampaignQueue::new(Arc::new(MemoryQueueBackend::new()));
    let services = CoreServices::with_clock(
        store.clone(),
        transport.clone(),
        Arc::new(AesCredentialStore),
        queue,
        clock.clone(),
    );
    Harness {
        store,
        transport,
        clock,
        engine: CampaignEngine::new(services),
    }
}

impl Harness {
    fn seed_account(&self, name: &str, domain: &str, daily_limit: u32, daily_sent: u32) -> u64 {
        let credential = AesCredentialStore
            .encrypt(&format!(
                r#"{{"type":"service_account","client_email":"svc@{domain}"}}"#
            ))
            .unwrap();
        self.store.insert_account(Account {
            id: 0,
            name: name.to_string(),
            client_email: format!("svc@{domain}"),
            domain: Some(domain.to_string()),
            admin_email: Some(format!("admin@{domain}")),
            encrypted_credential: credential,
            daily_limit,
            daily_sent,
            daily_reset_date: self.clock.today(),
            total_sent_all_time: 0,
            created_at: 0,
            updated_at: 0,
        })
    }

    fn seed_user(&self, account_id: u64, email: &str) -> u64 {
        self.store.insert_user(WorkspaceUser {
            id: 0,
            account_id,
            email: email.to_string(),
            full_name: None,
            is_active: true,
            quota_limit: 100,
            emails_sent_today: 0,
            last_used: None,
            created_at: 0,
        })
    }

    fn seed_campaign(&self, recipients: &[&str], account_ids: Vec<u64>) -> u64 {
        self.seed_campaign_with(recipients, account_ids, |_| {})
    }

    fn seed_campaign_with(
        &self,
        recipients: &[&str],
        account_ids: Vec<u64>,
        customize: impl FnOnce(&mut Campaign),
    ) -> u64 {
        let recipients = recipients
            .iter()
            .map(|email| {
                let mut variables = AHashMap::new();
                let local = email.split('@').next().unwrap_or_default();
                variables.insert("name".to_string(), local.to_uppercase());
                Recipient {
                    email: email.to_string(),
                    variables,
                }
            })
            .collect::<Vec<_>>();
        let mut campaign = Campaign {
            name: "spring-launch".to_string(),
            subject: "Hello {{name}}".to_string(),
            body_html: Some(serde_json::json!("<p>Hi {{name}}</p>")),
            body_plain: Some(serde_json::json!("Hi {{name}}")),
            from_name: Some("Acme Updates".to_string()),
            total_recipients: recipients.len() as u32,
            pending_count: recipients.len() as u32,
            recipients,
            sender_account_ids: account_ids,
            ..Default::default()
        };
        customize(&mut campaign);
        self.store.insert_campaign(campaign)
    }

    async fn drain_batches(&self, campaign_id: u64) -> Vec<SenderBatch> {
        let queue = &self.engine.services().queue;
        let mut batches = Vec::new();
        while let Some(batch) = queue.pop_batch(campaign_id).await.unwrap() {
            batches.push(batch);
        }
        batches
    }

    async fn wait_until<F>(&self, campaign_id: u64, predicate: F) -> Campaign
    where
        F: Fn(&Campaign) -> bool,
    {
        for _ in 0..500 {
            let campaign = self.store.get_campaign(campaign_id).await.unwrap();
            if predicate(&campaign) {
                return campaign;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached for campaign {campaign_id}");
    }

    async fn wait_terminal(&self, campaign_id: u64) -> Campaign {
        self.wait_until(campaign_id, |campaign| campaign.status.is_terminal())
            .await
    }
}

#[tokio::test]
async fn happy_path_two_senders() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    h.seed_user(account, "u2@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x"], vec![account]);

    let report = h.engine.prepare_campaign(campaign_id).await.unwrap();
    assert_eq!(report.status, CampaignStatus::Ready);
    assert_eq!(report.total_tasks, 4);
    assert_eq!(report.sender_count, 2);

    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.sent_count, 4);
    assert_eq!(campaign.failed_count, 0);
    assert_eq!(campaign.pending_count, 0);
    assert!(campaign.completed_at.is_some());
    assert_eq!(h.transport.sent_count(), 4);

    // every sent row carries the transport-assigned id
    for log in h.store.list_email_logs(campaign_id).await.unwrap() {
        assert_eq!(log.status, EmailStatus::Sent);
        assert!(log.message_id.as_deref().is_some_and(|id| !id.is_empty()));
        assert!(log.sent_at.is_some());
    }

    // variables were substituted into the delivered payload
    let mails = h.transport.sent_mails();
    let to_a = mails.iter().find(|m| m.recipient == "a@x").unwrap();
    assert!(to_a.raw.contains("Hello A"));
    assert!(to_a.raw.contains("Hi A"));
}

#[tokio::test]
async fn prepare_splits_contiguous_segments() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    h.seed_user(account, "u2@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x"], vec![account]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    let batches = h.drain_batches(campaign_id).await;

    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].sender.principal_email, "u1@x.test");
    let recipients: Vec<&str> = batches[0]
        .tasks
        .iter()
        .map(|task| task.recipient_email.as_str())
        .collect();
    assert_eq!(recipients, vec!["a@x", "b@x"]);
    assert_eq!(batches[1].sender.principal_email, "u2@x.test");
    let recipients: Vec<&str> = batches[1]
        .tasks
        .iter()
        .map(|task| task.recipient_email.as_str())
        .collect();
    assert_eq!(recipients, vec!["c@x", "d@x"]);

    // queued batches never carry decrypted material
    for batch in &batches {
        assert!(!batch.encode().unwrap().contains("service_account"));
    }
}

#[tokio::test]
async fn remainder_goes_to_first_sender() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    h.seed_user(account, "u2@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x", "e@x"], vec![account]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    let batches = h.drain_batches(campaign_id).await;

    assert_eq!(batches[0].tasks.len(), 3);
    assert_eq!(batches[1].tasks.len(), 2);
}

#[tokio::test]
async fn test_after_probes_interleave_and_do_not_count() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign_with(
        &["a@x", "b@x", "c@x", "d@x"],
        vec![account],
        |campaign| {
            campaign.test_after_email = Some("probe@x".to_string());
            campaign.test_after_count = 2;
        },
    );

    let report = h.engine.prepare_campaign(campaign_id).await.unwrap();
    assert_eq!(report.total_tasks, 6);

    let batches = h.drain_batches(campaign_id).await;
    assert_eq!(batches.len(), 1);
    let tasks = &batches[0].tasks;
    let recipients: Vec<&str> = tasks.iter().map(|t| t.recipient_email.as_str()).collect();
    assert_eq!(recipients, vec!["a@x", "b@x", "probe@x", "c@x", "d@x", "probe@x"]);
    assert!(tasks[2].is_probe());
    assert!(tasks[2].subject.starts_with("[TEST AFTER 2] "));
    assert!(tasks[5].subject.starts_with("[TEST AFTER 4] "));

    // re-queue what we drained and run it to the end
    for batch in &batches {
        h.engine.services().queue.push_batch(batch).await.unwrap();
    }
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.sent_count, 4);
    assert_eq!(h.transport.sent_count(), 6);
    let probe_mails = h
        .transport
        .sent_mails()
        .into_iter()
        .filter(|mail| mail.recipient == "probe@x")
        .count();
    assert_eq!(probe_mails, 2);
}

#[tokio::test]
async fn admin_addresses_never_enter_the_pool() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "admin@x.test");
    h.seed_user(account, "alice@x.test");
    h.seed_user(account, "bot_7@x.test");
    h.seed_user(account, "bob@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x"], vec![account]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    let batches = h.drain_batches(campaign_id).await;

    let senders: Vec<&str> = batches
        .iter()
        .map(|batch| batch.sender.principal_email.as_str())
        .collect();
    assert_eq!(senders, vec!["alice@x.test", "bob@x.test"]);

    // invariant: no email log is owned by an excluded address
    for log in h.store.list_email_logs(campaign_id).await.unwrap() {
        assert!(log.sender_email == "alice@x.test" || log.sender_email == "bob@x.test");
    }
}

#[tokio::test]
async fn pause_mid_run_keeps_remainder_pending_then_resume_completes() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let recipients: Vec<String> = (0..100).map(|i| format!("r{i}@x")).collect();
    let recipient_refs: Vec<&str> = recipients.iter().map(|s| s.as_str()).collect();
    let campaign_id = h.seed_campaign(&recipient_refs, vec![account]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.transport
        .set_status_after_sends(10, campaign_id, CampaignStatus::Paused);
    h.engine.resume_campaign(campaign_id).await.unwrap();

    // executor observes the pause at a poll point and commits what was
    // already in flight
    let campaign = h
        .wait_until(campaign_id, |campaign| {
            campaign.status == CampaignStatus::Paused
                && campaign.pending_count < 100
                && campaign.sent_count + campaign.pending_count == 100
        })
        .await;
    assert!(campaign.sent_count >= 10);
    assert!(campaign.pending_count > 0);
    assert_eq!(campaign.failed_count, 0);

    let pending_logs = h.store.list_pending_email_logs(campaign_id).await.unwrap();
    assert_eq!(pending_logs.len() as u32, campaign.pending_count);

    // second resume rebuilds the drained queue from the datastore and
    // runs the remainder down
    h.transport
        .set_status_after_sends(u64::MAX, campaign_id, CampaignStatus::Paused);
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.sent_count, 100);
    assert_eq!(campaign.pending_count, 0);
    assert_eq!(h.transport.sent_count(), 100);
}

#[tokio::test]
async fn daily_limit_rejects_whole_batch() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 10, 9);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x", "e@x"], vec![account]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(campaign.failed_count, 5);
    assert_eq!(campaign.sent_count, 0);
    assert_eq!(campaign.pending_count, 0);
    assert_eq!(h.transport.sent_count(), 0);

    for log in h.store.list_email_logs(campaign_id).await.unwrap() {
        assert_eq!(log.status, EmailStatus::Failed);
        assert_eq!(
            log.error_message.as_deref(),
            Some("Daily limit exceeded: 4 over limit")
        );
    }
    // the account counter did not move
    let account = h.store.get_account(account).await.unwrap();
    assert_eq!(account.daily_sent, 9);
}

#[tokio::test]
async fn transport_failures_are_per_task() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x"], vec![account]);
    h.transport.fail_recipient("c@x");

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.sent_count, 3);
    assert_eq!(campaign.failed_count, 1);
    assert_eq!(campaign.pending_count, 0);

    for log in h.store.list_email_logs(campaign_id).await.unwrap() {
        if log.recipient_email == "c@x" {
            assert_eq!(log.status, EmailStatus::Failed);
            assert!(log
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("550")));
            assert!(log.failed_at.is_some());
        } else {
            assert_eq!(log.status, EmailStatus::Sent);
        }
    }

    // user and account accounting reflect only successes
    let account = h.store.get_account(account).await.unwrap();
    assert_eq!(account.daily_sent, 3);
}

#[tokio::test]
async fn disabled_mailbox_fails_tasks_without_sending() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x"], vec![account]);
    h.transport.disable_principal("u1@x.test");

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(campaign.failed_count, 2);
    assert_eq!(h.transport.sent_count(), 0);
    for log in h.store.list_email_logs(campaign_id).await.unwrap() {
        assert_eq!(
            log.error_message.as_deref(),
            Some("Mail service not enabled for this user")
        );
    }
}

#[tokio::test]
async fn cancel_mid_run_fails_remaining_tasks() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let recipients: Vec<String> = (0..100).map(|i| format!("r{i}@x")).collect();
    let recipient_refs: Vec<&str> = recipients.iter().map(|s| s.as_str()).collect();
    let campaign_id = h.seed_campaign(&recipient_refs, vec![account]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.transport
        .set_status_after_sends(10, campaign_id, CampaignStatus::Canceled);
    h.engine.resume_campaign(campaign_id).await.unwrap();

    let campaign = h
        .wait_until(campaign_id, |campaign| campaign.failed_count > 0)
        .await;
    assert_eq!(campaign.status, CampaignStatus::Canceled);
    assert_eq!(campaign.sent_count, 0);
    assert_eq!(
        campaign.failed_count + campaign.pending_count,
        100
    );

    let logs = h.store.list_email_logs(campaign_id).await.unwrap();
    let canceled = logs
        .iter()
        .filter(|log| log.error_message.as_deref() == Some("Campaign canceled"))
        .count() as u32;
    assert_eq!(canceled, campaign.failed_count);
    assert!(canceled > 0);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign(&["a@x"], vec![account]);
    h.engine.prepare_campaign(campaign_id).await.unwrap();

    let first = h
        .engine
        .control_campaign(campaign_id, ControlAction::Cancel)
        .await
        .unwrap();
    assert_eq!(first.status, CampaignStatus::Canceled);
    let second = h
        .engine
        .control_campaign(campaign_id, ControlAction::Cancel)
        .await
        .unwrap();
    assert_eq!(second.status, CampaignStatus::Canceled);

    // the queue was cleared, so a resume finds nothing to do
    let err = h.engine.resume_campaign(campaign_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[tokio::test]
async fn zero_recipients_is_a_validation_error() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign(&[], vec![account]);

    let err = h.engine.prepare_campaign(campaign_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
    // a rejected draft stays a draft
    let campaign = h.store.get_campaign(campaign_id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Draft);
}

#[tokio::test]
async fn full_custom_requires_header_block() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign_with(&["a@x"], vec![account], |campaign| {
        campaign.header_type = HeaderType::FullCustom;
        campaign.custom_header = Some("   ".to_string());
    });

    let err = h.engine.prepare_campaign(campaign_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn full_custom_headers_reach_the_wire() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "jane.doe@x.test");
    let campaign_id = h.seed_campaign_with(&["a@x"], vec![account], |campaign| {
        campaign.header_type = HeaderType::FullCustom;
        campaign.from_name = None;
        campaign.custom_header = Some(
            "from: [from] <[smtp]>\nsubject: [subject]\nx-track: [rndn_6]".to_string(),
        );
    });

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;
    assert_eq!(campaign.status, CampaignStatus::Completed);

    let mails = h.transport.sent_mails();
    assert_eq!(mails.len(), 1);
    let raw = &mails[0].raw;
    // display name derived from the principal's local part
    assert!(raw.contains("From: Jane Doe <jane.doe@x.test>"));
    assert!(raw.contains("Subject: Hello A"));
    assert!(raw.contains("To: a@x"));
    // unknown header names pass through without case normalization
    assert!(raw.contains("x-track: "));
}

#[tokio::test]
async fn unreadable_credential_excludes_only_that_account() {
    let h = harness();
    let bad = h.seed_account("bad", "bad.test", 2000, 0);
    {
        let mut account = h.store.get_account(bad).await.unwrap();
        account.encrypted_credential = "not-a-blob".to_string();
        h.store.insert_account(account);
    }
    let good = h.seed_account("good", "good.test", 2000, 0);
    h.seed_user(bad, "u1@bad.test");
    h.seed_user(good, "u1@good.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x"], vec![bad, good]);

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    let batches = h.drain_batches(campaign_id).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].sender.principal_email, "u1@good.test");
}

#[tokio::test]
async fn empty_pool_fails_campaign_and_reprepare_recovers() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    // only an excluded address exists at first
    h.seed_user(account, "admin@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x"], vec![account]);

    let err = h.engine.prepare_campaign(campaign_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSendersAvailable);
    let campaign = h.store.get_campaign(campaign_id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);

    // recovery path: fix the account, re-run prepare on the failed row
    h.seed_user(account, "alice@x.test");
    let report = h.engine.prepare_campaign(campaign_id).await.unwrap();
    assert_eq!(report.status, CampaignStatus::Ready);
    assert_eq!(report.total_tasks, 2);
}

#[tokio::test]
async fn reprepare_is_deterministic_for_same_inputs() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    h.seed_user(account, "u2@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x", "e@x"], vec![account]);

    let first = h.engine.prepare_campaign(campaign_id).await.unwrap();
    // push the campaign into FAILED and prepare again with identical inputs
    h.store
        .update_campaign(
            campaign_id,
            CampaignPatch {
                status: Some(CampaignStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let second = h.engine.prepare_campaign(campaign_id).await.unwrap();

    assert_eq!(first.total_tasks, second.total_tasks);
    assert_eq!(first.sender_count, second.sender_count);
}

#[tokio::test]
async fn resume_before_prepare_is_not_prepared() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign_with(&["a@x"], vec![account], |campaign| {
        campaign.status = CampaignStatus::Ready;
    });

    let err = h.engine.resume_campaign(campaign_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotPrepared);
}

#[tokio::test]
async fn prepare_rejects_wrong_state() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign_with(&["a@x"], vec![account], |campaign| {
        campaign.status = CampaignStatus::Sending;
    });

    let err = h.engine.prepare_campaign(campaign_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[tokio::test]
async fn progress_joins_queue_and_store() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x"], vec![account]);
    h.transport.fail_recipient("b@x");

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.engine.resume_campaign(campaign_id).await.unwrap();
    h.wait_terminal(campaign_id).await;

    let progress = h.engine.campaign_progress(campaign_id).await.unwrap();
    assert_eq!(progress.status, CampaignStatus::Completed);
    assert_eq!(progress.total, 3);
    assert_eq!(progress.sent, 2);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.pending, 0);

    let acme = progress.per_account.get("acme").unwrap();
    assert_eq!(acme.sent, 2);
    assert_eq!(acme.failed, 1);
    assert_eq!(acme.pending, 0);

    let logs = h.engine.tail_campaign_logs(campaign_id, 0, 50).await.unwrap();
    assert!(!logs.items.is_empty());
    assert!(logs
        .items
        .iter()
        .any(|entry| entry.message.contains("Campaign completed")));
}

#[tokio::test]
async fn counters_reconcile_after_every_terminal_run() {
    let h = harness();
    let account = h.seed_account("acme", "x.test", 2000, 0);
    h.seed_user(account, "u1@x.test");
    h.seed_user(account, "u2@x.test");
    let campaign_id = h.seed_campaign(&["a@x", "b@x", "c@x", "d@x", "e@x"], vec![account]);
    h.transport.fail_recipient("a@x");
    h.transport.fail_recipient("e@x");

    h.engine.prepare_campaign(campaign_id).await.unwrap();
    h.engine.resume_campaign(campaign_id).await.unwrap();
    let campaign = h.wait_terminal(campaign_id).await;

    assert_eq!(
        campaign.sent_count + campaign.failed_count + campaign.pending_count,
        campaign.total_recipients
    );
    assert_eq!(campaign.sent_count, 3);
    assert_eq!(campaign.failed_count, 2);

    // per-user accounting followed the successful sends
    let users = h
        .store
        .get_active_users_for_account(account)
        .await
        .unwrap();
    let sent_today: u32 = users.iter().map(|user| user.emails_sent_today).sum();
    assert_eq!(sent_today, 3);
}
