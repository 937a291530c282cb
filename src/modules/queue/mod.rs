// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::modules::campaign::entity::MailAttachment;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::sender::QueuedSender;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;

pub mod memory;
pub mod redis;

/// Envelope version written with every queued batch. The dispatcher
/// refuses to drain payloads from a different layout, so a stale queue
/// surfaces as `NotPrepared` instead of silently misbehaving.
pub const BATCH_ENVELOPE_VERSION: u32 = 1;

pub fn tasks_key(campaign_id: u64) -> String {
    format!("campaign:{campaign_id}:tasks")
}

pub fn progress_key(campaign_id: u64) -> String {
    format!("campaign:{campaign_id}:progress")
}

pub fn logs_key(campaign_id: u64) -> String {
    format!("campaign:{campaign_id}:logs")
}

/// One fully pre-rendered send. No template work remains at dispatch
/// time; `custom_header_text` still carries its `[tag]` macros because
/// several of them must expand per transmission.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RenderedTask {
    /// Row the result is written back to; `None` marks a test-after
    /// probe that is never counted.
    pub email_log_id: Option<u64>,
    pub recipient_email: String,
    pub subject: String,
    pub body_html: String,
    pub body_plain: String,
    pub from_name: Option<String>,
    #[serde(default)]
    pub custom_headers: AHashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
    pub custom_header_text: Option<String>,
}

impl RenderedTask {
    pub fn is_probe(&self) -> bool {
        self.email_log_id.is_none()
    }
}

/// The unit a batch executor drains: one sender plus its pre-rendered
/// tasks.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SenderBatch {
    pub v: u32,
    pub campaign_id: u64,
    pub sender: QueuedSender,
    pub tasks: Vec<RenderedTask>,
}

impl SenderBatch {
    pub fn new(campaign_id: u64, sender: QueuedSender, tasks: Vec<RenderedTask>) -> Self {
        Self {
            v: BATCH_ENVELOPE_VERSION,
            campaign_id,
            sender,
            tasks,
        }
    }

    pub fn encode(&self) -> RustBulkResult<String> {
        serde_json::to_string(self)
            .map_err(|e| raise_error!(format!("{e:#?}"), ErrorCode::InternalError))
    }

    pub fn decode(payload: &str) -> RustBulkResult<Self> {
        let batch: SenderBatch = serde_json::from_str(payload).map_err(|e| {
            raise_error!(
                format!("Queued batch payload is unreadable: {e}"),
                ErrorCode::NotPrepared
            )
        })?;
        if batch.v != BATCH_ENVELOPE_VERSION {
            return Err(raise_error!(
                format!(
                    "Queued batch has envelope version {} but this engine expects {}",
                    batch.v, BATCH_ENVELOPE_VERSION
                ),
                ErrorCode::NotPrepared
            ));
        }
        Ok(batch)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LogEntry {
    pub ts: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LogPage {
    pub items: Vec<LogEntry>,
    pub next_offset: i64,
}

/// Narrow seam over the queue store, mirroring exactly the command set
/// the engine uses. `RedisQueueBackend` is the production
/// implementation; `MemoryQueueBackend` backs tests and embedded use.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn rpush(&self, key: &str, value: String) -> RustBulkResult<()>;

    async fn lpop(&self, key: &str) -> RustBulkResult<Option<String>>;

    async fn llen(&self, key: &str) -> RustBulkResult<i64>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> RustBulkResult<Vec<String>>;

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> RustBulkResult<()>;

    async fn del(&self, key: &str) -> RustBulkResult<()>;

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> RustBulkResult<()>;

    async fn hgetall(&self, key: &str) -> RustBulkResult<HashMap<String, String>>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> RustBulkResult<i64>;

    async fn expire(&self, key: &str, seconds: u64) -> RustBulkResult<()>;
}

/// Durable per-campaign work queue, progress hash and live-log list.
#[derive(Clone)]
pub struct CampaignQueue {
    backend: Arc<dyn QueueBackend>,
}

impl CampaignQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub async fn clear_tasks(&self, campaign_id: u64) -> RustBulkResult<()> {
        self.backend.del(&tasks_key(campaign_id)).await
    }

    pub async fn push_batch(&self, batch: &SenderBatch) -> RustBulkResult<()> {
        self.backend
            .rpush(&tasks_key(batch.campaign_id), batch.encode()?)
            .await
    }

    /// Pop the next batch in insertion order, if any.
    pub async fn pop_batch(&self, campaign_id: u64) -> RustBulkResult<Option<SenderBatch>> {
        match self.backend.lpop(&tasks_key(campaign_id)).await? {
            Some(payload) => Ok(Some(SenderBatch::decode(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn init_progress(
        &self,
        campaign_id: u64,
        total: u64,
        test_after_enabled: bool,
        test_after_email: Option<&str>,
        test_after_count: u32,
    ) -> RustBulkResult<()> {
        let key = progress_key(campaign_id);
        let fields = vec![
            ("total".to_string(), total.to_string()),
            ("sent".to_string(), "0".to_string()),
            ("failed".to_string(), "0".to_string()),
            ("pending".to_string(), total.to_string()),
            (
                "test_after_enabled".to_string(),
                if test_after_enabled { "1" } else { "0" }.to_string(),
            ),
            (
                "test_after_email".to_string(),
                test_after_email.unwrap_or_default().to_string(),
            ),
            (
                "test_after_count".to_string(),
                test_after_count.to_string(),
            ),
        ];
        self.backend.hset_multiple(&key, &fields).await?;
        self.backend
            .expire(&key, SETTINGS.rustbulk_progress_ttl_secs)
            .await
    }

    /// Mirror a batch commit into the progress hash.
    pub async fn bump_progress(
        &self,
        campaign_id: u64,
        sent: i64,
        failed: i64,
        processed: i64,
    ) -> RustBulkResult<()> {
        let key = progress_key(campaign_id);
        if sent != 0 {
            self.backend.hincrby(&key, "sent", sent).await?;
        }
        if failed != 0 {
            self.backend.hincrby(&key, "failed", failed).await?;
        }
        if processed != 0 {
            self.backend.hincrby(&key, "pending", -processed).await?;
        }
        Ok(())
    }

    pub async fn progress(&self, campaign_id: u64) -> RustBulkResult<HashMap<String, String>> {
        self.backend.hgetall(&progress_key(campaign_id)).await
    }

    /// Append a timestamped line to the live log list. Best-effort: a
    /// queue hiccup must never fail the send path.
    pub async fn append_log(
        &self,
        campaign_id: u64,
        now: DateTime<Utc>,
        message: impl Into<String>,
    ) {
        let entry = LogEntry {
            ts: Some(now.to_rfc3339()),
            message: message.into(),
        };
        let key = logs_key(campaign_id);
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        if let Err(e) = self.backend.rpush(&key, payload).await {
            warn!(campaign_id, "Failed to append live log: {}", e.message());
            return;
        }
        let cap = SETTINGS.rustbulk_log_cap;
        if let Err(e) = self.backend.ltrim(&key, -cap, -1).await {
            warn!(campaign_id, "Failed to trim live log: {}", e.message());
        }
    }

    /// Offset-paginated read of the live log list.
    pub async fn tail_logs(
        &self,
        campaign_id: u64,
        offset: i64,
        limit: i64,
    ) -> RustBulkResult<LogPage> {
        let key = logs_key(campaign_id);
        let length = self.backend.llen(&key).await?;
        let offset = offset.max(0);
        if offset >= length {
            return Ok(LogPage {
                items: vec![],
                next_offset: length,
            });
        }
        let end = (length - 1).min(offset + limit.max(1) - 1);
        let raw_items = self.backend.lrange(&key, offset, end).await?;
        let items = raw_items
            .into_iter()
            .map(|raw| {
                serde_json::from_str(&raw).unwrap_or(LogEntry {
                    ts: None,
                    message: raw,
                })
            })
            .collect();
        Ok(LogPage {
            items,
            next_offset: end + 1,
        })
    }
}

pub(crate) fn progress_field(progress: &HashMap<String, String>, field: &str) -> i64 {
    progress
        .get(field)
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryQueueBackend;
    use super::*;
    use chrono::Utc;

    fn queue() -> CampaignQueue {
        CampaignQueue::new(Arc::new(MemoryQueueBackend::new()))
    }

    fn sender() -> QueuedSender {
        QueuedSender {
            account_id: 1,
            user_id: 2,
            principal_email: "u1@x.test".into(),
            credential_blob: "blob".into(),
        }
    }

    fn task(recipient: &str) -> RenderedTask {
        RenderedTask {
            email_log_id: Some(1),
            recipient_email: recipient.into(),
            subject: "s".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn batches_round_trip_in_insertion_order() {
        let queue = queue();
        let first = SenderBatch::new(7, sender(), vec![task("a@x.test")]);
        let second = SenderBatch::new(7, sender(), vec![task("b@x.test")]);
        queue.push_batch(&first).await.unwrap();
        queue.push_batch(&second).await.unwrap();

        assert_eq!(queue.pop_batch(7).await.unwrap(), Some(first));
        assert_eq!(queue.pop_batch(7).await.unwrap(), Some(second));
        assert_eq!(queue.pop_batch(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_envelope_version_is_not_prepared() {
        let queue = queue();
        let mut batch = SenderBatch::new(7, sender(), vec![]);
        batch.v = 99;
        queue.push_batch(&batch).await.unwrap();

        let err = queue.pop_batch(7).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotPrepared);
    }

    #[tokio::test]
    async fn progress_hash_tracks_commits() {
        let queue = queue();
        queue.init_progress(7, 10, false, None, 0).await.unwrap();
        queue.bump_progress(7, 3, 1, 4).await.unwrap();

        let progress = queue.progress(7).await.unwrap();
        assert_eq!(progress_field(&progress, "total"), 10);
        assert_eq!(progress_field(&progress, "sent"), 3);
        assert_eq!(progress_field(&progress, "failed"), 1);
        assert_eq!(progress_field(&progress, "pending"), 6);
    }

    #[tokio::test]
    async fn log_tailing_paginates_by_offset() {
        let queue = queue();
        for i in 0..5 {
            queue.append_log(7, Utc::now(), format!("line {i}")).await;
        }

        let page = queue.tail_logs(7, 0, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].message, "line 0");
        assert_eq!(page.next_offset, 2);

        let page = queue.tail_logs(7, page.next_offset, 10).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.next_offset, 5);

        let page = queue.tail_logs(7, 5, 10).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_offset, 5);
    }
}
