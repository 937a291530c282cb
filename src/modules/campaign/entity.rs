// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Campaign lifecycle states.
///
/// ```text
/// DRAFT ──prepare──► PREPARING ──ok──► READY ──resume──► SENDING
///                     │  fail                   ▲     │
///                     ▼                         │     ├──pause──► PAUSED ──resume──► SENDING
///                  FAILED ◄───fail──┐           │     │
///                     ▲             │           │     ├──cancel──► CANCELED
///                     └──prepare────┘           │     │
///                                               └─────┴──drain──► COMPLETED
/// ```
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Preparing,
    Ready,
    Sending,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Canceled
        )
    }

    /// Only drafts and failed campaigns may enter preparation; a
    /// re-prepare of a failed campaign is the recovery mechanism.
    pub fn preparable(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Failed)
    }

    /// Resuming a SENDING campaign is allowed so a crashed dispatcher
    /// can be re-driven without a state reset.
    pub fn resumable(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Ready | CampaignStatus::Paused | CampaignStatus::Sending
        )
    }

    pub fn pausable(&self) -> bool {
        matches!(self, CampaignStatus::Sending)
    }

    /// Cancel is legal from every non-completed state and idempotent
    /// once canceled.
    pub fn cancelable(&self) -> bool {
        !matches!(self, CampaignStatus::Completed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Preparing => "preparing",
            CampaignStatus::Ready => "ready",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// How the outgoing message headers are produced.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderType {
    /// Ordinary path: the adapter builds From/To/Subject and MIME
    /// structure itself.
    #[default]
    Existing,
    /// The campaign supplies a complete header block; the adapter
    /// places it verbatim after tag processing.
    FullCustom,
}

/// One campaign recipient with its substitution variables.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub variables: AHashMap<String, String>,
}

/// A base64-encoded file attached to every message of a campaign.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct MailAttachment {
    pub filename: String,
    /// Base64-encoded payload
    pub content: String,
    /// MIME type; defaults to application/octet-stream when absent
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Campaign {
    /// Unique campaign identifier
    pub id: u64,
    /// Operator-facing campaign name
    pub name: String,
    /// Subject template; `{{var}}` tokens are substituted per recipient
    pub subject: String,
    /// HTML body template. Structured editor output is tolerated and
    /// flattened to text during rendering.
    pub body_html: Option<serde_json::Value>,
    /// Plain-text body template
    pub body_plain: Option<serde_json::Value>,
    /// Display name placed in the From header
    pub from_name: Option<String>,
    /// Header production mode
    pub header_type: HeaderType,
    /// Free-form header block, required in full-custom mode
    pub custom_header: Option<String>,
    /// Extra headers merged into ordinary-mode messages
    #[serde(default)]
    pub custom_headers: AHashMap<String, String>,
    /// Attachments included with every message
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
    /// Ordered recipient list
    pub recipients: Vec<Recipient>,
    /// Accounts whose users form the sender pool
    pub sender_account_ids: Vec<u64>,
    /// Informational upper bound per hour
    pub rate_limit: Option<u32>,
    /// Advisory per-sender concurrency cap
    pub concurrency: Option<u32>,
    /// Observation address for test-after probes
    pub test_after_email: Option<String>,
    /// Insert a probe after every N recipients; 0 disables
    pub test_after_count: u32,
    pub status: CampaignStatus,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub pending_count: u32,
    pub prepared_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub paused_at: Option<i64>,
    /// Opaque id of the dispatcher run currently driving this campaign
    pub dispatch_handle: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Campaign {
    pub fn is_full_custom(&self) -> bool {
        self.header_type == HeaderType::FullCustom
    }

    pub fn test_after_enabled(&self) -> bool {
        self.test_after_email.is_some() && self.test_after_count > 0
    }
}

/// Per-recipient delivery outcome states.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
    Retry,
}

/// One row per recipient per campaign; the durable record of what was
/// attempted and how it ended.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct EmailLog {
    pub id: u64,
    pub campaign_id: u64,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    /// Principal assigned by the distribution planner
    pub sender_email: String,
    pub service_account_id: u64,
    pub subject: String,
    /// Transport-assigned id, present exactly when status is sent
    pub message_id: Option<String>,
    pub status: EmailStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub failed_at: Option<i64>,
}

impl EmailLog {
    /// Rows still owed a delivery attempt when (re)preparing.
    pub fn needs_send(&self) -> bool {
        matches!(
            self.status,
            EmailStatus::Pending | EmailStatus::Failed | EmailStatus::Retry
        )
    }
}

/// Insert payload for the initial per-recipient rows.
#[derive(Clone, Debug, Default)]
pub struct NewEmailLog {
    pub campaign_id: u64,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub sender_email: String,
    pub service_account_id: u64,
    pub subject: String,
}
