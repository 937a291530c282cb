// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use async_trait::async_trait;

use crate::modules::error::RustBulkResult;

pub mod send;

/// Opaque wire client for the delegated mail API.
///
/// Implementations impersonate `principal` under domain-wide delegation
/// using the decrypted `credential` and transmit an already-assembled
/// RFC-5322 message. Errors are expected to carry `MailDisabled` for
/// the "mail service not enabled for user" rejection and
/// `TransportError` (with the remote status and message) for anything
/// else, so per-task failures stay distinguishable downstream.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_raw(
        &self,
        credential: &str,
        principal: &str,
        recipient: &str,
        raw_message: Vec<u8>,
    ) -> RustBulkResult<String>;

    async fn is_mail_enabled(&self, credential: &str, principal: &str) -> RustBulkResult<bool>;
}
