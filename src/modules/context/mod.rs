// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use crate::modules::common::clock::{Clock, SystemClock};
use crate::modules::error::RustBulkResult;
use crate::modules::queue::CampaignQueue;
use crate::modules::store::Datastore;
use crate::modules::transport::MailTransport;
use crate::{decrypt, encrypt};

/// Symmetric protection of stored service-account credentials.
///
/// `decrypt` is a pure function of the blob; failures surface as
/// `DecryptError` so a single unreadable account degrades the sender
/// pool instead of failing the run.
pub trait CredentialStore: Send + Sync {
    fn decrypt(&self, blob: &str) -> RustBulkResult<String>;

    fn encrypt(&self, plaintext: &str) -> RustBulkResult<String>;
}

/// AES-256-GCM credential store keyed from the process settings.
pub struct AesCredentialStore;

impl CredentialStore for AesCredentialStore {
    fn decrypt(&self, blob: &str) -> RustBulkResult<String> {
        decrypt!(blob)
    }

    fn encrypt(&self, plaintext: &str) -> RustBulkResult<String> {
        encrypt!(plaintext)
    }
}

/// Collaborator handles threaded through every engine call site.
///
/// Constructed once at startup by the embedding service; nothing in the
/// execution core reaches for process-global state beyond configuration.
pub struct CoreServices {
    pub store: Arc<dyn Datastore>,
    pub transport: Arc<dyn MailTransport>,
    pub credentials: Arc<dyn CredentialStore>,
    pub queue: CampaignQueue,
    pub clock: Arc<dyn Clock>,
}

impl CoreServices {
    pub fn new(
        store: Arc<dyn Datastore>,
        transport: Arc<dyn MailTransport>,
        credentials: Arc<dyn CredentialStore>,
        queue: CampaignQueue,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            credentials,
            queue,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(
        store: Arc<dyn Datastore>,
        transport: Arc<dyn MailTransport>,
        credentials: Arc<dyn CredentialStore>,
        queue: CampaignQueue,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            credentials,
            queue,
            clock,
        })
    }
}
