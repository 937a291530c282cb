// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::modules::campaign::entity::Campaign;
use crate::modules::context::CredentialStore;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::store::Datastore;
use crate::raise_error;

/// Local parts (and name tokens) that must never send campaign mail.
const ADMIN_PATTERNS: &[&str] = &[
    "admin",
    "administrator",
    "postmaster",
    "abuse",
    "support",
    "noreply",
    "no-reply",
    "donotreply",
    "do-not-reply",
    "system",
    "automation",
    "bot",
    "test",
    "demo",
];

/// One usable (account, user) pair of a campaign's sender pool.
///
/// Carries the decrypted credential for the lifetime of the run. The
/// decrypted form is excluded from `Debug` output and is never
/// serialized; queued batches carry the encrypted blob instead.
#[derive(Clone)]
pub struct Sender {
    pub account_id: u64,
    pub user_id: u64,
    pub principal_email: String,
    pub credential: String,
    pub credential_blob: String,
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("account_id", &self.account_id)
            .field("user_id", &self.user_id)
            .field("principal_email", &self.principal_email)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl Sender {
    pub fn queued(&self) -> QueuedSender {
        QueuedSender {
            account_id: self.account_id,
            user_id: self.user_id,
            principal_email: self.principal_email.clone(),
            credential_blob: self.credential_blob.clone(),
        }
    }
}

/// Queue-safe projection of a [`Sender`]: same identity, encrypted
/// credential only.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct QueuedSender {
    pub account_id: u64,
    pub user_id: u64,
    pub principal_email: String,
    pub credential_blob: String,
}

impl QueuedSender {
    pub fn into_sender(self, credentials: &dyn CredentialStore) -> RustBulkResult<Sender> {
        let credential = credentials.decrypt(&self.credential_blob)?;
        Ok(Sender {
            account_id: self.account_id,
            user_id: self.user_id,
            principal_email: self.principal_email,
            credential,
            credential_blob: self.credential_blob,
        })
    }
}

/// Conservative admin detection. A sender is excluded when any clause
/// holds: exact match with the account's admin address, a local part
/// matching the pattern set (exact, or pattern followed by `.`/`_`),
/// or a display name containing any pattern token.
pub fn is_admin_address(
    user_email: &str,
    account_admin_email: Option<&str>,
    user_name: Option<&str>,
) -> bool {
    if user_email.is_empty() {
        return false;
    }
    let email_lower = user_email.trim().to_lowercase();

    if let Some(admin) = account_admin_email {
        if !admin.is_empty() && email_lower == admin.trim().to_lowercase() {
            return true;
        }
    }

    let local_part = email_lower.split('@').next().unwrap_or(&email_lower);
    for pattern in ADMIN_PATTERNS {
        if local_part == *pattern
            || local_part.starts_with(&format!("{pattern}."))
            || local_part.starts_with(&format!("{pattern}_"))
        {
            return true;
        }
    }

    if let Some(name) = user_name {
        let name_lower = name.trim().to_lowercase();
        for pattern in ADMIN_PATTERNS {
            if name_lower.contains(pattern) {
                return true;
            }
        }
    }

    false
}

/// Build the ordered, admin-filtered sender pool for a campaign.
///
/// Each account's credential blob is decrypted exactly once; accounts
/// whose blob cannot be decrypted are excluded from this run rather
/// than failing the prepare. An empty result is an error: nothing can
/// send.
pub async fn build_sender_pool(
    store: &dyn Datastore,
    credentials: &dyn CredentialStore,
    campaign: &Campaign,
) -> RustBulkResult<Vec<Sender>> {
    let accounts = store.get_accounts_for_campaign(campaign.id).await?;
    info!(
        campaign_id = campaign.id,
        accounts = accounts.len(),
        "Building sender pool"
    );

    let mut pool = Vec::new();
    for account in &accounts {
        let credential = match credentials.decrypt(&account.encrypted_credential) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(
                    account = account.name,
                    "Excluding account, credential decrypt failed: {}",
                    e.message()
                );
                continue;
            }
        };

        let users = store.get_active_users_for_account(account.id).await?;
        for user in users {
            if crate::validate_email!(&user.email).is_err() {
                warn!(user = user.email, "Skipping user with malformed address");
                continue;
            }
            if is_admin_address(
                &user.email,
                account.admin_email.as_deref(),
                user.full_name.as_deref(),
            ) {
                continue;
            }
            pool.push(Sender {
                account_id: account.id,
                user_id: user.id,
                principal_email: user.email,
                credential: credential.clone(),
                credential_blob: account.encrypted_credential.clone(),
            });
        }
    }

    if pool.is_empty() {
        return Err(raise_error!(
            format!(
                "No senders available for campaign {} after admin filtering",
                campaign.id
            ),
            ErrorCode::NoSendersAvailable
        ));
    }

    info!(
        campaign_id = campaign.id,
        senders = pool.len(),
        "Sender pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_admin_email_is_excluded() {
        assert!(is_admin_address(
            "Admin@Acme.Test",
            Some("admin@acme.test"),
            None
        ));
    }

    #[test]
    fn local_part_patterns_are_excluded() {
        for email in [
            "admin@x.test",
            "postmaster@x.test",
            "noreply@x.test",
            "do-not-reply@x.test",
            "bot_7@x.test",
            "test.account@x.test",
        ] {
            assert!(is_admin_address(email, None, None), "{email}");
        }
    }

    #[test]
    fn pattern_must_be_exact_or_separated() {
        // "bob" shares a prefix with nothing in the set; "botanic" is
        // not "bot." or "bot_" so it stays eligible.
        assert!(!is_admin_address("bob@x.test", None, None));
        assert!(!is_admin_address("botanic@x.test", None, None));
        assert!(!is_admin_address("alice@x.test", None, None));
    }

    #[test]
    fn display_name_tokens_are_excluded() {
        assert!(is_admin_address(
            "jane@x.test",
            None,
            Some("Jane (Support Desk)")
        ));
        assert!(!is_admin_address("jane@x.test", None, Some("Jane Doe")));
    }
}
