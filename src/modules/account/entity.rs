// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A credentialed workspace identity able to impersonate the users of
/// its domain for mail sending.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Account {
    /// Unique account identifier
    pub id: u64,
    /// Display name shown in progress breakdowns
    pub name: String,
    /// The service identity's own address
    pub client_email: String,
    /// Workspace domain the account belongs to
    pub domain: Option<String>,
    /// Impersonation principal for directory reads; also the anchor of
    /// the admin-exclusion filter, so it never appears in a sender pool
    pub admin_email: Option<String>,
    /// Encrypted service-account key blob. Decrypted material is held
    /// in memory only, for the duration of a prepare run or one batch.
    pub encrypted_credential: String,
    /// Maximum messages this account may send per local day
    pub daily_limit: u32,
    /// Messages sent so far today
    pub daily_sent: u32,
    /// Local date the daily counter was last reset on
    pub daily_reset_date: NaiveDate,
    /// Lifetime sent counter, rolled up at each daily reset
    pub total_sent_all_time: u64,
    /// Creation timestamp (UNIX epoch milliseconds)
    pub created_at: i64,
    /// Last update timestamp (UNIX epoch milliseconds)
    pub updated_at: i64,
}

impl Account {
    pub fn remaining_today(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_sent)
    }
}

/// A member of an [`Account`]'s domain, usable as a sending principal.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct WorkspaceUser {
    /// Unique user identifier
    pub id: u64,
    /// Owning account
    pub account_id: u64,
    /// Primary address, used as the impersonated sender
    pub email: String,
    /// Display name from the directory
    pub full_name: Option<String>,
    /// Suspended users are never added to a sender pool
    pub is_active: bool,
    /// Advisory per-user soft quota
    pub quota_limit: u32,
    /// Messages attributed to this user today
    pub emails_sent_today: u32,
    /// Last time this user sent on behalf of a campaign (epoch millis)
    pub last_used: Option<i64>,
    /// Creation timestamp (UNIX epoch milliseconds)
    pub created_at: i64,
}
