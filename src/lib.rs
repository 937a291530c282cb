// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Bulk-email dispatch engine driving outbound campaigns through a pool
//! of delegated workspace identities.
//!
//! The crate is consumed by an outer API layer: construct
//! [`modules::context::CoreServices`] once at startup, wrap it in a
//! [`modules::campaign::engine::CampaignEngine`], then drive campaigns
//! through `prepare_campaign` / `resume_campaign` / `control_campaign`.

pub mod modules;
