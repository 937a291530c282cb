// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod account;
pub mod campaign;
pub mod common;
pub mod context;
pub mod error;
pub mod logger;
pub mod queue;
pub mod render;
pub mod sender;
pub mod settings;
pub mod store;
pub mod transport;
pub mod utils;
