// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod batch;
pub mod control;
pub mod dispatch;
pub mod engine;
pub mod entity;
pub mod planner;
pub mod prepare;
pub mod progress;

#[cfg(test)]
mod tests;
