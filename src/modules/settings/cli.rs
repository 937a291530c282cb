// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use clap::Parser;
use std::{path::PathBuf, sync::LazyLock};

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "rustbulk",
    about = "Campaign execution engine that prepares and dispatches bulk email
    across a pool of delegated workspace identities.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// rustbulk log level (default: "info")
    #[clap(
        long,
        default_value = "info",
        env,
        help = "Set the log level for rustbulk"
    )]
    pub rustbulk_log_level: String,

    /// Enable ANSI formatted logs (default: true)
    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub rustbulk_ansi_logs: bool,

    /// Enable log file output (default: false)
    /// If false, logs will be printed to stdout
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub rustbulk_log_to_file: bool,

    /// Enable JSON logs (default: false)
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable JSON formatted logs"
    )]
    pub rustbulk_json_logs: bool,

    /// Directory for rolling log files when file output is enabled
    #[clap(
        long,
        default_value = "./logs",
        env,
        help = "Set the directory that daily-rolling log files are written to"
    )]
    pub rustbulk_log_directory: PathBuf,

    /// Maximum number of rolled log files to retain (default: 5)
    #[clap(
        long,
        default_value = "5",
        env,
        help = "Set the maximum number of rolled log files to retain"
    )]
    pub rustbulk_max_log_files: usize,

    /// Redis connection URL backing the campaign task queue
    #[clap(
        long,
        default_value = "redis://127.0.0.1:6379/0",
        env,
        help = "Set the Redis URL backing the campaign task queue"
    )]
    pub rustbulk_redis_url: String,

    /// Password used to derive the AES key protecting stored credentials
    #[clap(
        long,
        default_value = "change-this-default-password-now",
        env,
        help = "Set the password protecting stored service-account credentials"
    )]
    pub rustbulk_encrypt_password: String,

    /// Upper bound on concurrent transport calls within one sender batch
    #[clap(
        long,
        default_value = "50",
        env,
        help = "Set the maximum number of parallel sends per sender batch"
    )]
    pub rustbulk_max_parallel_per_sender: usize,

    /// Delay applied inside each batch worker before calling the transport,
    /// letting operators smear load (default: 0, disabled)
    #[clap(
        long,
        default_value = "0",
        env,
        help = "Set the per-send micro delay in milliseconds"
    )]
    pub rustbulk_micro_delay_ms: u64,

    /// Number of task submissions between pause/cancel status polls
    #[clap(
        long,
        default_value = "10",
        env,
        help = "Set the number of submissions between campaign status polls"
    )]
    pub rustbulk_status_poll_interval: usize,

    /// Maximum entries retained in the per-campaign live log list
    #[clap(
        long,
        default_value = "5000",
        env,
        help = "Set the maximum number of live log entries retained per campaign"
    )]
    pub rustbulk_log_cap: i64,

    /// TTL applied to the per-campaign progress hash, in seconds
    #[clap(
        long,
        default_value = "86400",
        env,
        help = "Set the TTL of the campaign progress hash in seconds"
    )]
    pub rustbulk_progress_ttl_secs: u64,

    /// Default per-account daily sending limit
    #[clap(
        long,
        default_value = "2000",
        env,
        help = "Set the default per-account daily sending limit"
    )]
    pub rustbulk_daily_limit_default: u32,
}

impl Settings {
    #[cfg(test)]
    fn new_for_test() -> Self {
        Self {
            rustbulk_log_level: "info".to_string(),
            rustbulk_ansi_logs: false,
            rustbulk_json_logs: false,
            rustbulk_log_to_file: false,
            rustbulk_log_directory: "./logs".into(),
            rustbulk_max_log_files: 5,
            rustbulk_redis_url: "redis://127.0.0.1:6379/0".to_string(),
            rustbulk_encrypt_password: "change-this-default-password-now".into(),
            rustbulk_max_parallel_per_sender: 50,
            rustbulk_micro_delay_ms: 0,
            rustbulk_status_poll_interval: 10,
            rustbulk_log_cap: 5000,
            rustbulk_progress_ttl_secs: 86400,
            rustbulk_daily_limit_default: 2000,
        }
    }
}
