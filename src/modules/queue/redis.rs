// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cmd;
use std::collections::HashMap;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;

/// Production queue backend over a shared Redis connection manager.
/// The manager transparently reconnects, so one handle is cloned per
/// command instead of pooling raw connections.
#[derive(Clone)]
pub struct RedisQueueBackend {
    conn: ConnectionManager,
}

impl RedisQueueBackend {
    pub async fn connect() -> RustBulkResult<Self> {
        Self::connect_url(&SETTINGS.rustbulk_redis_url).await
    }

    pub async fn connect_url(url: &str) -> RustBulkResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            raise_error!(
                format!("Invalid Redis URL '{url}': {e}"),
                ErrorCode::RedisConnectionFailed
            )
        })?;
        let conn = client.get_connection_manager().await.map_err(|e| {
            raise_error!(
                format!("Failed to connect to Redis at '{url}': {e}"),
                ErrorCode::RedisConnectionFailed
            )
        })?;
        Ok(Self { conn })
    }

    fn command_error(e: redis::RedisError) -> crate::modules::error::RustBulkError {
        raise_error!(
            format!("Redis command failed: {e}"),
            ErrorCode::RedisCommandFailed
        )
    }
}

#[async_trait]
impl super::QueueBackend for RedisQueueBackend {
    async fn rpush(&self, key: &str, value: String) -> RustBulkResult<()> {
        let mut conn = self.conn.clone();
        cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn lpop(&self, key: &str) -> RustBulkResult<Option<String>> {
        let mut conn = self.conn.clone();
        cmd("LPOP")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn llen(&self, key: &str) -> RustBulkResult<i64> {
        let mut conn = self.conn.clone();
        cmd("LLEN")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> RustBulkResult<Vec<String>> {
        let mut conn = self.conn.clone();
        cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> RustBulkResult<()> {
        let mut conn = self.conn.clone();
        cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn del(&self, key: &str) -> RustBulkResult<()> {
        let mut conn = self.conn.clone();
        cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> RustBulkResult<()> {
        let mut conn = self.conn.clone();
        let mut command = cmd("HSET");
        command.arg(key);
        for (field, value) in fields {
            command.arg(field).arg(value);
        }
        command
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn hgetall(&self, key: &str) -> RustBulkResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        cmd("HGETALL")
            .arg(key)
            .query_async::<HashMap<String, String>>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> RustBulkResult<i64> {
        let mut conn = self.conn.clone();
        cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(Self::command_error)
    }

    async fn expire(&self, key: &str, seconds: u64) -> RustBulkResult<()> {
        let mut conn = self.conn.clone();
        cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(Self::command_error)
    }
}
