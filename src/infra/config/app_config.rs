use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::infra::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub engine: EngineConfig,
    pub messages: MessagesConfig,
    pub broadcast: BroadcastConfig,
    pub audience: AudienceConfig,
    pub directory: DirectoryConfig,
}

impl AppConfig {
    /// Rejects values the engine cannot run with, naming the offending key.
    pub fn validate(&self) -> Result<(), AppError> {
        let checks = [
            ("engine.lock_timeout_ms", self.engine.lock_timeout_ms == 0),
            ("messages.max_text_chars", self.messages.max_text_chars == 0),
            (
                "broadcast.max_concurrent_sends",
                self.broadcast.max_concurrent_sends == 0,
            ),
            (
                "broadcast.max_send_attempts",
                self.broadcast.max_send_attempts == 0,
            ),
            ("broadcast.tick_interval_ms", self.broadcast.tick_interval_ms == 0),
            ("audience.active_window_days", self.audience.active_window_days == 0),
            (
                "audience.new_customer_window_days",
                self.audience.new_customer_window_days == 0,
            ),
        ];

        match checks.into_iter().find(|(_, is_zero)| *is_zero) {
            Some((key, _)) => Err(AppError::ConfigInvalid {
                key,
                reason: "must be greater than zero".to_owned(),
            }),
            None if self.logging.level.trim().is_empty() => Err(AppError::ConfigInvalid {
                key: "logging.level",
                reason: "must not be empty".to_owned(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub lock_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagesConfig {
    pub max_text_chars: usize,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 4_096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub max_concurrent_sends: usize,
    pub max_send_attempts: u32,
    pub tick_interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 4,
            max_send_attempts: 3,
            tick_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudienceConfig {
    pub active_window_days: u32,
    pub new_customer_window_days: u32,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            active_window_days: 30,
            new_customer_window_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DirectoryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customers_file: Option<PathBuf>,
}
