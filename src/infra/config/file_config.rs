use std::path::PathBuf;

use serde::Deserialize;

use crate::infra::config::{
    AppConfig, AudienceConfig, BroadcastConfig, DirectoryConfig, EngineConfig, LogConfig,
    MessagesConfig,
};

/// On-disk shape of the config: every section and key is optional and
/// overrides the default only when present.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub engine: Option<FileEngineConfig>,
    pub messages: Option<FileMessagesConfig>,
    pub broadcast: Option<FileBroadcastConfig>,
    pub audience: Option<FileAudienceConfig>,
    pub directory: Option<FileDirectoryConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(engine) = self.engine {
            engine.merge_into(&mut config.engine);
        }

        if let Some(messages) = self.messages {
            messages.merge_into(&mut config.messages);
        }

        if let Some(broadcast) = self.broadcast {
            broadcast.merge_into(&mut config.broadcast);
        }

        if let Some(audience) = self.audience {
            audience.merge_into(&mut config.audience);
        }

        if let Some(directory) = self.directory {
            directory.merge_into(&mut config.directory);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }

        if let Some(file) = self.file {
            config.file = Some(file);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileEngineConfig {
    pub lock_timeout_ms: Option<u64>,
}

impl FileEngineConfig {
    fn merge_into(self, config: &mut EngineConfig) {
        if let Some(timeout_ms) = self.lock_timeout_ms {
            config.lock_timeout_ms = timeout_ms;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileMessagesConfig {
    pub max_text_chars: Option<usize>,
}

impl FileMessagesConfig {
    fn merge_into(self, config: &mut MessagesConfig) {
        if let Some(max_text_chars) = self.max_text_chars {
            config.max_text_chars = max_text_chars;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileBroadcastConfig {
    pub max_concurrent_sends: Option<usize>,
    pub max_send_attempts: Option<u32>,
    pub tick_interval_ms: Option<u64>,
}

impl FileBroadcastConfig {
    fn merge_into(self, config: &mut BroadcastConfig) {
        if let Some(sends) = self.max_concurrent_sends {
            config.max_concurrent_sends = sends;
        }

        if let Some(attempts) = self.max_send_attempts {
            config.max_send_attempts = attempts;
        }

        if let Some(tick_ms) = self.tick_interval_ms {
            config.tick_interval_ms = tick_ms;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileAudienceConfig {
    pub active_window_days: Option<u32>,
    pub new_customer_window_days: Option<u32>,
}

impl FileAudienceConfig {
    fn merge_into(self, config: &mut AudienceConfig) {
        if let Some(days) = self.active_window_days {
            config.active_window_days = days;
        }

        if let Some(days) = self.new_customer_window_days {
            config.new_customer_window_days = days;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDirectoryConfig {
    pub customers_file: Option<PathBuf>,
}

impl FileDirectoryConfig {
    fn merge_into(self, config: &mut DirectoryConfig) {
        if let Some(path) = self.customers_file {
            config.customers_file = Some(path);
        }
    }
}
