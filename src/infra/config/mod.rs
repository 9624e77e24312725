mod adapter;
mod app_config;
mod file_config;
mod loader;

pub use adapter::FileConfigAdapter;
pub use app_config::{
    AppConfig, AudienceConfig, BroadcastConfig, DirectoryConfig, EngineConfig, LogConfig,
    MessagesConfig,
};
pub use loader::load;
