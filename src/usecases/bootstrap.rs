use std::{path::Path, sync::Arc};

use crate::{
    engine::SystemClock,
    infra::{
        self,
        config::{AppConfig, FileConfigAdapter},
        contracts::ConfigAdapter,
        directory_file::FileCustomerDirectory,
        error::AppError,
        stubs::{InMemoryCustomerDirectory, LoopbackTransport},
    },
    usecases::{
        context::AppContext,
        contracts::CustomerDirectory,
        inbox::{EngineSettings, Inbox},
    },
};

const DIRECTORY_NOT_CONFIGURED: &str = "INBOX_DIRECTORY_NOT_CONFIGURED";

pub fn bootstrap(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    let config = load_config(&FileConfigAdapter::new(config_path))?;
    let log_guard = infra::logging::init(&config.logging)?;

    Ok(AppContext::new(config, log_guard))
}

fn load_config(adapter: &dyn ConfigAdapter) -> Result<AppConfig, AppError> {
    adapter.load()
}

/// Wires an engine against the configured customer directory and the
/// loopback transport.
pub fn compose_inbox(context: &AppContext) -> Inbox {
    Inbox::new(
        EngineSettings::from_config(&context.config),
        customer_directory(&context.config),
        Arc::new(LoopbackTransport),
        Arc::new(SystemClock),
    )
}

fn customer_directory(config: &AppConfig) -> Arc<dyn CustomerDirectory> {
    match config.directory.customers_file.as_deref() {
        Some(path) => Arc::new(FileCustomerDirectory::new(path)),
        None => {
            tracing::warn!(
                code = DIRECTORY_NOT_CONFIGURED,
                "no customer directory configured; audiences will be empty"
            );
            Arc::new(InMemoryCustomerDirectory::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{
        domain::audience::AudienceSegment,
        infra::stubs::StubConfigAdapter,
    };

    #[test]
    fn loads_defaults_when_file_is_missing() {
        let config = load_config(&FileConfigAdapter::new(Some(Path::new(
            "./missing-config.toml",
        ))))
        .expect("config should load from defaults");

        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn accepts_any_config_adapter() {
        let config = load_config(&StubConfigAdapter).expect("stub config");

        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn composed_inbox_reads_configured_directory() {
        let mut file = tempfile::NamedTempFile::new().expect("temp directory");
        writeln!(
            file,
            "[[customers]]\nid = \"c1\"\ndisplay_name = \"John Doe\"\ncreated_at = \"2020-01-01T00:00:00Z\"\n\n\
             [[customers]]\nid = \"c2\"\ndisplay_name = \"Jane Roe\"\ncreated_at = \"2020-01-01T00:00:00Z\"\nopted_out = true"
        )
        .expect("write directory");
        let mut config = AppConfig::default();
        config.directory.customers_file = Some(file.path().to_path_buf());

        let inbox = compose_inbox(&AppContext::new(config, None));

        assert_eq!(inbox.estimate_reach(AudienceSegment::All), Ok(1));
    }

    #[test]
    fn composed_inbox_without_directory_has_empty_audience() {
        let inbox = compose_inbox(&AppContext::new(AppConfig::default(), None));

        assert_eq!(inbox.estimate_reach(AudienceSegment::All), Ok(0));
    }
}
