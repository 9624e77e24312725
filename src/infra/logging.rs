use std::{fs, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::infra::{config::LogConfig, error::AppError};

/// Installs the global subscriber. With a log file configured, events go to
/// a non-blocking writer whose guard must be held until shutdown.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>, AppError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let Some(path) = config.file.as_deref() else {
        builder.try_init().map_err(AppError::LoggingInit)?;
        return Ok(None);
    };

    let (directory, file_name) = split_log_path(path)?;
    fs::create_dir_all(directory).map_err(|source| AppError::LogFile {
        path: path.to_path_buf(),
        source,
    })?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    builder
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(AppError::LoggingInit)?;
    Ok(Some(guard))
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr), AppError> {
    let file_name = path.file_name().ok_or_else(|| AppError::ConfigInvalid {
        key: "logging.file",
        reason: format!("{} does not name a file", path.display()),
    })?;
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((directory, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_file_name_logs_to_working_directory() {
        let (directory, file_name) = split_log_path(Path::new("inbox.log")).expect("split");

        assert_eq!(directory, Path::new("."));
        assert_eq!(file_name, "inbox.log");
    }

    #[test]
    fn nested_path_is_split_into_directory_and_file() {
        let (directory, file_name) =
            split_log_path(Path::new("/var/log/inbox/engine.log")).expect("split");

        assert_eq!(directory, Path::new("/var/log/inbox"));
        assert_eq!(file_name, "engine.log");
    }

    #[test]
    fn directory_only_path_is_rejected() {
        assert!(matches!(
            split_log_path(Path::new("/")),
            Err(AppError::ConfigInvalid {
                key: "logging.file",
                ..
            })
        ));
    }
}
