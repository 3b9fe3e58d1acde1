use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ForgeConfig;

/// Initializes file + console logging under `~/.tokenforge/logs`.
/// Returns a guard that must be kept alive for the duration of the run.
pub fn init_logging(level: &str) -> Result<WorkerGuard> {
    let logs_dir = ForgeConfig::logs_dir()?;
    init_logging_to_dir(&logs_dir, &default_filter(level))
}

/// Default directive set: the given level for dependencies, one notch more
/// verbose for our own crates when the level is `info`.
pub fn default_filter(level: &str) -> String {
    if level.eq_ignore_ascii_case("info") {
        "info,forge_chain=debug,forge_app=debug".to_string()
    } else {
        level.to_string()
    }
}

/// Initialize logging to a custom directory with a custom filter.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    // File appender: daily rotation
    let file_appender = tracing_appender::rolling::daily(logs_dir, "tokenforge");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_to_dir_creates_directory() {
        let tmp = tempfile::tempdir().expect("Failed to create tempdir");
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());

        // Only the first subscriber per process installs; the directory is
        // created either way.
        let result = init_logging_to_dir(&logs_dir, "warn");
        assert!(logs_dir.exists());
        if let Err(e) = result {
            assert!(e.to_string().contains("logging"), "unexpected error: {e}");
        }
    }

    #[test]
    fn default_filter_raises_own_crates_at_info() {
        assert!(default_filter("info").contains("forge_chain=debug"));
        assert_eq!(default_filter("warn"), "warn");
    }
}
