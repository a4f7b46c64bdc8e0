//! Process-wide logger bootstrap.
//!
//! Logs go to stderr unless a directory is given, in which case they rotate through
//! files there and warnings are still echoed to stderr.

use std::path::Path;

use anyhow::{Context, Result};
use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::info;

const LOG_FILE_BASENAME: &str = "echoalarm";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;

/// Keep the returned handle alive for as long as logs should be written.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<LoggerHandle> {
    let logger = Logger::try_with_str(level)
        .with_context(|| format!("invalid log level '{level}'"))?;

    let handle = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("unable to create log directory {}", dir.display()))?;
            logger
                .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_files(flexi_logger::detailed_format)
                .start()
                .context("failed to start file logger")?
        }
        None => logger
            .log_to_stderr()
            .start()
            .context("failed to start stderr logger")?,
    };

    info!(
        "event=app_start module=logging status=ok platform={} version={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}
