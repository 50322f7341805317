use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_subscriber::{fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_FILE_NAME;
use crate::error::{AppError, Result};

/// Sends tracing output to `<data_dir>/streamchat.log`.
///
/// The terminal belongs to the UI, so nothing is written to stdout/stderr.
/// Level comes from `RUST_LOG` (default `info`).
pub fn init(data_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join(LOG_FILE_NAME);
    let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
    install(Arc::new(log_file))?;
    Ok(log_path)
}

/// Logs to stderr; for runs that never take over the terminal.
pub fn init_stderr() -> Result<()> {
    install(io::stderr)
}

fn install<W>(writer: W) -> Result<()>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|err| AppError::Io(io::Error::new(io::ErrorKind::Other, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = init(dir.path()).unwrap();
        assert_eq!(log_path, dir.path().join(LOG_FILE_NAME));

        tracing::warn!("written to the log file");
        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("written to the log file"));

        // A second subscriber is refused instead of replacing the first
        assert!(matches!(init_stderr(), Err(AppError::Io(_))));
    }
}
