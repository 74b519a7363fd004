use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "./logs/fileindex.log";

/// Splits the log file path into the appender directory and file name.
fn log_location() -> (PathBuf, PathBuf) {
    let path = PathBuf::from(
        env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string()),
    );
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("fileindex.log"));
    (dir, file)
}

/// Installs stdout and file logging. The returned guard flushes the file
/// writer on drop and has to live until the end of `main`.
pub fn init_logger() -> impl Drop {
    let level = env::var("TRACING_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_dir, log_file) = log_location();
    let _ = fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::never(&log_dir, &log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    info!(
        "Logging at {} to stdout and {}",
        level,
        log_dir.join(&log_file).display()
    );

    guard
}
