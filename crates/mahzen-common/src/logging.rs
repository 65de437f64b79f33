use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

fn filter_for(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global fmt subscriber on stderr. `RUST_LOG` wins over the
/// configured level. Calling it twice is harmless.
pub fn init(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(log_level))
        .with_target(false)
        .try_init();
}

/// Like [`init`], but also appends every line to `log_file`.
///
/// Falls back to stderr-only logging when the file cannot be opened.
pub fn init_with_file(log_level: &str, log_file: &Path) {
    if let Some(parent) = log_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => file,
        Err(err) => {
            init(log_level);
            tracing::warn!("log file {} unavailable: {err}", log_file.display());
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(log_level))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr.and(Mutex::new(file)))
        .try_init();
}
