use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` overrides `level`; with
/// a log file, output is appended there instead of stderr.
///
/// Returns `false` when a subscriber was already installed.
pub fn init(level: &str, file: Option<&Path>) -> std::io::Result<bool> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
                .is_ok()
        }
        None => builder.with_writer(std::io::stderr).try_init().is_ok(),
    };
    Ok(installed)
}
