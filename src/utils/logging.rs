use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{Error, Result};

/// Install the process-wide subscriber. `RUST_LOG` overrides `level`; when
/// `log_file` is set, output goes there instead of stderr.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("bad log level {level:?}: {e}")))?;

    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .compact();

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
