//! Tracing subscriber setup for binaries and embedders.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber described by `config`. Logs go to stderr.
///
/// The filter comes from `config.level` (an `EnvFilter` directive); an unparsable directive
/// falls back to `info`. Calling this more than once is harmless: later calls leave the
/// first subscriber in place and return `false`.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        let config = LogConfig {
            level: "not a [valid directive".to_string(),
            format: LogFormat::Text,
        };
        init_tracing(&config);
        assert!(!init_tracing(&LogConfig::default()));
    }
}
