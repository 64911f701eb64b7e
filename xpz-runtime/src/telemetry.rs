//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use xpz_core::config::GeneralConfig;
use xpz_core::error::{Result, XpzError};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `general.log_level`. `general.log_format = "json"`
/// switches to JSON lines.
///
/// # Errors
///
/// Returns `XpzError::Config` if the filter does not parse or a subscriber
/// is already installed.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            XpzError::Config(format!("invalid log level {:?}: {e}", config.log_level))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| XpzError::Config(format!("tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_an_error_not_a_panic() {
        let config = GeneralConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
