#![forbid(unsafe_code)]

//! Optional `tracing` subscriber installation.
//!
//! Every formwire crate logs through `tracing` macros and never installs a
//! subscriber on its own. Hosts without one can call
//! [`LoggingConfig::from_env`] followed by [`LoggingConfig::try_init`].
//! Installation never clobbers an existing global subscriber.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `FORMWIRE_LOG` | `EnvFilter` directives | `info` |
//! | `FORMWIRE_LOG_FORMAT` | `json` for JSON lines, anything else for text | text |

use std::env;
use std::fmt;

use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "FORMWIRE_LOG";
pub const ENV_LOG_FORMAT: &str = "FORMWIRE_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Errors from installing the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    /// The filter directives do not parse.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    AlreadyInstalled,
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFilter(msg) => write!(f, "invalid log filter: {msg}"),
            Self::AlreadyInstalled => write!(f, "a global tracing subscriber is already installed"),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Formatting subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let filter = lookup(ENV_LOG)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json = lookup(ENV_LOG_FORMAT).is_some_and(|value| value.eq_ignore_ascii_case("json"));
        Self {
            filter,
            json,
            with_target: true,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    #[must_use]
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Parse the filter directives.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_new(&self.filter).map_err(|err| LoggingError::InvalidFilter(err.to_string()))
    }

    /// Install a global `fmt` subscriber.
    pub fn try_init(self) -> Result<(), LoggingError> {
        let filter = self.env_filter()?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(self.with_target);
        let installed = if self.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|_| LoggingError::AlreadyInstalled)?;
        tracing::debug!(filter = %self.filter, json = self.json, "logging installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info_text() {
        let config = LoggingConfig::from_lookup(|_| None);
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.filter, "info");
        assert!(!config.json);
    }

    #[test]
    fn reads_filter_and_format() {
        let config = LoggingConfig::from_lookup(|var| match var {
            ENV_LOG => Some("formwire_core=trace,warn".to_string()),
            ENV_LOG_FORMAT => Some("JSON".to_string()),
            _ => None,
        });
        assert_eq!(config.filter, "formwire_core=trace,warn");
        assert!(config.json);
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn bad_filter_is_reported() {
        let err = LoggingConfig::default()
            .with_filter("formwire_core=loud")
            .env_filter()
            .unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter(_)));
    }

    #[test]
    fn second_install_is_refused() {
        // Another test may have installed a subscriber first; the second
        // attempt here fails either way.
        let _ = LoggingConfig::default().try_init();
        assert_eq!(
            LoggingConfig::default().try_init(),
            Err(LoggingError::AlreadyInstalled)
        );
    }
}
