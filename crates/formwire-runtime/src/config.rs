#![forbid(unsafe_code)]

//! Session configuration.
//!
//! # Env var contract
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `FORMWIRE_MAX_PUBLISH_DEPTH` | republish depth guard | `32` |
//! | `FORMWIRE_MAX_DELIVERIES` | handler calls per drain | `10000` |
//! | `FORMWIRE_TRACE` | record a bus trace (`1`, `true`, `yes`, `on`) | off |
//! | `FORMWIRE_CONTRACT_START_DATE` | earliest period start (`YYYY-MM-DD`) | unset |
//! | `FORMWIRE_CONTRACT_END_DATE` | latest period end (`YYYY-MM-DD`) | unset |
//! | `FORMWIRE_UPLOAD_MAX_BYTES` | upload size limit | 64 MiB |
//!
//! Unset or empty variables fall back to the default. Malformed values are
//! rejected with a [`ConfigError`] naming the variable.

use std::env;
use std::fmt;

use formwire_core::{BusConfig, DEFAULT_MAX_DELIVERIES, DEFAULT_MAX_DEPTH};
use formwire_fields::DEFAULT_UPLOAD_MAX_BYTES;
use time::Date;
use time::macros::format_description;

pub const ENV_MAX_PUBLISH_DEPTH: &str = "FORMWIRE_MAX_PUBLISH_DEPTH";
pub const ENV_MAX_DELIVERIES: &str = "FORMWIRE_MAX_DELIVERIES";
pub const ENV_TRACE: &str = "FORMWIRE_TRACE";
pub const ENV_CONTRACT_START_DATE: &str = "FORMWIRE_CONTRACT_START_DATE";
pub const ENV_CONTRACT_END_DATE: &str = "FORMWIRE_CONTRACT_END_DATE";
pub const ENV_UPLOAD_MAX_BYTES: &str = "FORMWIRE_UPLOAD_MAX_BYTES";

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    /// The contract period ends before it starts.
    InvertedContractPeriod { start: Date, end: Date },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid {
                var,
                value,
                expected,
            } => write!(f, "{var}={value:?} is invalid: expected {expected}"),
            Self::InvertedContractPeriod { start, end } => {
                write!(f, "contract period ends ({end}) before it starts ({start})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings for one [`FormSession`](crate::FormSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_publish_depth: usize,
    pub max_deliveries: usize,
    pub record_trace: bool,
    /// Floor for period-of-performance rules.
    pub contract_start: Option<Date>,
    /// Ceiling for period-of-performance rules.
    pub contract_end: Option<Date>,
    pub upload_max_bytes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_publish_depth: DEFAULT_MAX_DEPTH,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            record_trace: false,
            contract_start: None,
            contract_end: None,
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
        }
    }
}

impl SessionConfig {
    /// Read the `FORMWIRE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            max_publish_depth: match get(ENV_MAX_PUBLISH_DEPTH) {
                Some(value) => parse_count(ENV_MAX_PUBLISH_DEPTH, &value)?,
                None => defaults.max_publish_depth,
            },
            max_deliveries: match get(ENV_MAX_DELIVERIES) {
                Some(value) => parse_count(ENV_MAX_DELIVERIES, &value)?,
                None => defaults.max_deliveries,
            },
            record_trace: match get(ENV_TRACE) {
                Some(value) => parse_flag(ENV_TRACE, &value)?,
                None => defaults.record_trace,
            },
            contract_start: get(ENV_CONTRACT_START_DATE)
                .map(|value| parse_date(ENV_CONTRACT_START_DATE, &value))
                .transpose()?,
            contract_end: get(ENV_CONTRACT_END_DATE)
                .map(|value| parse_date(ENV_CONTRACT_END_DATE, &value))
                .transpose()?,
            upload_max_bytes: match get(ENV_UPLOAD_MAX_BYTES) {
                Some(value) => parse_count(ENV_UPLOAD_MAX_BYTES, &value)?,
                None => defaults.upload_max_bytes,
            },
        };
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if let (Some(start), Some(end)) = (self.contract_start, self.contract_end)
            && end < start
        {
            return Err(ConfigError::InvertedContractPeriod { start, end });
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_max_publish_depth(mut self, depth: usize) -> Self {
        self.max_publish_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_deliveries(mut self, deliveries: usize) -> Self {
        self.max_deliveries = deliveries;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, record_trace: bool) -> Self {
        self.record_trace = record_trace;
        self
    }

    #[must_use]
    pub fn with_contract_period(mut self, start: Option<Date>, end: Option<Date>) -> Self {
        self.contract_start = start;
        self.contract_end = end;
        self
    }

    #[must_use]
    pub fn with_upload_max_bytes(mut self, max_bytes: u64) -> Self {
        self.upload_max_bytes = max_bytes;
        self
    }

    /// The bus settings this session uses.
    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        BusConfig::default()
            .with_max_depth(self.max_publish_depth)
            .with_max_deliveries(self.max_deliveries)
            .with_trace(self.record_trace)
    }
}

fn parse_count<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            expected: "a boolean (1/0, true/false, yes/no, on/off)",
        }),
    }
}

fn parse_date(var: &'static str, value: &str) -> Result<Date, ConfigError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(value.trim(), &format).map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected: "a date as YYYY-MM-DD",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use time::macros::date;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.max_publish_depth, 32);
        assert_eq!(config.max_deliveries, 10_000);
        assert_eq!(config.upload_max_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn reads_every_variable() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENV_MAX_PUBLISH_DEPTH, "8"),
            (ENV_MAX_DELIVERIES, "500"),
            (ENV_TRACE, "TRUE"),
            (ENV_CONTRACT_START_DATE, "2019-01-01"),
            (ENV_CONTRACT_END_DATE, "2022-01-01"),
            (ENV_UPLOAD_MAX_BYTES, "1024"),
        ]))
        .unwrap();
        assert_eq!(config.max_publish_depth, 8);
        assert_eq!(config.max_deliveries, 500);
        assert!(config.record_trace);
        assert_eq!(config.contract_start, Some(date!(2019 - 01 - 01)));
        assert_eq!(config.contract_end, Some(date!(2022 - 01 - 01)));
        assert_eq!(config.upload_max_bytes, 1024);

        let bus = config.bus_config();
        assert_eq!(bus.max_depth, 8);
        assert!(bus.record_trace);
    }

    #[test]
    fn empty_values_use_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[(ENV_MAX_DELIVERIES, "  ")])).unwrap();
        assert_eq!(config.max_deliveries, DEFAULT_MAX_DELIVERIES);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = SessionConfig::from_lookup(lookup(&[(ENV_MAX_PUBLISH_DEPTH, "deep")])).unwrap_err();
        assert!(err.to_string().starts_with("FORMWIRE_MAX_PUBLISH_DEPTH="));

        let err =
            SessionConfig::from_lookup(lookup(&[(ENV_CONTRACT_END_DATE, "01/01/2022")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: ENV_CONTRACT_END_DATE,
                ..
            }
        ));

        let err = SessionConfig::from_lookup(lookup(&[(ENV_TRACE, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_TRACE, .. }));
    }

    #[test]
    fn inverted_contract_period_is_rejected() {
        let err = SessionConfig::from_lookup(lookup(&[
            (ENV_CONTRACT_START_DATE, "2022-01-01"),
            (ENV_CONTRACT_END_DATE, "2019-01-01"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvertedContractPeriod {
                start: date!(2022 - 01 - 01),
                end: date!(2019 - 01 - 01),
            }
        );
    }
}
