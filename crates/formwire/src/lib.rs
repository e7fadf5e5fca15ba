#![forbid(unsafe_code)]

//! formwire public facade crate.
//!
//! Fields announce their validity on a session bus; aggregators fold the
//! announcements into "can this form be submitted"; derived fields recompute
//! cross-field rules and announce like any other field. This crate re-exports
//! the common types and offers a prelude.

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use formwire_core::{
    AnnouncementKind, Bus, BusConfig, BusError, FieldAnnouncement, FieldKey, FieldValue,
    HandlerError, Outbox, PublishReport, Registration, Scope, ScopeId, Subscriber,
};

// --- Field re-exports ------------------------------------------------------

pub use formwire_fields::{
    DateParts, DependencyScope, DerivedField, DerivedRule, DerivedSpec, Evaluation, Field,
    FieldError, FieldKind, FieldSpec, FundingRule, Inputs, MockUploader, PeriodRule, TextFormat,
    TotalsRule, UploadCompletion, UploadError, UploadField, UploadFile, UploadOutcome,
    UploadStart, UploadTicket, Uploader,
};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use formwire_runtime::{
    Aggregator, AggregatorConfig, ConfigError, FormSession, LoggingConfig, LoggingError,
    ScopeMatch, SessionConfig, StepGate, StepGateError, StepOutcome, SubmitEvent,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for formwire hosts.
#[derive(Debug)]
pub enum Error {
    Bus(BusError),
    Field(FieldError),
    Upload(UploadError),
    #[cfg(feature = "runtime")]
    StepGate(StepGateError),
    #[cfg(feature = "runtime")]
    Config(ConfigError),
    #[cfg(feature = "runtime")]
    Logging(LoggingError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(err) => write!(f, "{err}"),
            Self::Field(err) => write!(f, "{err}"),
            Self::Upload(err) => write!(f, "{err}"),
            #[cfg(feature = "runtime")]
            Self::StepGate(err) => write!(f, "{err}"),
            #[cfg(feature = "runtime")]
            Self::Config(err) => write!(f, "{err}"),
            #[cfg(feature = "runtime")]
            Self::Logging(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(err) => Some(err),
            Self::Field(err) => Some(err),
            Self::Upload(err) => Some(err),
            #[cfg(feature = "runtime")]
            Self::StepGate(err) => Some(err),
            #[cfg(feature = "runtime")]
            Self::Config(err) => Some(err),
            #[cfg(feature = "runtime")]
            Self::Logging(err) => Some(err),
        }
    }
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl From<FieldError> for Error {
    fn from(err: FieldError) -> Self {
        Self::Field(err)
    }
}

impl From<UploadError> for Error {
    fn from(err: UploadError) -> Self {
        Self::Upload(err)
    }
}

#[cfg(feature = "runtime")]
impl From<StepGateError> for Error {
    fn from(err: StepGateError) -> Self {
        Self::StepGate(err)
    }
}

#[cfg(feature = "runtime")]
impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

#[cfg(feature = "runtime")]
impl From<LoggingError> for Error {
    fn from(err: LoggingError) -> Self {
        Self::Logging(err)
    }
}

/// Standard result type for formwire APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Bus, DerivedField, DerivedSpec, Error, Field, FieldKind, FieldSpec, FieldValue, Result,
        Scope, TextFormat,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{Aggregator, FormSession, SessionConfig, StepGate, StepOutcome, SubmitEvent};

    pub use crate::{core, fields};

    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use formwire_core as core;
pub use formwire_fields as fields;
#[cfg(feature = "runtime")]
pub use formwire_runtime as runtime;
