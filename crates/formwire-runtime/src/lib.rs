#![forbid(unsafe_code)]

//! Form-level runtime for formwire.
//!
//! # Role in formwire
//! `formwire-runtime` sits on top of the bus and fields. It turns a stream of
//! field announcements into form-level decisions: whether the form can be
//! saved, whether a wizard may move to its next step, whether a submit goes
//! through.
//!
//! # Primary responsibilities
//! - **Aggregation**: [`Aggregator`] tracks per-field validity for one
//!   container.
//! - **Wizards**: [`StepGate`] guards a step cursor with an aggregator.
//! - **Sessions**: [`FormSession`] owns the bus and applies [`SessionConfig`].
//! - **Logging**: [`LoggingConfig`] installs a `tracing-subscriber` formatter
//!   when the host has none.

pub mod aggregator;
pub mod config;
pub mod logging;
pub mod session;
pub mod step_gate;
pub mod submit;

pub use aggregator::{AggregateSnapshot, Aggregator, AggregatorConfig, FieldRecord, ScopeMatch};
pub use config::{ConfigError, SessionConfig};
pub use logging::{LoggingConfig, LoggingError};
pub use session::FormSession;
pub use step_gate::{StepGate, StepGateError, StepOutcome};
pub use submit::SubmitEvent;
