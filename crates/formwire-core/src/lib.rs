#![forbid(unsafe_code)]

//! Core: field announcements, container scopes, and the session bus.
//!
//! Leaf fields publish [`FieldAnnouncement`]s on a [`Bus`]; aggregators and
//! derived fields subscribe to it. Everything above this crate is built from
//! those two pieces.

pub mod announcement;
pub mod bus;
pub mod error;
pub mod scope;
pub mod trace;

pub use announcement::{AnnouncementKind, FieldAnnouncement, FieldKey, FieldValue};
pub use bus::{
    Bus, BusConfig, DEFAULT_MAX_DELIVERIES, DEFAULT_MAX_DEPTH, Outbox, PublishReport,
    Registration, SubId, Subscriber,
};
pub use error::{BusError, HandlerError};
pub use scope::{Scope, ScopeId};
pub use trace::{BusEvent, BusTrace, DropReason};
