#![forbid(unsafe_code)]

//! Field kinds for formwire.
//!
//! # Role in formwire
//! `formwire-fields` holds everything that announces itself on the bus:
//! leaf [`Field`]s of every [`FieldKind`], [`DerivedField`]s whose validity is
//! computed from other fields, and the [`UploadField`] wrapper for the one
//! asynchronous input.
//!
//! # Primary responsibilities
//! - **Validation**: [`validators`] and the per-kind predicates in [`kind`].
//! - **Input cleanup**: [`mask`] strips display formatting before parsing.
//! - **Cross-field rules**: [`derived`], with ready-made rules in [`period`]
//!   and [`funding`].
//! - **Uploads**: [`upload`] with ticket-based staleness.

pub mod date;
pub mod derived;
pub mod field;
pub mod funding;
pub mod kind;
pub mod mask;
pub mod period;
pub mod upload;
pub mod validators;

pub use date::{DateParts, days_in_month};
pub use derived::{
    DependencyScope, DerivedField, DerivedRule, DerivedSpec, Evaluation, Inputs, Observed,
};
pub use field::{Field, FieldError, FieldSpec};
pub use funding::{FundingRule, TotalsRule, percent_label};
pub use kind::{FieldKind, MAX_DOLLARS, TextFormat};
pub use mask::{StripChars, Unmask};
pub use period::{PeriodRule, PeriodViolation, display_date};
pub use upload::{
    DEFAULT_UPLOAD_MAX_BYTES, MockUploader, UploadCompletion, UploadError, UploadField,
    UploadFile, UploadOutcome, UploadReceipt, UploadStart, UploadTicket, Uploader, spawn_upload,
};
pub use validators::{ValidationError, ValidationResult, Validator};
