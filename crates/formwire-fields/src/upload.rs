#![forbid(unsafe_code)]

//! File upload fields with token-based staleness protection.
//!
//! Uploading is the one asynchronous step in a form. The field itself never
//! blocks; the host drives it:
//!
//! 1. [`UploadField::begin`] checks the size, clears the current attachment
//!    (the field is "not yet valid" while the upload runs) and issues a fresh
//!    [`UploadTicket`].
//! 2. The host runs an [`Uploader`], on a worker thread via [`spawn_upload`]
//!    or however it likes.
//! 3. [`UploadField::complete`] applies the result, but only if the ticket is
//!    still the latest one and the field is still mounted. Anything else is
//!    discarded, so a slow upload can never overwrite a newer choice or revive
//!    a removed field.
//!
//! Failures stay on the field (`upload_error`, `size_error`) and never reach
//! the bus as errors.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use formwire_core::{Bus, FieldValue, PublishReport, Scope};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::field::{Field, FieldError, FieldSpec};
use crate::kind::FieldKind;

/// Default size limit for one upload (64 MiB).
pub const DEFAULT_UPLOAD_MAX_BYTES: u64 = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Uploader collaborator
// ---------------------------------------------------------------------------

/// A file chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub size_bytes: u64,
    pub content_type: String,
}

impl UploadFile {
    /// A PDF of the given size.
    #[must_use]
    pub fn new(filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            size_bytes,
            content_type: "application/pdf".to_string(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// The file name without any directory components.
    #[must_use]
    pub fn base_name(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename)
    }
}

/// Where a stored file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub object_name: String,
    pub filename: String,
}

/// Why an upload did not produce a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    TooLarge { size_bytes: u64, limit: u64 },
    /// The storage backend refused or failed.
    Transport(String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size_bytes, limit } => {
                write!(f, "file is {size_bytes} bytes; the limit is {limit} bytes")
            }
            Self::Transport(message) => write!(f, "upload failed: {message}"),
        }
    }
}

impl std::error::Error for UploadError {}

/// Stores a file and returns its object name.
pub trait Uploader: Send + Sync {
    fn upload(&self, file: &UploadFile) -> Result<UploadReceipt, UploadError>;
}

/// In-memory uploader for tests and local development.
#[derive(Debug, Default)]
pub struct MockUploader {
    next: AtomicU64,
    failure: Option<String>,
}

impl MockUploader {
    /// Accepts every file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every upload with `reason`.
    #[must_use]
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            next: AtomicU64::new(0),
            failure: Some(reason.into()),
        }
    }
}

impl Uploader for MockUploader {
    fn upload(&self, file: &UploadFile) -> Result<UploadReceipt, UploadError> {
        if let Some(reason) = &self.failure {
            return Err(UploadError::Transport(reason.clone()));
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(UploadReceipt {
            object_name: format!("mock-object-{n}"),
            filename: file.base_name().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// Identifies one upload attempt. Later attempts get larger tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UploadTicket(u64);

impl UploadTicket {
    /// Create a ticket from a raw value (for testing).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// The result of one upload attempt, ready to hand back to its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCompletion {
    pub ticket: UploadTicket,
    pub result: Result<UploadReceipt, UploadError>,
}

/// Run `uploader` on a worker thread and send the completion to `sender`.
///
/// A dropped receiver is not an error: the form was torn down.
pub fn spawn_upload(
    uploader: Arc<dyn Uploader>,
    ticket: UploadTicket,
    file: UploadFile,
    sender: mpsc::Sender<UploadCompletion>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let result = uploader.upload(&file);
        if sender.send(UploadCompletion { ticket, result }).is_err() {
            debug!(ticket = ticket.raw(), "upload receiver dropped; discarding completion");
        }
    })
}

// ---------------------------------------------------------------------------
// UploadField
// ---------------------------------------------------------------------------

/// What [`UploadField::begin`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStart {
    Started(UploadTicket),
    /// Over the size limit; nothing to upload.
    TooLarge,
}

/// What [`UploadField::complete`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Attached,
    Failed,
    /// A newer upload superseded this one.
    Stale,
    /// The field was unmounted while the upload ran.
    Discarded,
}

#[derive(Debug)]
struct Pending {
    ticket: UploadTicket,
    started: Instant,
}

/// A leaf field of kind [`FieldKind::Upload`] plus upload bookkeeping.
#[derive(Debug)]
pub struct UploadField {
    field: Field,
    max_bytes: u64,
    last_ticket: u64,
    pending: Option<Pending>,
    receipt: Option<UploadReceipt>,
    upload_error: Option<String>,
    size_error: bool,
}

impl UploadField {
    /// Mount an upload field. `spec` must be of kind [`FieldKind::Upload`].
    pub fn mount(bus: &Bus, scope: &Scope, spec: FieldSpec) -> Result<Self, FieldError> {
        if spec.kind() != &FieldKind::Upload {
            return Err(FieldError::KindMismatch {
                field: spec.name().to_string(),
                kind: spec.kind().name(),
                operation: "mount an upload field from",
            });
        }
        Ok(Self {
            field: Field::mount(bus, scope, spec)?,
            max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            last_ticket: 0,
            pending: None,
            receipt: None,
            upload_error: None,
            size_error: false,
        })
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Start uploading `file`.
    pub fn begin(&mut self, file: &UploadFile) -> Result<UploadStart, FieldError> {
        self.upload_error = None;
        self.receipt = None;
        if file.size_bytes > self.max_bytes {
            self.size_error = true;
            self.pending = None;
            debug!(
                field = self.field.name(),
                size_bytes = file.size_bytes,
                limit = self.max_bytes,
                "upload rejected: file too large"
            );
            self.field.set_value(FieldValue::Empty)?;
            return Ok(UploadStart::TooLarge);
        }

        self.size_error = false;
        self.last_ticket += 1;
        let ticket = UploadTicket(self.last_ticket);
        self.pending = Some(Pending {
            ticket,
            started: Instant::now(),
        });
        debug!(
            field = self.field.name(),
            ticket = ticket.raw(),
            filename = %file.filename,
            "upload started"
        );
        self.field.set_value(FieldValue::Empty)?;
        Ok(UploadStart::Started(ticket))
    }

    /// Apply a finished upload.
    pub fn complete(&mut self, completion: UploadCompletion) -> Result<UploadOutcome, FieldError> {
        let current = self.pending.as_ref().map(|pending| pending.ticket);
        if current != Some(completion.ticket) {
            debug!(
                field = self.field.name(),
                ticket = completion.ticket.raw(),
                current = ?current.map(UploadTicket::raw),
                "discarding stale upload completion"
            );
            return Ok(UploadOutcome::Stale);
        }
        let Some(pending) = self.pending.take() else {
            return Ok(UploadOutcome::Stale);
        };

        if !self.field.is_mounted() {
            debug!(
                field = self.field.name(),
                ticket = completion.ticket.raw(),
                "discarding upload completion for unmounted field"
            );
            return Ok(UploadOutcome::Discarded);
        }

        let elapsed_ms = pending.started.elapsed().as_millis();
        match completion.result {
            Ok(receipt) => {
                info!(
                    field = self.field.name(),
                    object = %receipt.object_name,
                    elapsed_ms,
                    "upload attached"
                );
                self.field.set_value(receipt.object_name.clone())?;
                self.receipt = Some(receipt);
                Ok(UploadOutcome::Attached)
            }
            Err(err) => {
                warn!(field = self.field.name(), error = %err, elapsed_ms, "upload failed");
                self.size_error = matches!(err, UploadError::TooLarge { .. });
                self.upload_error = Some(err.to_string());
                Ok(UploadOutcome::Failed)
            }
        }
    }

    /// Drop the current attachment (and forget any upload in flight).
    pub fn remove_attachment(&mut self) -> Result<PublishReport, FieldError> {
        self.pending = None;
        self.receipt = None;
        self.upload_error = None;
        self.size_error = false;
        self.field.set_value(FieldValue::Empty)
    }

    #[must_use]
    pub fn field(&self) -> &Field {
        &self.field
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.field.valid()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn has_attachment(&self) -> bool {
        self.receipt.is_some()
    }

    #[must_use]
    pub fn receipt(&self) -> Option<&UploadReceipt> {
        self.receipt.as_ref()
    }

    #[must_use]
    pub fn upload_error(&self) -> Option<&str> {
        self.upload_error.as_deref()
    }

    #[must_use]
    pub fn size_error(&self) -> bool {
        self.size_error
    }

    pub fn retire(self) -> Result<PublishReport, FieldError> {
        self.field.retire()
    }
}
