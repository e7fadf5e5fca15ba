#![forbid(unsafe_code)]

//! The one message shape carried by the bus.
//!
//! A [`FieldAnnouncement`] tells every subscriber that a field exists
//! ([`AnnouncementKind::Mount`]), that its value or validity moved
//! ([`AnnouncementKind::Change`]), or that it left the tree
//! ([`AnnouncementKind::Unmount`]).
//!
//! # Optional vs. valid
//!
//! The two flags are never inferred from the value. Aggregators combine them
//! with a single rule, exposed as [`FieldAnnouncement::counts_as_valid`]:
//!
//! - on `Mount`: `optional || valid`
//! - on `Change`: `valid` (the field already folded its optionality into it)

use std::fmt;

use time::Date;

use crate::scope::{Scope, ScopeId};

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// The logical (unmasked) value held by a field.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    /// Nothing entered yet.
    #[default]
    Empty,
    Bool(bool),
    Text(String),
    Number(f64),
    Date(Date),
    List(Vec<String>),
}

impl FieldValue {
    /// Returns `true` for "no answer": `Empty`, an empty string, or an empty list.
    ///
    /// `Bool(false)` is an answer, not an absence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Bool(_) | Self::Number(_) | Self::Date(_) => false,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<Date> {
        match self {
            Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short variant name for logging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Date(_) => "date",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<Date> for FieldValue {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Number(value) => write!(f, "{value}"),
            Self::Date(value) => write!(f, "{value}"),
            Self::List(items) => f.write_str(&items.join(",")),
        }
    }
}

// ---------------------------------------------------------------------------
// AnnouncementKind / FieldKey
// ---------------------------------------------------------------------------

/// Lifecycle stage an announcement reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnnouncementKind {
    Mount,
    Change,
    Unmount,
}

impl AnnouncementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Change => "change",
            Self::Unmount => "unmount",
        }
    }
}

impl fmt::Display for AnnouncementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one field: its name within its owning scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldKey {
    pub scope: ScopeId,
    pub name: String,
}

impl FieldKey {
    #[must_use]
    pub fn new(scope: ScopeId, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.raw(), self.name)
    }
}

// ---------------------------------------------------------------------------
// FieldAnnouncement
// ---------------------------------------------------------------------------

/// A field's report about itself.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldAnnouncement {
    pub kind: AnnouncementKind,
    /// Unique within `scope`, not globally.
    pub name: String,
    pub value: FieldValue,
    /// Whether the field's own value currently satisfies its constraint.
    pub valid: bool,
    /// Whether an empty value is itself acceptable.
    pub optional: bool,
    /// Nearest container owning the field.
    pub scope: Scope,
    /// Relevant to every aggregator regardless of scope.
    pub watch: bool,
    /// The announcement follows from a user edit. Only edited `Change`s mark
    /// a form as changed; recomputation triggered by a mount does not.
    #[cfg_attr(feature = "serde", serde(default))]
    pub edited: bool,
}

impl FieldAnnouncement {
    fn new(kind: AnnouncementKind, name: impl Into<String>, scope: Scope) -> Self {
        Self {
            kind,
            name: name.into(),
            value: FieldValue::Empty,
            valid: false,
            optional: false,
            scope,
            watch: false,
            edited: kind == AnnouncementKind::Change,
        }
    }

    #[must_use]
    pub fn mount(name: impl Into<String>, scope: Scope) -> Self {
        Self::new(AnnouncementKind::Mount, name, scope)
    }

    #[must_use]
    pub fn change(name: impl Into<String>, scope: Scope) -> Self {
        Self::new(AnnouncementKind::Change, name, scope)
    }

    #[must_use]
    pub fn unmount(name: impl Into<String>, scope: Scope) -> Self {
        Self::new(AnnouncementKind::Unmount, name, scope)
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = value.into();
        self
    }

    #[must_use]
    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    #[must_use]
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    #[must_use]
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn with_edited(mut self, edited: bool) -> Self {
        self.edited = edited;
        self
    }

    /// The key this announcement is about.
    #[must_use]
    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.scope.id(), self.name.clone())
    }

    /// The validity an aggregator should record for this announcement.
    #[must_use]
    pub fn counts_as_valid(&self) -> bool {
        match self.kind {
            AnnouncementKind::Mount => self.optional || self.valid,
            AnnouncementKind::Change | AnnouncementKind::Unmount => self.valid,
        }
    }
}

impl fmt::Display for FieldAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{} valid={}",
            self.kind, self.name, self.scope, self.valid
        )?;
        if self.optional {
            f.write_str(" optional")?;
        }
        if self.watch {
            f.write_str(" watch")?;
        }
        if self.kind == AnnouncementKind::Change && !self.edited {
            f.write_str(" settled")?;
        }
        Ok(())
    }
}
