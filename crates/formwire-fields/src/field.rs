#![forbid(unsafe_code)]

//! Leaf fields.
//!
//! A [`Field`] owns one value, checks it against its kind's predicate (or a
//! custom [`Validator`]), and announces every change on the bus. It knows
//! nothing about the aggregators listening to it.
//!
//! # Validity
//!
//! ```text
//! valid = (optional && blank) || validator(value)
//! ```
//!
//! with one override: while the field still holds server-side errors from the
//! previous submission and the user has not edited it, it is invalid.
//!
//! # Lifecycle
//!
//! [`Field::mount`] announces `Mount`; each edit announces `Change`;
//! [`Field::retire`] (or dropping the field) announces `Unmount`.

use std::fmt;

use formwire_core::{
    AnnouncementKind, Bus, BusError, FieldAnnouncement, FieldKey, FieldValue, PublishReport, Scope,
};
use tracing::{debug, error, trace, warn};

use crate::date::DateParts;
use crate::kind::FieldKind;
use crate::mask::Unmask;
use crate::validators::{ValidationResult, Validator};

// ---------------------------------------------------------------------------
// FieldError
// ---------------------------------------------------------------------------

/// Errors from mounting or editing a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The bus rejected an announcement (duplicate name, cycle guard).
    Bus(BusError),
    /// An edit that does not apply to this field's kind, e.g. toggling a date.
    KindMismatch {
        field: String,
        kind: &'static str,
        operation: &'static str,
    },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(err) => write!(f, "{err}"),
            Self::KindMismatch {
                field,
                kind,
                operation,
            } => write!(f, "cannot {operation} field `{field}` of kind {kind}"),
        }
    }
}

impl std::error::Error for FieldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(err) => Some(err),
            Self::KindMismatch { .. } => None,
        }
    }
}

impl From<BusError> for FieldError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// Host-supplied attributes of a field, consumed by [`Field::mount`].
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    initial: Option<FieldValue>,
    optional: bool,
    watch: bool,
    validator: Option<Box<dyn Validator<FieldValue>>>,
    unmask: Option<Box<dyn Unmask>>,
    initial_errors: Vec<String>,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("initial", &self.initial)
            .field("optional", &self.optional)
            .field("watch", &self.watch)
            .field("custom_validator", &self.validator.is_some())
            .field("initial_errors", &self.initial_errors)
            .finish()
    }
}

impl FieldSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            initial: None,
            optional: false,
            watch: false,
            validator: None,
            unmask: None,
            initial_errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_initial(mut self, value: impl Into<FieldValue>) -> Self {
        self.initial = Some(value.into());
        self
    }

    /// Accept an empty value as valid.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Make this field's announcements visible to every aggregator.
    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Replace the kind's default validity predicate.
    #[must_use]
    pub fn with_validator(mut self, validator: impl Validator<FieldValue> + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Replace the kind's default unmasking for [`Field::set_text`].
    #[must_use]
    pub fn with_unmask(mut self, unmask: impl Unmask + 'static) -> Self {
        self.unmask = Some(Box::new(unmask));
        self
    }

    /// Server-side errors from a previous submission.
    #[must_use]
    pub fn with_initial_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initial_errors = errors.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// A mounted leaf field.
pub struct Field {
    bus: Bus,
    scope: Scope,
    name: String,
    kind: FieldKind,
    value: FieldValue,
    optional: bool,
    watch: bool,
    validator: Option<Box<dyn Validator<FieldValue>>>,
    unmask: Option<Box<dyn Unmask>>,
    server_errors: Vec<String>,
    modified: bool,
    result: ValidationResult,
    valid: bool,
    show_error: bool,
    show_valid: bool,
    retired: bool,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("valid", &self.valid)
            .field("optional", &self.optional)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

impl Field {
    /// Create the field inside `scope` and announce it.
    ///
    /// Fails with [`BusError::DuplicateField`] if `scope` already has a field
    /// of the same name; nothing is announced in that case.
    pub fn mount(bus: &Bus, scope: &Scope, spec: FieldSpec) -> Result<Self, FieldError> {
        if bus.is_mounted(scope.id(), &spec.name) {
            error!(field = %spec.name, scope = %scope, "field name already mounted in scope");
            return Err(FieldError::Bus(BusError::DuplicateField {
                name: spec.name,
                scope: scope.id(),
            }));
        }

        let value = spec.initial.unwrap_or_else(|| spec.kind.empty_value());
        let mut field = Self {
            bus: bus.clone(),
            scope: scope.clone(),
            name: spec.name,
            kind: spec.kind,
            value,
            optional: spec.optional,
            watch: spec.watch,
            validator: spec.validator,
            unmask: spec.unmask,
            server_errors: spec.initial_errors,
            modified: false,
            result: ValidationResult::Valid,
            valid: false,
            show_error: false,
            show_valid: false,
            retired: false,
        };
        field.evaluate();
        field.show_error =
            !field.server_errors.is_empty() || (!field.is_blank() && !field.valid);

        debug!(
            field = %field.name,
            scope = %field.scope,
            kind = field.kind.name(),
            valid = field.valid,
            optional = field.optional,
            "mounting field"
        );
        field.announce(AnnouncementKind::Mount)?;
        Ok(field)
    }

    fn is_blank(&self) -> bool {
        self.kind.is_blank(&self.value)
    }

    fn evaluate(&mut self) {
        self.result = match &self.validator {
            Some(validator) => validator.validate(&self.value),
            None => self.kind.validate(&self.value),
        };
        self.valid = if !self.server_errors.is_empty() && !self.modified {
            false
        } else {
            (self.optional && self.is_blank()) || self.result.is_valid()
        };
    }

    fn announce(&self, kind: AnnouncementKind) -> Result<PublishReport, FieldError> {
        let announcement = match kind {
            AnnouncementKind::Mount => FieldAnnouncement::mount(&*self.name, self.scope.clone()),
            AnnouncementKind::Change => FieldAnnouncement::change(&*self.name, self.scope.clone()),
            AnnouncementKind::Unmount => {
                FieldAnnouncement::unmount(&*self.name, self.scope.clone())
            }
        }
        .with_value(self.value.clone())
        .with_valid(self.valid)
        .with_optional(self.optional)
        .with_watch(self.watch)
        .with_edited(kind == AnnouncementKind::Change && self.modified);
        Ok(self.bus.publish(announcement)?)
    }

    fn mismatch(&self, operation: &'static str) -> FieldError {
        FieldError::KindMismatch {
            field: self.name.clone(),
            kind: self.kind.name(),
            operation,
        }
    }

    // -- Editing --

    /// Replace the value, re-check validity, and announce the change.
    pub fn set_value(&mut self, value: impl Into<FieldValue>) -> Result<PublishReport, FieldError> {
        self.value = value.into();
        self.modified = true;
        self.evaluate();
        if self.valid {
            self.show_error = false;
        }
        self.show_valid = self.valid && !self.is_blank();
        trace!(field = %self.name, value = %self.value, valid = self.valid, "field edited");
        self.announce(AnnouncementKind::Change)
    }

    /// Set the value from typed text, removing display formatting first.
    pub fn set_text(&mut self, raw: &str) -> Result<PublishReport, FieldError> {
        let unmasked = match (&self.unmask, self.kind.default_unmask()) {
            (Some(unmask), _) => unmask.unmask(raw),
            (None, Some(strip)) => strip.unmask(raw),
            (None, None) => raw.to_string(),
        };
        let value = self.kind.parse_text(&unmasked);
        self.set_value(value)
    }

    /// Flip a checkbox.
    pub fn toggle(&mut self) -> Result<PublishReport, FieldError> {
        if self.kind != FieldKind::Checkbox {
            return Err(self.mismatch("toggle"));
        }
        let checked = self.value.as_bool().unwrap_or(false);
        self.set_value(!checked)
    }

    /// Pick one option of an options field.
    pub fn choose(&mut self, option: &str) -> Result<PublishReport, FieldError> {
        if !matches!(self.kind, FieldKind::Options { .. }) {
            return Err(self.mismatch("choose"));
        }
        self.set_value(option)
    }

    /// Add `option` to a multi-select field's selection.
    pub fn select(&mut self, option: &str) -> Result<PublishReport, FieldError> {
        if !matches!(self.kind, FieldKind::MultiSelect { .. }) {
            return Err(self.mismatch("select"));
        }
        let mut selected = self.value.as_list().map(<[String]>::to_vec).unwrap_or_default();
        if !selected.iter().any(|s| s == option) {
            selected.push(option.to_string());
        }
        self.set_value(selected)
    }

    /// Remove `option` from a multi-select field's selection.
    pub fn deselect(&mut self, option: &str) -> Result<PublishReport, FieldError> {
        if !matches!(self.kind, FieldKind::MultiSelect { .. }) {
            return Err(self.mismatch("deselect"));
        }
        let mut selected = self.value.as_list().map(<[String]>::to_vec).unwrap_or_default();
        selected.retain(|s| s != option);
        self.set_value(selected)
    }

    /// Set a date field from separately typed parts.
    ///
    /// Incomplete or impossible dates are kept as text and fail validation.
    pub fn set_date_parts(&mut self, parts: DateParts) -> Result<PublishReport, FieldError> {
        if !matches!(self.kind, FieldKind::Date { .. }) {
            return Err(self.mismatch("set date parts on"));
        }
        let value = match parts.to_date() {
            Some(date) => FieldValue::Date(date),
            None if parts.is_blank() => FieldValue::Empty,
            None => FieldValue::Text(parts.to_string()),
        };
        self.set_value(value)
    }

    /// The user left the field: show the error if it is invalid.
    pub fn blur(&mut self) -> Result<PublishReport, FieldError> {
        self.evaluate();
        self.show_error = !self.valid;
        self.show_valid = self.valid && !self.is_blank();
        self.announce(AnnouncementKind::Change)
    }

    /// Remove the field, announcing `Unmount`.
    pub fn retire(mut self) -> Result<PublishReport, FieldError> {
        self.retired = true;
        debug!(field = %self.name, scope = %self.scope, "retiring field");
        self.announce(AnnouncementKind::Unmount)
    }

    // -- Accessors --

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.scope.id(), self.name.clone())
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    #[must_use]
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    #[must_use]
    pub fn is_watch(&self) -> bool {
        self.watch
    }

    /// Returns `false` once the field, or the registration owning its scope,
    /// has been retired.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        !self.retired && self.bus.is_mounted(self.scope.id(), &self.name)
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[must_use]
    pub fn show_error(&self) -> bool {
        self.show_error
    }

    #[must_use]
    pub fn show_valid(&self) -> bool {
        self.show_valid
    }

    #[must_use]
    pub fn validation(&self) -> &ValidationResult {
        &self.result
    }

    /// The message to display, if the error is showing.
    ///
    /// Unedited server errors take precedence over the validator's message.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if !self.show_error {
            return None;
        }
        if !self.server_errors.is_empty() && !self.modified {
            return Some(self.server_errors.join(" "));
        }
        Some(
            self.result
                .error_message()
                .unwrap_or_else(|| self.kind.error_message().to_string()),
        )
    }
}

impl Drop for Field {
    fn drop(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        if let Err(err) = self.announce(AnnouncementKind::Unmount) {
            warn!(field = %self.name, error = %err, "failed to unmount dropped field");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::TextFormat;
    use crate::validators::FnValidator;
    use formwire_core::{HandlerError, Outbox};
    use std::cell::RefCell;
    use std::rc::Rc;
    use time::macros::date;
    use tracing_test::traced_test;

    fn capture(bus: &Bus) -> Rc<RefCell<Vec<FieldAnnouncement>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.subscribe(
            move |a: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> {
                sink.borrow_mut().push(a.clone());
                Ok(())
            },
        );
        seen
    }

    #[test]
    fn mount_announces_initial_validity() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let seen = capture(&bus);

        let field = Field::mount(
            &bus,
            &scope,
            FieldSpec::new("number", FieldKind::Text(TextFormat::Digits)).with_initial("0001"),
        )
        .unwrap();

        assert!(field.valid());
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, AnnouncementKind::Mount);
        assert!(seen[0].valid);
        assert_eq!(seen[0].value, FieldValue::from("0001"));
    }

    #[test]
    fn optional_blank_is_valid_but_bad_value_is_not() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut field = Field::mount(
            &bus,
            &scope,
            FieldSpec::new("email", FieldKind::Text(TextFormat::Email)).optional(true),
        )
        .unwrap();
        assert!(field.valid());

        field.set_text("not-an-email").unwrap();
        assert!(!field.valid());

        field.set_text("").unwrap();
        assert!(field.valid());
    }

    #[test]
    fn edits_announce_changes_with_watch_flag() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut field = Field::mount(
            &bus,
            &scope,
            FieldSpec::new("amount", FieldKind::Dollars).watch(true),
        )
        .unwrap();
        let seen = capture(&bus);

        field.set_text("$1,500").unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, AnnouncementKind::Change);
        assert!(seen[0].watch);
        assert!(seen[0].valid);
        assert_eq!(seen[0].value, FieldValue::Number(1500.0));
    }

    #[test]
    fn blur_shows_error_only_when_invalid() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut field =
            Field::mount(&bus, &scope, FieldSpec::new("title", FieldKind::Text(TextFormat::Anything)))
                .unwrap();
        assert!(!field.show_error());

        field.set_text("   ").unwrap();
        assert!(!field.show_error());
        field.blur().unwrap();
        assert!(field.show_error());
        assert_eq!(field.error_message().as_deref(), Some("Please enter a response"));

        field.set_text("Cloud migration").unwrap();
        assert!(!field.show_error());
        assert!(field.show_valid());
        assert_eq!(field.error_message(), None);
    }

    #[test]
    fn server_errors_hold_until_edited() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut field = Field::mount(
            &bus,
            &scope,
            FieldSpec::new("number", FieldKind::Text(TextFormat::Digits))
                .with_initial("123")
                .with_initial_errors(["Number already in use."]),
        )
        .unwrap();

        assert!(!field.valid());
        assert!(field.show_error());
        assert_eq!(field.error_message().as_deref(), Some("Number already in use."));

        field.set_text("124").unwrap();
        assert!(field.valid());
        assert_eq!(field.error_message(), None);
    }

    #[test]
    fn checkbox_toggle_and_mismatch() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut agree = Field::mount(&bus, &scope, FieldSpec::new("agree", FieldKind::Checkbox)).unwrap();
        assert!(!agree.valid());
        agree.toggle().unwrap();
        assert!(agree.valid());

        let err = agree.choose("x").unwrap_err();
        assert_eq!(err.to_string(), "cannot choose field `agree` of kind checkbox");
    }

    #[test]
    fn options_and_multi_select() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut service = Field::mount(
            &bus,
            &scope,
            FieldSpec::new(
                "service",
                FieldKind::Options {
                    options: vec!["".into(), "army".into()],
                    null_option: Some(String::new()),
                },
            ),
        )
        .unwrap();
        service.choose("army").unwrap();
        assert!(service.valid());

        let mut envs = Field::mount(
            &bus,
            &scope,
            FieldSpec::new("environments", FieldKind::multi_select(["dev", "prod"])),
        )
        .unwrap();
        envs.select("dev").unwrap();
        envs.select("dev").unwrap();
        assert_eq!(envs.value(), &FieldValue::List(vec!["dev".into()]));
        assert!(envs.valid());
        envs.deselect("dev").unwrap();
        assert!(!envs.valid());
    }

    #[test]
    fn date_parts_feed_date_field() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut start = Field::mount(
            &bus,
            &scope,
            FieldSpec::new(
                "start_date",
                FieldKind::date_between(Some(date!(2019 - 01 - 01)), None),
            ),
        )
        .unwrap();

        start
            .set_date_parts(DateParts::new(Some(2), Some(30), Some(2020)))
            .unwrap();
        assert!(!start.valid());
        assert_eq!(start.value(), &FieldValue::from("02/30/2020"));

        start
            .set_date_parts(DateParts::new(Some(2), Some(29), Some(2020)))
            .unwrap();
        assert!(start.valid());
        assert_eq!(start.value().as_date(), Some(date!(2020 - 02 - 29)));
    }

    #[test]
    fn custom_validator_replaces_kind_default() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let mut field = Field::mount(
            &bus,
            &scope,
            FieldSpec::new("code", FieldKind::Text(TextFormat::Anything)).with_validator(
                FnValidator::new("Must start with TO", |v: &FieldValue| {
                    v.as_text().is_some_and(|t| t.starts_with("TO"))
                }),
            ),
        )
        .unwrap();
        field.set_text("ABC").unwrap();
        assert!(!field.valid());
        field.set_text("TO-123").unwrap();
        assert!(field.valid());
    }

    #[test]
    #[traced_test]
    fn duplicate_name_is_rejected_without_announcing() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let _first = Field::mount(&bus, &scope, FieldSpec::new("number", FieldKind::Checkbox)).unwrap();
        let seen = capture(&bus);

        let err = Field::mount(&bus, &scope, FieldSpec::new("number", FieldKind::Checkbox)).unwrap_err();

        assert_eq!(
            err,
            FieldError::Bus(BusError::DuplicateField {
                name: "number".into(),
                scope: scope.id()
            })
        );
        assert!(seen.borrow().is_empty());
        assert!(logs_contain("field name already mounted in scope"));
    }

    #[test]
    fn retire_and_drop_unmount() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let a = Field::mount(&bus, &scope, FieldSpec::new("a", FieldKind::Checkbox)).unwrap();
        let b = Field::mount(&bus, &scope, FieldSpec::new("b", FieldKind::Checkbox)).unwrap();
        let seen = capture(&bus);

        a.retire().unwrap();
        drop(b);

        let kinds: Vec<_> = seen.borrow().iter().map(|x| (x.kind, x.name.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (AnnouncementKind::Unmount, "a".to_string()),
                (AnnouncementKind::Unmount, "b".to_string())
            ]
        );
        assert_eq!(bus.mounted_count(), 0);
    }
}
