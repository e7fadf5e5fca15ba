#![forbid(unsafe_code)]

//! The closed set of leaf field kinds.
//!
//! A [`FieldKind`] decides three things for a field: what "no answer" looks
//! like, how typed text becomes a [`FieldValue`], and the default validity
//! predicate.

use std::fmt;

use formwire_core::FieldValue;
use time::Date;

use crate::date::within_exclusive;
use crate::mask::StripChars;
use crate::validators::{
    Digits, ERROR_CODE_DATE, ERROR_CODE_OPTION, ERROR_CODE_RANGE, ERROR_CODE_REQUIRED,
    ERROR_CODE_TYPE, Email, Numeric, Required, Url, ValidationError, ValidationResult, Validator,
};

/// Largest dollar amount a field accepts.
pub const MAX_DOLLARS: f64 = 1_000_000_000.0;

// ---------------------------------------------------------------------------
// TextFormat
// ---------------------------------------------------------------------------

/// Pattern a free-text field must match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFormat {
    /// Any non-blank text.
    #[default]
    Anything,
    Digits,
    /// Optional sign, digits, optional fraction.
    Numbers,
    Email,
    Url,
}

impl TextFormat {
    #[must_use]
    pub fn validate(self, text: &str) -> ValidationResult {
        match self {
            Self::Anything => Required.validate(text),
            Self::Digits => Digits.validate(text),
            Self::Numbers => Numeric.validate(text),
            Self::Email => Email.validate(text),
            Self::Url => Url.validate(text),
        }
    }

    #[must_use]
    pub fn error_message(self) -> &'static str {
        match self {
            Self::Anything => "Please enter a response",
            Self::Digits => "Please enter digits only",
            Self::Numbers => "Please enter a number",
            Self::Email => "Please enter a valid email address",
            Self::Url => "Please enter a complete URL",
        }
    }
}

// ---------------------------------------------------------------------------
// FieldKind
// ---------------------------------------------------------------------------

/// What sort of input a leaf field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Valid when checked.
    Checkbox,
    Text(TextFormat),
    /// A dollar amount in `0..=1_000_000_000`; `$` and `,` are unmasked.
    Dollars,
    /// Exactly one of `options`. Choosing `null_option` (a "please select"
    /// placeholder) counts as invalid.
    Options {
        options: Vec<String>,
        null_option: Option<String>,
    },
    /// A calendar date strictly between the optional bounds.
    Date { min: Option<Date>, max: Option<Date> },
    /// An uploaded attachment, identified by its object name.
    Upload,
    /// One or more of `options`.
    MultiSelect { options: Vec<String> },
}

impl FieldKind {
    /// Single-choice options without a placeholder.
    #[must_use]
    pub fn options<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Options {
            options: options.into_iter().map(Into::into).collect(),
            null_option: None,
        }
    }

    #[must_use]
    pub fn multi_select<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MultiSelect {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn date_between(min: Option<Date>, max: Option<Date>) -> Self {
        Self::Date { min, max }
    }

    /// Short kind name for logging and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Text(_) => "text",
            Self::Dollars => "dollars",
            Self::Options { .. } => "options",
            Self::Date { .. } => "date",
            Self::Upload => "upload",
            Self::MultiSelect { .. } => "multi_select",
        }
    }

    /// The value a freshly created field holds when no initial value is given.
    #[must_use]
    pub fn empty_value(&self) -> FieldValue {
        match self {
            Self::Checkbox => FieldValue::Bool(false),
            Self::MultiSelect { .. } => FieldValue::List(Vec::new()),
            _ => FieldValue::Empty,
        }
    }

    /// Returns `true` if `value` means "no answer" for this kind.
    ///
    /// An unchecked checkbox is blank; so is an empty string or list.
    #[must_use]
    pub fn is_blank(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Self::Checkbox, FieldValue::Bool(checked)) => !checked,
            (Self::Text(_), FieldValue::Text(text)) => text.trim().is_empty(),
            _ => value.is_empty(),
        }
    }

    /// Default unmasking applied by [`Field::set_text`](crate::field::Field::set_text).
    #[must_use]
    pub fn default_unmask(&self) -> Option<StripChars> {
        match self {
            Self::Dollars => Some(StripChars::dollars()),
            _ => None,
        }
    }

    /// Convert already-unmasked text into this kind's value.
    ///
    /// Text that does not parse is kept as text so the validator can reject it.
    #[must_use]
    pub fn parse_text(&self, text: &str) -> FieldValue {
        let trimmed = text.trim();
        match self {
            Self::Dollars => {
                if trimmed.is_empty() {
                    FieldValue::Empty
                } else if Numeric.validate(trimmed).is_valid() {
                    trimmed
                        .parse::<f64>()
                        .map_or_else(|_| FieldValue::from(trimmed), FieldValue::Number)
                } else {
                    FieldValue::from(trimmed)
                }
            }
            Self::Date { .. } => {
                if trimmed.is_empty() {
                    return FieldValue::Empty;
                }
                let format = time::macros::format_description!("[year]-[month]-[day]");
                Date::parse(trimmed, &format)
                    .map_or_else(|_| FieldValue::from(trimmed), FieldValue::Date)
            }
            Self::Checkbox => FieldValue::Bool(matches!(trimmed, "true" | "on" | "1" | "y")),
            Self::MultiSelect { .. } => FieldValue::List(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            Self::Text(_) | Self::Options { .. } | Self::Upload => FieldValue::from(text),
        }
    }

    /// Default error message shown for an invalid value.
    #[must_use]
    pub fn error_message(&self) -> &'static str {
        match self {
            Self::Checkbox => "Please check this box",
            Self::Text(format) => format.error_message(),
            Self::Dollars => "Please enter a dollar amount between $0 and $1,000,000,000",
            Self::Options { .. } => "Please select an option",
            Self::Date { .. } => "Please enter a valid date",
            Self::Upload => "Please upload a file",
            Self::MultiSelect { .. } => "Please select at least one option",
        }
    }

    fn type_error(&self, value: &FieldValue) -> ValidationResult {
        ValidationResult::Invalid(
            ValidationError::new(ERROR_CODE_TYPE, "{kind} field cannot hold a {actual} value")
                .with_param("kind", self.name())
                .with_param("actual", value.type_name()),
        )
    }

    /// The kind's intrinsic validity predicate.
    #[must_use]
    pub fn validate(&self, value: &FieldValue) -> ValidationResult {
        match (self, value) {
            (Self::Checkbox, FieldValue::Bool(true)) => ValidationResult::Valid,
            (Self::Checkbox, FieldValue::Bool(false) | FieldValue::Empty) => {
                ValidationResult::invalid(ERROR_CODE_OPTION, self.error_message())
            }
            (Self::Text(format), FieldValue::Text(text)) => format.validate(text),
            (Self::Text(format), FieldValue::Empty) => format.validate(""),
            (Self::Dollars, FieldValue::Number(amount)) => {
                if (0.0..=MAX_DOLLARS).contains(amount) {
                    ValidationResult::Valid
                } else {
                    ValidationResult::Invalid(
                        ValidationError::new(ERROR_CODE_RANGE, self.error_message())
                            .with_param("actual", amount),
                    )
                }
            }
            (Self::Dollars, FieldValue::Empty | FieldValue::Text(_)) => {
                ValidationResult::invalid(ERROR_CODE_RANGE, self.error_message())
            }
            (
                Self::Options {
                    options,
                    null_option,
                },
                FieldValue::Text(choice),
            ) => {
                if null_option.as_deref() == Some(choice.as_str()) || !options.contains(choice) {
                    ValidationResult::invalid(ERROR_CODE_OPTION, self.error_message())
                } else {
                    ValidationResult::Valid
                }
            }
            (Self::Options { .. }, FieldValue::Empty) => {
                ValidationResult::invalid(ERROR_CODE_OPTION, self.error_message())
            }
            (Self::Date { min, max }, FieldValue::Date(date)) => {
                if within_exclusive(*date, *min, *max) {
                    ValidationResult::Valid
                } else {
                    ValidationResult::invalid(ERROR_CODE_DATE, "Date is outside the allowed range")
                }
            }
            (Self::Date { .. }, FieldValue::Empty | FieldValue::Text(_)) => {
                ValidationResult::invalid(ERROR_CODE_DATE, self.error_message())
            }
            (Self::Upload, FieldValue::Text(object_name)) if !object_name.is_empty() => {
                ValidationResult::Valid
            }
            (Self::Upload, FieldValue::Text(_) | FieldValue::Empty) => {
                ValidationResult::invalid(ERROR_CODE_REQUIRED, self.error_message())
            }
            (Self::MultiSelect { options }, FieldValue::List(selected)) => {
                if selected.is_empty() {
                    ValidationResult::invalid(ERROR_CODE_OPTION, self.error_message())
                } else if let Some(unknown) = selected.iter().find(|s| !options.contains(*s)) {
                    ValidationResult::Invalid(
                        ValidationError::new(ERROR_CODE_OPTION, "Unknown option {option}")
                            .with_param("option", unknown),
                    )
                } else {
                    ValidationResult::Valid
                }
            }
            (Self::MultiSelect { .. }, FieldValue::Empty) => {
                ValidationResult::invalid(ERROR_CODE_OPTION, self.error_message())
            }
            (_, other) => self.type_error(other),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
