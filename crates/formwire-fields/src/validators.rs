#![forbid(unsafe_code)]

//! Validation results and the built-in validators used by field kinds.

use std::collections::HashMap;
use std::fmt;

use formwire_core::FieldValue;

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------

/// Blank where an answer is needed.
pub const ERROR_CODE_REQUIRED: &str = "required";
/// Non-digit characters in a digits-only field.
pub const ERROR_CODE_DIGITS: &str = "digits";
/// Text that is not a decimal number.
pub const ERROR_CODE_NUMBER: &str = "number";
/// Not an email address.
pub const ERROR_CODE_EMAIL: &str = "email";
/// Not a web address.
pub const ERROR_CODE_URL: &str = "url";
/// Number outside its allowed bounds.
pub const ERROR_CODE_RANGE: &str = "range";
/// Error code for a value of the wrong shape (e.g. text where a date belongs).
pub const ERROR_CODE_TYPE: &str = "type";
/// Error code for a choice outside the allowed options.
pub const ERROR_CODE_OPTION: &str = "option";
/// Error code for an invalid or out-of-bounds date.
pub const ERROR_CODE_DATE: &str = "date";

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Why a value was rejected: a stable code plus a message template whose
/// `{key}` placeholders are filled from `params`.
///
/// ```rust
/// use formwire_fields::validators::ValidationError;
///
/// let error = ValidationError::new("range", "Please enter a value from {min} to {max}")
///     .with_param("min", 0)
///     .with_param("max", 10);
///
/// assert_eq!(error.format_message(), "Please enter a value from 0 to 10");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// One of the `ERROR_CODE_*` constants.
    pub code: &'static str,
    /// Message template.
    pub message: String,
    /// Parameters substituted into `{key}` placeholders.
    pub params: HashMap<String, String>,
}

impl ValidationError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            params: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// The message with every `{key}` replaced by its parameter.
    #[must_use]
    pub fn format_message(&self) -> String {
        let mut result = self.message.clone();
        for (key, value) in &self.params {
            result = result.replace(&format!("{{{key}}}"), value);
        }
        result
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_message())
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// Verdict of one validator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationResult {
    #[default]
    Valid,
    Invalid(ValidationError),
}

impl ValidationResult {
    /// Shorthand for `Invalid(ValidationError::new(code, message))`.
    #[must_use]
    pub fn invalid(code: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid(ValidationError::new(code, message))
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            Self::Valid => None,
            Self::Invalid(e) => Some(e),
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error().map(ValidationError::format_message)
    }

    /// `self` if it is an error, otherwise `other`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::Valid => other,
            Self::Invalid(_) => self,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Judges values of type `T`.
///
/// Field kinds validate [`FieldValue`]s; the text formats validate `str`.
/// [`OnText`] bridges the two.
pub trait Validator<T: ?Sized>: Send + Sync {
    fn validate(&self, value: &T) -> ValidationResult;

    /// Message shown when the validator rejects a value.
    fn error_message(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Text Validators
// ---------------------------------------------------------------------------

/// Validates that a string has at least one non-whitespace character.
#[derive(Debug, Clone, Copy, Default)]
pub struct Required;

impl Validator<str> for Required {
    fn validate(&self, value: &str) -> ValidationResult {
        if value.trim().is_empty() {
            ValidationResult::invalid(ERROR_CODE_REQUIRED, "Please enter a response")
        } else {
            ValidationResult::Valid
        }
    }

    fn error_message(&self) -> &str {
        "Please enter a response"
    }
}

/// Validates that a string consists only of ASCII digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Digits;

impl Validator<str> for Digits {
    fn validate(&self, value: &str) -> ValidationResult {
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(ERROR_CODE_DIGITS, "Please enter digits only")
        }
    }

    fn error_message(&self) -> &str {
        "Please enter digits only"
    }
}

/// Validates a plain decimal number: optional `-`, digits, optional fraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Numeric;

impl Numeric {
    fn matches(value: &str) -> bool {
        let unsigned = value.strip_prefix('-').unwrap_or(value);
        let (whole, fraction) = match unsigned.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (unsigned, ""),
        };
        !whole.is_empty()
            && whole.bytes().all(|b| b.is_ascii_digit())
            && fraction.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Validator<str> for Numeric {
    fn validate(&self, value: &str) -> ValidationResult {
        if Self::matches(value) {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(ERROR_CODE_NUMBER, "Please enter a number")
        }
    }

    fn error_message(&self) -> &str {
        "Please enter a number"
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Word runs joined by single `.` or `-` separators (`a.b-c`, not `a..b`).
fn is_dotted_words(value: &str) -> bool {
    !value.is_empty()
        && value
            .split(['.', '-'])
            .all(|part| !part.is_empty() && part.chars().all(is_word_char))
}

/// Validates that a string looks like an email address.
///
/// Heuristic: word-character local part, `@`, a dotted domain whose last label
/// has two or three word characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Email;

impl Validator<str> for Email {
    fn validate(&self, value: &str) -> ValidationResult {
        let invalid = || {
            ValidationResult::invalid(ERROR_CODE_EMAIL, "Please enter a valid email address")
        };

        let Some((local, domain)) = value.split_once('@') else {
            return invalid();
        };
        if !is_dotted_words(local) || !is_dotted_words(domain) {
            return invalid();
        }
        let Some((_, tld)) = domain.rsplit_once('.') else {
            return invalid();
        };
        if !(2..=3).contains(&tld.len()) {
            return invalid();
        }
        ValidationResult::Valid
    }

    fn error_message(&self) -> &str {
        "Please enter a valid email address"
    }
}

/// Validates that a string looks like a web address.
///
/// The scheme is optional; the host must contain a dot and no empty labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Url;

impl Url {
    fn is_url_char(c: char) -> bool {
        is_word_char(c) || "-._~:/?#[]@!$&'()*+,;=%".contains(c)
    }
}

impl Validator<str> for Url {
    fn validate(&self, value: &str) -> ValidationResult {
        let rest = value
            .strip_prefix("https://")
            .or_else(|| value.strip_prefix("http://"))
            .unwrap_or(value);
        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();

        let host_ok = host.contains('.')
            && host
                .split('.')
                .all(|label| !label.is_empty() && label.chars().all(|c| is_word_char(c) || c == '-'));
        if host_ok && rest.chars().all(Self::is_url_char) {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(ERROR_CODE_URL, "Please enter a complete URL")
        }
    }

    fn error_message(&self) -> &str {
        "Please enter a complete URL"
    }
}

/// Validates that a value is within an inclusive range.
#[derive(Debug, Clone, Copy)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

impl<T: Copy> Range<T> {
    #[must_use]
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T> Validator<T> for Range<T>
where
    T: PartialOrd + fmt::Display + Copy + Send + Sync,
{
    fn validate(&self, value: &T) -> ValidationResult {
        if *value >= self.min && *value <= self.max {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(
                ValidationError::new(
                    ERROR_CODE_RANGE,
                    "Please enter a value from {min} to {max}",
                )
                .with_param("min", self.min)
                .with_param("max", self.max)
                .with_param("actual", *value),
            )
        }
    }

    fn error_message(&self) -> &str {
        "Please enter a value from {min} to {max}"
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Both validators must pass.
#[derive(Debug, Clone)]
pub struct And<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> And<A, B> {
    #[must_use]
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<T: ?Sized, A, B> Validator<T> for And<A, B>
where
    A: Validator<T>,
    B: Validator<T>,
{
    fn validate(&self, value: &T) -> ValidationResult {
        match self.first.validate(value) {
            ValidationResult::Valid => self.second.validate(value),
            err => err,
        }
    }

    fn error_message(&self) -> &str {
        self.first.error_message()
    }
}

/// Applies a `str` validator to the text of a [`FieldValue`].
///
/// Non-text values fail with [`ERROR_CODE_TYPE`].
#[derive(Debug, Clone, Copy)]
pub struct OnText<V>(pub V);

impl<V: Validator<str>> Validator<FieldValue> for OnText<V> {
    fn validate(&self, value: &FieldValue) -> ValidationResult {
        match value {
            FieldValue::Text(text) => self.0.validate(text),
            other => ValidationResult::invalid(
                ERROR_CODE_TYPE,
                format!("Expected text, got {}", other.type_name()),
            ),
        }
    }

    fn error_message(&self) -> &str {
        self.0.error_message()
    }
}

/// A validator built from a closure.
pub struct FnValidator<F> {
    check: F,
    message: String,
}

impl<F> FnValidator<F>
where
    F: Fn(&FieldValue) -> bool + Send + Sync,
{
    /// Fails with `message` whenever `check` returns `false`.
    #[must_use]
    pub fn new(message: impl Into<String>, check: F) -> Self {
        Self {
            check,
            message: message.into(),
        }
    }
}

impl<F> fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl<F> Validator<FieldValue> for FnValidator<F>
where
    F: Fn(&FieldValue) -> bool + Send + Sync,
{
    fn validate(&self, value: &FieldValue) -> ValidationResult {
        if (self.check)(value) {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid("custom", self.message.clone())
        }
    }

    fn error_message(&self) -> &str {
        &self.message
    }
}
