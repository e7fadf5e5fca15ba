#![forbid(unsafe_code)]

//! Turning displayed (masked) text back into the logical value.
//!
//! Formatting input as the user types is the host's business. Fields only need
//! to undo it before validating, e.g. `"$1,250.00"` becomes `"1250.00"`.

use std::fmt;

/// Removes display formatting from raw input.
pub trait Unmask: Send + Sync {
    fn unmask(&self, raw: &str) -> String;
}

impl<F> Unmask for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn unmask(&self, raw: &str) -> String {
        self(raw)
    }
}

/// Deletes every occurrence of the listed characters.
#[derive(Clone, PartialEq, Eq)]
pub struct StripChars {
    chars: Vec<char>,
}

impl StripChars {
    #[must_use]
    pub fn new(chars: impl IntoIterator<Item = char>) -> Self {
        Self {
            chars: chars.into_iter().collect(),
        }
    }

    /// Currency formatting: `$` and thousands separators.
    #[must_use]
    pub fn dollars() -> Self {
        Self::new(['$', ','])
    }

    #[must_use]
    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}

impl fmt::Debug for StripChars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chars: String = self.chars.iter().collect();
        f.debug_tuple("StripChars").field(&chars).finish()
    }
}

impl Unmask for StripChars {
    fn unmask(&self, raw: &str) -> String {
        raw.chars().filter(|c| !self.chars.contains(c)).collect()
    }
}
