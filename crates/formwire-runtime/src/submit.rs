#![forbid(unsafe_code)]

//! Submit attempts.

/// One attempt to submit a form.
///
/// The host creates it when the user presses submit, passes it through
/// [`Aggregator::intercept_submit`](crate::Aggregator::intercept_submit) or
/// [`StepGate::handle_submit`](crate::StepGate::handle_submit), and performs
/// the real submission only if the default was not prevented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitEvent {
    default_prevented: bool,
}

impl SubmitEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the submission.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}
