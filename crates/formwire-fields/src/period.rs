#![forbid(unsafe_code)]

//! Period-of-performance rule: a start/end date pair inside contract bounds.

use std::fmt;

use formwire_core::FieldValue;
use time::Date;
use time::macros::format_description;

use crate::derived::{DerivedRule, Evaluation, Inputs};

/// Render a date as `Jan 1, 2019`.
#[must_use]
pub fn display_date(date: Date) -> String {
    let format = format_description!("[month repr:short] [day padding:none], [year]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}

/// One broken constraint of a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodViolation {
    StartNotBeforeEnd,
    StartBeforeFloor(Date),
    EndAfterCeiling(Date),
}

impl fmt::Display for PeriodViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartNotBeforeEnd => f.write_str("PoP start date must be before end date."),
            Self::StartBeforeFloor(floor) => write!(
                f,
                "PoP start date must be on or after {}.",
                display_date(*floor)
            ),
            Self::EndAfterCeiling(ceiling) => write!(
                f,
                "PoP end date must be before or on {}.",
                display_date(*ceiling)
            ),
        }
    }
}

/// Start must precede end; start must not precede the floor; end must not
/// pass the ceiling.
///
/// A bound takes part only once its date field has announced a valid date.
/// Unknown bounds satisfy every check that involves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodRule {
    start: String,
    end: String,
    floor: Option<Date>,
    ceiling: Option<Date>,
}

impl PeriodRule {
    #[must_use]
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            floor: None,
            ceiling: None,
        }
    }

    /// Earliest allowed start (inclusive).
    #[must_use]
    pub fn with_floor(mut self, floor: Option<Date>) -> Self {
        self.floor = floor;
        self
    }

    /// Latest allowed end (inclusive).
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: Option<Date>) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Names of the two date fields, for [`DerivedSpec::depends_on`](crate::derived::DerivedSpec::depends_on).
    #[must_use]
    pub fn dependencies(&self) -> [String; 2] {
        [self.start.clone(), self.end.clone()]
    }

    /// Every violated constraint, in display order.
    #[must_use]
    pub fn check(&self, start: Option<Date>, end: Option<Date>) -> Vec<PeriodViolation> {
        let mut violations = Vec::new();
        if let (Some(start), Some(end)) = (start, end)
            && start >= end
        {
            violations.push(PeriodViolation::StartNotBeforeEnd);
        }
        if let (Some(start), Some(floor)) = (start, self.floor)
            && start < floor
        {
            violations.push(PeriodViolation::StartBeforeFloor(floor));
        }
        if let (Some(end), Some(ceiling)) = (end, self.ceiling)
            && end > ceiling
        {
            violations.push(PeriodViolation::EndAfterCeiling(ceiling));
        }
        violations
    }
}

impl DerivedRule for PeriodRule {
    fn evaluate(&self, inputs: &Inputs<'_>) -> Evaluation {
        let start = inputs.valid_date(&self.start);
        let end = inputs.valid_date(&self.end);
        let value = match (start, end) {
            (Some(start), Some(end)) => FieldValue::Text(format!("{start}/{end}")),
            _ => FieldValue::Empty,
        };
        let violations = self.check(start, end);
        if violations.is_empty() {
            Evaluation::valid(value)
        } else {
            Evaluation::invalid(value, violations.iter().map(ToString::to_string).collect())
        }
    }
}
