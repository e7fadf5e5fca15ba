#![forbid(unsafe_code)]

//! Dollar rules: obligated-vs-total funding and running totals.

use formwire_core::FieldValue;

use crate::derived::{DerivedRule, Evaluation, Inputs};

/// Share of `total` that `obligated` represents, as a display label.
///
/// Extremes are bucketed so a nearly-full or nearly-empty ratio never rounds
/// to a misleading `100%` or `0%`.
#[must_use]
pub fn percent_label(obligated: f64, total: f64) -> String {
    if total == 0.0 {
        return "0%".to_string();
    }
    let percent = obligated / total * 100.0;
    if percent > 100.0 {
        ">100%".to_string()
    } else if percent > 99.0 && percent < 100.0 {
        ">99%".to_string()
    } else if percent > 0.0 && percent < 1.0 {
        "<1%".to_string()
    } else {
        format!("{}%", percent.round())
    }
}

/// Obligated funds may not exceed the total amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRule {
    obligated: String,
    total: String,
}

impl FundingRule {
    #[must_use]
    pub fn new(obligated: impl Into<String>, total: impl Into<String>) -> Self {
        Self {
            obligated: obligated.into(),
            total: total.into(),
        }
    }

    #[must_use]
    pub fn dependencies(&self) -> [String; 2] {
        [self.obligated.clone(), self.total.clone()]
    }
}

impl DerivedRule for FundingRule {
    /// The value is the percent label; missing amounts count as zero for the
    /// label and satisfy the constraint.
    fn evaluate(&self, inputs: &Inputs<'_>) -> Evaluation {
        let obligated = inputs.number(&self.obligated);
        let total = inputs.number(&self.total);
        let label = percent_label(obligated.unwrap_or(0.0), total.unwrap_or(0.0));
        match (obligated, total) {
            (Some(obligated), Some(total)) if obligated > total => Evaluation::invalid(
                label,
                vec!["Obligated amount must be less than or equal to total amount.".to_string()],
            ),
            _ => Evaluation::valid(label),
        }
    }
}

/// Sum of every observed numeric dependency, optionally capped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TotalsRule {
    ceiling: Option<f64>,
}

impl TotalsRule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.ceiling = Some(ceiling);
        self
    }
}

impl DerivedRule for TotalsRule {
    fn evaluate(&self, inputs: &Inputs<'_>) -> Evaluation {
        let sum: f64 = inputs
            .iter()
            .filter_map(|(_, observed)| observed.value.as_number())
            .sum();
        match self.ceiling {
            Some(ceiling) if sum > ceiling => Evaluation::invalid(
                FieldValue::Number(sum),
                vec![format!("Total of {sum} exceeds the ceiling of {ceiling}.")],
            ),
            _ => Evaluation::valid(FieldValue::Number(sum)),
        }
    }
}
