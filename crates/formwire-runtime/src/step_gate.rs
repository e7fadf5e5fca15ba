#![forbid(unsafe_code)]

//! Multi-step wizards.
//!
//! A [`StepGate`] is a step cursor guarded by an [`Aggregator`]. Moving the
//! cursor requires the relevant fields to be valid; a refused move is not an
//! error, the step simply stays where it was and the returned
//! [`StepOutcome`] says why.
//!
//! ```text
//!   0 --next--> 1 --next--> ... --next--> steps-1 --submit--> (host submits)
//!   ^                                        |
//!   +---------------- reopen ----------------+
//! ```

use std::fmt;

use formwire_core::ScopeId;
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::submit::SubmitEvent;

/// Invalid step gate construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepGateError {
    /// A wizard needs at least one step.
    NoSteps,
    /// Per-step scopes must cover every step.
    StepScopeCount { steps: usize, scopes: usize },
}

impl fmt::Display for StepGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSteps => write!(f, "step gate needs at least one step"),
            Self::StepScopeCount { steps, scopes } => write!(
                f,
                "step gate has {steps} steps but {scopes} step scopes were given"
            ),
        }
    }
}

impl std::error::Error for StepGateError {}

/// Result of a navigation or submit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Moved { from: usize, to: usize },
    /// The relevant fields are invalid; the step did not change.
    Blocked,
    /// `next` on the last step.
    AtLastStep,
    /// `go_to_step` past the last step.
    OutOfRange,
    /// Submit on a valid last step: the host should submit.
    Submit,
}

impl StepOutcome {
    #[must_use]
    pub fn moved(self) -> bool {
        matches!(self, Self::Moved { .. })
    }
}

/// Step cursor for a multi-step form.
#[derive(Debug)]
pub struct StepGate {
    aggregator: Aggregator,
    steps: usize,
    step: usize,
    step_scopes: Vec<ScopeId>,
}

impl StepGate {
    /// Gate `steps` steps on the whole aggregate.
    pub fn new(aggregator: Aggregator, steps: usize) -> Result<Self, StepGateError> {
        if steps == 0 {
            return Err(StepGateError::NoSteps);
        }
        Ok(Self {
            aggregator,
            steps,
            step: 0,
            step_scopes: Vec::new(),
        })
    }

    /// Gate each step on its own scope: leaving step `i` requires only the
    /// fields within scopes `0..=i` to be valid.
    pub fn with_step_scopes(mut self, scopes: Vec<ScopeId>) -> Result<Self, StepGateError> {
        if scopes.len() != self.steps {
            return Err(StepGateError::StepScopeCount {
                steps: self.steps,
                scopes: scopes.len(),
            });
        }
        self.step_scopes = scopes;
        Ok(self)
    }

    #[must_use]
    pub fn step(&self) -> usize {
        self.step
    }

    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    #[must_use]
    pub fn is_last_step(&self) -> bool {
        self.step + 1 == self.steps
    }

    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut Aggregator {
        &mut self.aggregator
    }

    /// Fields relevant to leaving the steps up to `through` are valid.
    #[must_use]
    pub fn valid_through(&self, through: usize) -> bool {
        if self.step_scopes.is_empty() {
            return self.aggregator.is_valid();
        }
        self.step_scopes
            .iter()
            .take(through + 1)
            .all(|scope| self.aggregator.is_valid_within(*scope))
    }

    /// Advance one step if the current step is valid.
    pub fn next(&mut self) -> StepOutcome {
        if self.is_last_step() {
            return StepOutcome::AtLastStep;
        }
        let target = self.step + 1;
        self.move_to(target)
    }

    /// Jump to `step` if the steps being left behind are valid.
    ///
    /// Moving backward is gated too: the current step must be valid to leave.
    pub fn go_to_step(&mut self, step: usize) -> StepOutcome {
        if step >= self.steps {
            debug!(step, steps = self.steps, "step out of range");
            return StepOutcome::OutOfRange;
        }
        self.move_to(step)
    }

    fn move_to(&mut self, target: usize) -> StepOutcome {
        let through = self.step.max(target.saturating_sub(1));
        if !self.valid_through(through) {
            debug!(
                step = self.step,
                target,
                invalid = ?self.aggregator.snapshot().invalid_names(),
                "step change blocked"
            );
            return StepOutcome::Blocked;
        }
        let from = self.step;
        self.step = target;
        debug!(from, to = target, "step changed");
        StepOutcome::Moved { from, to: target }
    }

    /// Treat a submit before the last step as "next".
    ///
    /// The default is prevented unless the form is on its last step and the
    /// whole aggregate is valid.
    pub fn handle_submit(&mut self, event: &mut SubmitEvent) -> StepOutcome {
        if self.aggregator.invalid() || !self.is_last_step() {
            event.prevent_default();
            return self.next();
        }
        StepOutcome::Submit
    }

    /// The container was reopened: back to the first step, nothing edited.
    pub fn reopen(&mut self) {
        debug!(step = self.step, "step gate reopened");
        self.step = 0;
        self.aggregator.reset_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwire_core::Bus;
    use formwire_fields::{Field, FieldKind, FieldSpec, TextFormat};

    fn digits(name: &str) -> FieldSpec {
        FieldSpec::new(name, FieldKind::Text(TextFormat::Digits))
    }

    #[test]
    fn zero_steps_is_an_error() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let err = StepGate::new(Aggregator::new(&bus, &form), 0).unwrap_err();
        assert_eq!(err, StepGateError::NoSteps);
    }

    #[test]
    fn next_is_blocked_until_valid() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let mut gate = StepGate::new(Aggregator::new(&bus, &form), 3).unwrap();
        let mut name = Field::mount(&bus, &form, digits("name")).unwrap();

        assert_eq!(gate.next(), StepOutcome::Blocked);
        assert_eq!(gate.step(), 0);

        name.set_text("12").unwrap();
        assert_eq!(gate.next(), StepOutcome::Moved { from: 0, to: 1 });
        assert_eq!(gate.step(), 1);
    }

    #[test]
    fn last_step_and_out_of_range() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let mut gate = StepGate::new(Aggregator::new(&bus, &form), 2).unwrap();
        assert!(gate.next().moved());
        assert_eq!(gate.next(), StepOutcome::AtLastStep);
        assert_eq!(gate.go_to_step(2), StepOutcome::OutOfRange);
        assert_eq!(gate.go_to_step(0), StepOutcome::Moved { from: 1, to: 0 });
    }

    #[test]
    fn backward_jump_needs_a_valid_current_step() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let mut gate = StepGate::new(Aggregator::new(&bus, &form), 3).unwrap();
        assert!(gate.next().moved());
        assert!(gate.next().moved());

        // A field mounted on the last step leaves it invalid.
        let mut code = Field::mount(&bus, &form, digits("code")).unwrap();
        assert_eq!(gate.go_to_step(0), StepOutcome::Blocked);
        assert_eq!(gate.step(), 2);

        code.set_text("9").unwrap();
        assert_eq!(gate.go_to_step(0), StepOutcome::Moved { from: 2, to: 0 });
    }

    #[test]
    fn submit_before_last_step_advances() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let mut gate = StepGate::new(Aggregator::new(&bus, &form), 2).unwrap();

        let mut event = SubmitEvent::new();
        assert_eq!(gate.handle_submit(&mut event), StepOutcome::Moved { from: 0, to: 1 });
        assert!(event.default_prevented());

        let mut event = SubmitEvent::new();
        assert_eq!(gate.handle_submit(&mut event), StepOutcome::Submit);
        assert!(!event.default_prevented());
    }

    #[test]
    fn reopen_resets_step_and_changed() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let mut gate = StepGate::new(Aggregator::new(&bus, &form), 3).unwrap();
        let mut name = Field::mount(&bus, &form, digits("name")).unwrap();
        name.set_text("1").unwrap();
        gate.next();
        assert!(gate.aggregator().changed());

        gate.reopen();
        assert_eq!(gate.step(), 0);
        assert!(!gate.aggregator().changed());
    }

    #[test]
    fn step_scopes_only_check_earlier_steps() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let first = bus.child_scope(&form);
        let second = bus.child_scope(&form);
        let agg = Aggregator::attach(
            &bus,
            &form,
            crate::AggregatorConfig::default().matching(crate::ScopeMatch::Subtree),
        );
        let mut gate = StepGate::new(agg, 2)
            .unwrap()
            .with_step_scopes(vec![first.id(), second.id()])
            .unwrap();
        let _later = Field::mount(&bus, &second, digits("later")).unwrap();

        assert_eq!(gate.next(), StepOutcome::Moved { from: 0, to: 1 });
        let mut event = SubmitEvent::new();
        assert_eq!(gate.handle_submit(&mut event), StepOutcome::AtLastStep);
        assert!(event.default_prevented());
    }

    #[test]
    fn step_scope_count_must_match() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let err = StepGate::new(Aggregator::new(&bus, &form), 2)
            .unwrap()
            .with_step_scopes(vec![form.id()])
            .unwrap_err();
        assert_eq!(err, StepGateError::StepScopeCount { steps: 2, scopes: 1 });
    }
}
