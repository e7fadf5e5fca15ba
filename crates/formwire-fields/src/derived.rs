#![forbid(unsafe_code)]

//! Fields whose validity is computed from other fields.
//!
//! A [`DerivedField`] subscribes to the bus, keeps the latest value and
//! validity of each dependency it has heard about, and re-evaluates its
//! [`DerivedRule`] after every relevant announcement. The result is announced
//! as the derived field's own `Change`, so aggregators treat it like any other
//! field.
//!
//! # Missing dependencies
//!
//! Until a dependency has announced itself, rules see it as absent. Every
//! built-in rule treats an absent input as satisfying its constraint, so a
//! freshly mounted derived field is valid until it has evidence otherwise.
//!
//! # Late mounts
//!
//! The bus does not replay history. A derived field mounted after its
//! dependencies can catch up with [`DerivedField::observe`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use formwire_core::{
    AnnouncementKind, Bus, BusError, FieldAnnouncement, FieldKey, FieldValue, HandlerError, Outbox,
    PublishReport, Scope, ScopeId, SubId, Subscriber,
};
use time::Date;
use tracing::{debug, error, trace, warn};

use crate::field::{Field, FieldError};

// ---------------------------------------------------------------------------
// Inputs / Evaluation
// ---------------------------------------------------------------------------

/// Latest state heard from one dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub value: FieldValue,
    pub valid: bool,
}

/// Dependency values handed to a rule.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    observed: &'a BTreeMap<FieldKey, Observed>,
}

impl<'a> Inputs<'a> {
    #[must_use]
    pub fn new(observed: &'a BTreeMap<FieldKey, Observed>) -> Self {
        Self { observed }
    }

    /// The first observed dependency called `name` (lowest scope id first).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a Observed> {
        self.all(name).next()
    }

    /// Every observed dependency called `name`, one per scope.
    pub fn all(&self, name: &str) -> impl Iterator<Item = &'a Observed> {
        self.observed
            .iter()
            .filter(move |(key, _)| key.name == name)
            .map(|(_, observed)| observed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a FieldKey, &'a Observed)> + 'a {
        self.observed.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// The date held by `name`, but only once that field has announced it valid.
    #[must_use]
    pub fn valid_date(&self, name: &str) -> Option<Date> {
        self.get(name)
            .filter(|observed| observed.valid)
            .and_then(|observed| observed.value.as_date())
    }

    /// The number held by `name`, if any.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|observed| observed.value.as_number())
    }
}

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    pub valid: bool,
    pub value: FieldValue,
    /// Human-readable reasons the value is invalid (or other labels).
    pub report: Vec<String>,
}

impl Evaluation {
    #[must_use]
    pub fn valid(value: impl Into<FieldValue>) -> Self {
        Self {
            valid: true,
            value: value.into(),
            report: Vec::new(),
        }
    }

    #[must_use]
    pub fn invalid(value: impl Into<FieldValue>, report: Vec<String>) -> Self {
        Self {
            valid: false,
            value: value.into(),
            report,
        }
    }
}

/// A pure function from the freshest dependency values to validity.
pub trait DerivedRule {
    fn evaluate(&self, inputs: &Inputs<'_>) -> Evaluation;
}

impl<F> DerivedRule for F
where
    F: Fn(&Inputs<'_>) -> Evaluation,
{
    fn evaluate(&self, inputs: &Inputs<'_>) -> Evaluation {
        self(inputs)
    }
}

// ---------------------------------------------------------------------------
// DerivedSpec
// ---------------------------------------------------------------------------

/// Where a derived field looks for its dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependencyScope {
    /// Exactly the derived field's own scope.
    #[default]
    Own,
    /// The derived field's scope and everything nested in it.
    Subtree,
    /// A given scope and everything nested in it.
    Within(ScopeId),
    /// Any scope.
    Anywhere,
}

/// Configuration for [`DerivedField::mount`].
pub struct DerivedSpec<R> {
    name: String,
    rule: R,
    dependencies: Vec<String>,
    scope: DependencyScope,
    watch: bool,
}

impl<R: fmt::Debug> fmt::Debug for DerivedSpec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedSpec")
            .field("name", &self.name)
            .field("rule", &self.rule)
            .field("dependencies", &self.dependencies)
            .field("scope", &self.scope)
            .field("watch", &self.watch)
            .finish()
    }
}

impl<R: DerivedRule> DerivedSpec<R> {
    #[must_use]
    pub fn new(name: impl Into<String>, rule: R) -> Self {
        Self {
            name: name.into(),
            rule,
            dependencies: Vec::new(),
            scope: DependencyScope::Own,
            watch: false,
        }
    }

    /// Names this field listens to.
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn within(mut self, scope: DependencyScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }
}

// ---------------------------------------------------------------------------
// DerivedField
// ---------------------------------------------------------------------------

struct DerivedState<R> {
    name: String,
    scope: Scope,
    rule: R,
    dependencies: Vec<String>,
    dependency_scope: DependencyScope,
    watch: bool,
    observed: BTreeMap<FieldKey, Observed>,
    evaluation: Evaluation,
    retired: bool,
}

impl<R: DerivedRule> DerivedState<R> {
    fn recompute(&mut self) {
        self.evaluation = self.rule.evaluate(&Inputs::new(&self.observed));
    }

    fn is_self(&self, announcement: &FieldAnnouncement) -> bool {
        announcement.name == self.name && announcement.scope.is(self.scope.id())
    }

    fn is_dependency(&self, announcement: &FieldAnnouncement) -> bool {
        if !self.dependencies.iter().any(|d| *d == announcement.name) {
            return false;
        }
        match self.dependency_scope {
            DependencyScope::Own => announcement.scope.is(self.scope.id()),
            DependencyScope::Subtree => announcement.scope.is_within(self.scope.id()),
            DependencyScope::Within(id) => announcement.scope.is_within(id),
            DependencyScope::Anywhere => true,
        }
    }

    fn record(&mut self, announcement: &FieldAnnouncement) {
        let key = announcement.key();
        match announcement.kind {
            AnnouncementKind::Mount | AnnouncementKind::Change => {
                self.observed.insert(
                    key,
                    Observed {
                        value: announcement.value.clone(),
                        valid: announcement.valid,
                    },
                );
            }
            AnnouncementKind::Unmount => {
                self.observed.remove(&key);
            }
        }
    }

    fn announcement(&self, kind: AnnouncementKind, edited: bool) -> FieldAnnouncement {
        let announcement = match kind {
            AnnouncementKind::Mount => FieldAnnouncement::mount(&*self.name, self.scope.clone()),
            AnnouncementKind::Change => FieldAnnouncement::change(&*self.name, self.scope.clone()),
            AnnouncementKind::Unmount => {
                FieldAnnouncement::unmount(&*self.name, self.scope.clone())
            }
        };
        announcement
            .with_value(self.evaluation.value.clone())
            .with_valid(self.evaluation.valid)
            .with_watch(self.watch)
            .with_edited(edited)
    }
}

impl<R: DerivedRule> Subscriber for DerivedState<R> {
    fn on_announcement(
        &mut self,
        announcement: &FieldAnnouncement,
        outbox: &mut Outbox,
    ) -> Result<(), HandlerError> {
        if self.retired || self.is_self(announcement) || !self.is_dependency(announcement) {
            return Ok(());
        }
        self.record(announcement);
        let was_valid = self.evaluation.valid;
        self.recompute();
        trace!(
            field = %self.name,
            dependency = %announcement.name,
            valid = self.evaluation.valid,
            was_valid,
            "derived field recomputed"
        );
        // A dependency mounting is not a user edit.
        let edited = announcement.kind == AnnouncementKind::Change && announcement.edited;
        outbox.publish(self.announcement(AnnouncementKind::Change, edited));
        Ok(())
    }
}

/// A mounted derived field.
pub struct DerivedField<R: DerivedRule + 'static> {
    bus: Bus,
    state: Rc<RefCell<DerivedState<R>>>,
    sub_id: SubId,
    retired: bool,
}

impl<R: DerivedRule + 'static> fmt::Debug for DerivedField<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DerivedField")
            .field("name", &state.name)
            .field("scope", &state.scope)
            .field("evaluation", &state.evaluation)
            .field("observed", &state.observed.len())
            .finish_non_exhaustive()
    }
}

impl<R: DerivedRule + 'static> DerivedField<R> {
    /// Subscribe to the bus and announce the initial evaluation.
    pub fn mount(bus: &Bus, scope: &Scope, spec: DerivedSpec<R>) -> Result<Self, FieldError> {
        if bus.is_mounted(scope.id(), &spec.name) {
            error!(field = %spec.name, scope = %scope, "field name already mounted in scope");
            return Err(FieldError::Bus(BusError::DuplicateField {
                name: spec.name,
                scope: scope.id(),
            }));
        }

        let mut state = DerivedState {
            name: spec.name,
            scope: scope.clone(),
            rule: spec.rule,
            dependencies: spec.dependencies,
            dependency_scope: spec.scope,
            watch: spec.watch,
            observed: BTreeMap::new(),
            evaluation: Evaluation::default(),
            retired: false,
        };
        state.recompute();
        let mount = state.announcement(AnnouncementKind::Mount, false);
        debug!(
            field = %state.name,
            scope = %state.scope,
            dependencies = ?state.dependencies,
            valid = state.evaluation.valid,
            "mounting derived field"
        );

        let state = Rc::new(RefCell::new(state));
        let sub_id = bus.subscribe_shared(state.clone());
        let field = Self {
            bus: bus.clone(),
            state,
            sub_id,
            retired: false,
        };
        field.bus.publish(mount)?;
        Ok(field)
    }

    /// Record a dependency that was mounted before this field and announce the
    /// re-evaluation.
    pub fn observe(&mut self, field: &Field) -> Result<PublishReport, FieldError> {
        let change = {
            let mut state = self.state.borrow_mut();
            let announcement = FieldAnnouncement::mount(field.name(), field.scope().clone())
                .with_value(field.value().clone())
                .with_valid(field.valid());
            if !state.is_dependency(&announcement) {
                return Ok(PublishReport::default());
            }
            state.record(&announcement);
            state.recompute();
            state.announcement(AnnouncementKind::Change, false)
        };
        Ok(self.bus.publish(change)?)
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.state.borrow().scope.clone()
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.borrow().evaluation.valid
    }

    #[must_use]
    pub fn value(&self) -> FieldValue {
        self.state.borrow().evaluation.value.clone()
    }

    /// Messages from the latest evaluation.
    #[must_use]
    pub fn report(&self) -> Vec<String> {
        self.state.borrow().evaluation.report.clone()
    }

    #[must_use]
    pub fn evaluation(&self) -> Evaluation {
        self.state.borrow().evaluation.clone()
    }

    /// Number of dependencies currently observed.
    #[must_use]
    pub fn observed_count(&self) -> usize {
        self.state.borrow().observed.len()
    }

    /// Invalid after at least one dependency has been heard from.
    #[must_use]
    pub fn show_error(&self) -> bool {
        let state = self.state.borrow();
        !state.evaluation.valid && !state.observed.is_empty()
    }

    #[must_use]
    pub fn show_valid(&self) -> bool {
        let state = self.state.borrow();
        state.evaluation.valid && !state.observed.is_empty()
    }

    /// Stop listening and announce `Unmount`.
    pub fn retire(mut self) -> Result<PublishReport, FieldError> {
        self.release()
    }

    fn release(&mut self) -> Result<PublishReport, FieldError> {
        self.retired = true;
        self.bus.unsubscribe(self.sub_id);
        let unmount = {
            let mut state = self.state.borrow_mut();
            state.retired = true;
            state.announcement(AnnouncementKind::Unmount, false)
        };
        Ok(self.bus.publish(unmount)?)
    }
}

impl<R: DerivedRule + 'static> Drop for DerivedField<R> {
    fn drop(&mut self) {
        if self.retired {
            return;
        }
        if let Err(err) = self.release() {
            warn!(error = %err, "failed to unmount dropped derived field");
        }
    }
}
