#![forbid(unsafe_code)]

//! Validity aggregation.
//!
//! An [`Aggregator`] listens on the bus and folds field announcements into
//! one "can this form be submitted" answer for its container.
//!
//! # Routing
//!
//! An announcement is accepted when its `watch` flag is set, or when its scope
//! matches the aggregator's scope under the configured [`ScopeMatch`].
//! Everything else belongs to some other container and is ignored.
//!
//! # Records
//!
//! | Announcement | Effect |
//! |--------------|--------|
//! | `Mount`      | insert `optional \|\| valid` |
//! | `Change`     | update an existing record; unknown keys are ignored |
//! | `Unmount`    | remove the record |
//!
//! The aggregate is invalid iff some record is `false`. An empty aggregator is
//! valid.
//!
//! # Changed
//!
//! `changed` turns on at the first accepted edited `Change` from a matching
//! scope. Watch-only traffic from other containers does not count, and neither
//! does a derived field settling after its dependencies mount.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use formwire_core::{
    AnnouncementKind, Bus, FieldAnnouncement, FieldKey, HandlerError, Outbox, Scope, ScopeId,
    SubId, Subscriber,
};
use tracing::{debug, trace};

use crate::submit::SubmitEvent;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which scopes an aggregator owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeMatch {
    /// Only announcements from exactly this scope.
    #[default]
    Exact,
    /// This scope and every scope nested in it.
    Subtree,
}

impl ScopeMatch {
    fn matches(self, own: ScopeId, scope: &Scope) -> bool {
        match self {
            Self::Exact => scope.is(own),
            Self::Subtree => scope.is_within(own),
        }
    }
}

/// Options for [`Aggregator::attach`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub matching: ScopeMatch,
    /// Allow saving an unchanged form ("always editable" forms).
    pub enable_save: bool,
}

impl AggregatorConfig {
    #[must_use]
    pub fn matching(mut self, matching: ScopeMatch) -> Self {
        self.matching = matching;
        self
    }

    #[must_use]
    pub fn enable_save(mut self, enable_save: bool) -> Self {
        self.enable_save = enable_save;
        self
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// What the aggregator knows about one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub valid: bool,
    pub scope: Scope,
    pub watch: bool,
}

/// Point-in-time view of an aggregator, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub scope: ScopeId,
    pub records: usize,
    /// Keys currently counted as invalid, in key order.
    pub invalid_fields: Vec<FieldKey>,
    pub changed: bool,
    pub can_save: bool,
}

impl AggregateSnapshot {
    #[must_use]
    pub fn invalid(&self) -> bool {
        !self.invalid_fields.is_empty()
    }

    /// Names of the invalid fields, in key order.
    #[must_use]
    pub fn invalid_names(&self) -> Vec<&str> {
        self.invalid_fields.iter().map(|key| key.name.as_str()).collect()
    }
}

struct AggregatorState {
    scope: Scope,
    config: AggregatorConfig,
    records: BTreeMap<FieldKey, FieldRecord>,
    invalid: bool,
    changed: bool,
}

impl AggregatorState {
    fn recompute(&mut self) {
        let invalid = self.records.values().any(|record| !record.valid);
        if invalid != self.invalid {
            debug!(scope = %self.scope, invalid, records = self.records.len(), "aggregate validity changed");
        }
        self.invalid = invalid;
    }

    fn can_save(&self) -> bool {
        !self.invalid && (self.changed || self.config.enable_save)
    }

    fn owns(&self, scope: &Scope) -> bool {
        self.config.matching.matches(self.scope.id(), scope)
    }
}

impl Subscriber for AggregatorState {
    fn on_announcement(
        &mut self,
        announcement: &FieldAnnouncement,
        _outbox: &mut Outbox,
    ) -> Result<(), HandlerError> {
        let owned = self.owns(&announcement.scope);
        if !owned && !announcement.watch {
            trace!(
                aggregator = %self.scope,
                field = %announcement.name,
                from = %announcement.scope,
                "announcement outside aggregator scope"
            );
            return Ok(());
        }

        let key = announcement.key();
        match announcement.kind {
            AnnouncementKind::Mount => {
                self.records.insert(
                    key,
                    FieldRecord {
                        valid: announcement.counts_as_valid(),
                        scope: announcement.scope.clone(),
                        watch: announcement.watch,
                    },
                );
            }
            AnnouncementKind::Change => {
                match self.records.get_mut(&key) {
                    Some(record) => record.valid = announcement.valid,
                    None => trace!(
                        aggregator = %self.scope,
                        field = %announcement.name,
                        "change for a field this aggregator never saw mount"
                    ),
                }
                if owned && announcement.edited && !self.changed {
                    debug!(aggregator = %self.scope, field = %announcement.name, "form changed");
                    self.changed = true;
                }
            }
            AnnouncementKind::Unmount => {
                self.records.remove(&key);
            }
        }
        self.recompute();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Validity aggregate for one container.
///
/// Dropping the aggregator unsubscribes it from the bus.
pub struct Aggregator {
    bus: Bus,
    state: Rc<RefCell<AggregatorState>>,
    sub_id: SubId,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Aggregator")
            .field("scope", &state.scope)
            .field("config", &state.config)
            .field("records", &state.records.len())
            .field("invalid", &state.invalid)
            .field("changed", &state.changed)
            .finish()
    }
}

impl Aggregator {
    /// Aggregate exactly `scope` with default options.
    #[must_use]
    pub fn new(bus: &Bus, scope: &Scope) -> Self {
        Self::attach(bus, scope, AggregatorConfig::default())
    }

    /// Subscribe a new aggregator for `scope`.
    ///
    /// The bus keeps no history: attach before mounting the fields.
    #[must_use]
    pub fn attach(bus: &Bus, scope: &Scope, config: AggregatorConfig) -> Self {
        let state = Rc::new(RefCell::new(AggregatorState {
            scope: scope.clone(),
            config,
            records: BTreeMap::new(),
            invalid: false,
            changed: false,
        }));
        let sub_id = bus.subscribe_shared(state.clone());
        debug!(scope = %scope, matching = ?config.matching, sub_id, "aggregator attached");
        Self {
            bus: bus.clone(),
            state,
            sub_id,
        }
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.state.borrow().scope.clone()
    }

    #[must_use]
    pub fn config(&self) -> AggregatorConfig {
        self.state.borrow().config
    }

    /// Some record is currently `false`.
    #[must_use]
    pub fn invalid(&self) -> bool {
        self.state.borrow().invalid
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.invalid()
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.state.borrow().changed
    }

    /// `!invalid && (changed || enable_save)`.
    #[must_use]
    pub fn can_save(&self) -> bool {
        self.state.borrow().can_save()
    }

    pub fn set_enable_save(&mut self, enable_save: bool) {
        self.state.borrow_mut().config.enable_save = enable_save;
    }

    /// Forget that the form was edited.
    pub fn reset_changed(&mut self) {
        self.state.borrow_mut().changed = false;
    }

    /// Cancel `event` if the aggregate is invalid. Returns whether the
    /// submission may proceed.
    pub fn intercept_submit(&self, event: &mut SubmitEvent) -> bool {
        let state = self.state.borrow();
        if state.invalid {
            let invalid: Vec<&str> = state
                .records
                .iter()
                .filter(|(_, record)| !record.valid)
                .map(|(key, _)| key.name.as_str())
                .collect();
            debug!(aggregator = %state.scope, ?invalid, "submit blocked");
            event.prevent_default();
            return false;
        }
        true
    }

    // -- Records --

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().records.is_empty()
    }

    #[must_use]
    pub fn record(&self, key: &FieldKey) -> Option<FieldRecord> {
        self.state.borrow().records.get(key).cloned()
    }

    /// The record for `name` in the aggregator's own scope.
    #[must_use]
    pub fn validity_of(&self, name: &str) -> Option<bool> {
        let state = self.state.borrow();
        let key = FieldKey::new(state.scope.id(), name);
        state.records.get(&key).map(|record| record.valid)
    }

    /// No record within `scope` (or below it) is invalid.
    #[must_use]
    pub fn is_valid_within(&self, scope: ScopeId) -> bool {
        self.state
            .borrow()
            .records
            .values()
            .filter(|record| record.scope.is_within(scope))
            .all(|record| record.valid)
    }

    /// Drop every record whose field lives in `scope` or below it.
    ///
    /// Only needed when a container is removed without going through a
    /// [`Registration`](formwire_core::Registration); returns the number of
    /// records dropped.
    pub fn purge_within(&mut self, scope: ScopeId) -> usize {
        let mut state = self.state.borrow_mut();
        let before = state.records.len();
        state.records.retain(|_, record| !record.scope.is_within(scope));
        let purged = before - state.records.len();
        if purged > 0 {
            debug!(aggregator = %state.scope, purged_scope = %scope, purged, "purged records");
        }
        state.recompute();
        purged
    }

    /// Drop every record called `name`, in any scope.
    pub fn remove(&mut self, name: &str) -> usize {
        let mut state = self.state.borrow_mut();
        let before = state.records.len();
        state.records.retain(|key, _| key.name != name);
        let removed = before - state.records.len();
        state.recompute();
        removed
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.state.borrow();
        AggregateSnapshot {
            scope: state.scope.id(),
            records: state.records.len(),
            invalid_fields: state
                .records
                .iter()
                .filter(|(_, record)| !record.valid)
                .map(|(key, _)| key.clone())
                .collect(),
            changed: state.changed,
            can_save: state.can_save(),
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.sub_id);
    }
}
