#![forbid(unsafe_code)]

//! The session-wide announcement bus.
//!
//! One [`Bus`] is created per form session and handed down explicitly to every
//! field, derived field, and aggregator. There is no global instance.
//!
//! # How delivery works
//!
//! 1. [`Bus::publish`] appends the announcement to a FIFO work queue.
//! 2. If no drain is running, the caller becomes the drain: it pops
//!    announcements one by one and hands each to every subscriber in
//!    registration order.
//! 3. Handlers never publish re-entrantly. They push follow-up announcements
//!    into their [`Outbox`]; those are queued one level deeper than the
//!    announcement being handled.
//! 4. A `publish` issued while a drain is running (host code called from a
//!    handler) is queued the same way and returns immediately.
//!
//! # Guards
//!
//! Derived fields that depend on each other would republish forever. The drain
//! aborts, clears the queue, and returns [`BusError::CycleDetected`] once an
//! announcement is queued deeper than [`BusConfig::max_depth`], or
//! [`BusError::DeliveryBudgetExhausted`] once a single drain made more than
//! [`BusConfig::max_deliveries`] handler calls.
//!
//! # Mount ledger
//!
//! The bus remembers which `(scope, name)` pairs are mounted:
//!
//! - a second `Mount` of a mounted pair is delivered (last writer wins) but the
//!   publish returns [`BusError::DuplicateField`];
//! - a `Change` or `Unmount` for a pair that is not mounted is dropped, so a
//!   field removed while an upload was in flight cannot resurrect itself.
//!
//! # Threading
//!
//! `Bus` is `Rc`-based and therefore `!Send`: publish and subscribe are
//! serialized by construction. Background work (uploads) hands results back to
//! the owning thread before they touch the bus.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use crate::announcement::{AnnouncementKind, FieldAnnouncement, FieldKey};
use crate::error::{BusError, HandlerError};
use crate::scope::{Scope, ScopeId};
use crate::trace::{BusEvent, BusTrace, DropReason};

/// Default limit on re-entrant publish depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;
/// Default limit on handler calls within one drain.
pub const DEFAULT_MAX_DELIVERIES: usize = 10_000;

/// A unique identifier for a subscription.
pub type SubId = u64;

// ---------------------------------------------------------------------------
// BusConfig
// ---------------------------------------------------------------------------

/// Limits and recording options for a [`Bus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Deepest allowed chain of republishes triggered by one publish.
    pub max_depth: usize,
    /// Handler calls allowed within one drain.
    pub max_deliveries: usize,
    /// Record a [`BusTrace`].
    pub record_trace: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            record_trace: false,
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_max_deliveries(mut self, max_deliveries: usize) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, record_trace: bool) -> Self {
        self.record_trace = record_trace;
        self
    }
}

// ---------------------------------------------------------------------------
// Subscriber / Outbox
// ---------------------------------------------------------------------------

/// Receives every announcement published on the bus.
///
/// Subscribers filter for themselves; the bus does no routing.
pub trait Subscriber {
    /// Handle one announcement.
    ///
    /// Follow-up announcements go into `outbox`. Returning an error does not
    /// stop delivery to other subscribers.
    fn on_announcement(
        &mut self,
        announcement: &FieldAnnouncement,
        outbox: &mut Outbox,
    ) -> Result<(), HandlerError>;
}

impl<F> Subscriber for F
where
    F: FnMut(&FieldAnnouncement, &mut Outbox) -> Result<(), HandlerError>,
{
    fn on_announcement(
        &mut self,
        announcement: &FieldAnnouncement,
        outbox: &mut Outbox,
    ) -> Result<(), HandlerError> {
        self(announcement, outbox)
    }
}

/// Announcements a handler wants published after it returns.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<FieldAnnouncement>,
}

impl Outbox {
    pub fn publish(&mut self, announcement: FieldAnnouncement) {
        self.pending.push(announcement);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PublishReport
// ---------------------------------------------------------------------------

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Announcements admitted (including republishes).
    pub announcements: usize,
    /// Handler calls made.
    pub deliveries: usize,
    /// Handler calls that returned an error.
    pub failures: usize,
    /// Announcements dropped by the mount ledger.
    pub dropped: usize,
    /// Deepest republish level reached.
    pub max_depth: usize,
}

impl PublishReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.announcements += other.announcements;
        self.deliveries += other.deliveries;
        self.failures += other.failures;
        self.dropped += other.dropped;
        self.max_depth = self.max_depth.max(other.max_depth);
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct Queued {
    seq: u64,
    depth: usize,
    announcement: FieldAnnouncement,
}

struct Entry {
    id: SubId,
    subscriber: Rc<RefCell<dyn Subscriber>>,
}

struct Mounted {
    scope: Scope,
    watch: bool,
    count: usize,
}

struct BusInner {
    config: BusConfig,
    subscribers: RefCell<Vec<Entry>>,
    queue: RefCell<VecDeque<Queued>>,
    draining: Cell<bool>,
    current_depth: Cell<usize>,
    next_sub: Cell<SubId>,
    next_scope: Cell<u64>,
    next_seq: Cell<u64>,
    ledger: RefCell<HashMap<FieldKey, Mounted>>,
    trace: RefCell<BusTrace>,
}

/// Handle to one form session's announcement bus.
///
/// Cloning the handle shares the same bus.
#[derive(Clone)]
pub struct Bus {
    inner: Rc<BusInner>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .field("mounted", &self.mounted_count())
            .field("draining", &self.inner.draining.get())
            .finish()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Create a bus with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Rc::new(BusInner {
                config,
                subscribers: RefCell::new(Vec::new()),
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                current_depth: Cell::new(0),
                next_sub: Cell::new(1),
                next_scope: Cell::new(1),
                next_seq: Cell::new(1),
                ledger: RefCell::new(HashMap::new()),
                trace: RefCell::new(BusTrace::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> BusConfig {
        self.inner.config
    }

    /// Returns `true` if both handles refer to the same bus.
    #[must_use]
    pub fn same_bus(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -- Scopes --

    fn allocate_scope_id(&self) -> ScopeId {
        let raw = self.inner.next_scope.get();
        self.inner.next_scope.set(raw + 1);
        ScopeId::from_raw(raw)
    }

    /// Allocate a top-level scope.
    #[must_use]
    pub fn root_scope(&self) -> Scope {
        Scope::root(self.allocate_scope_id())
    }

    /// Allocate a scope nested inside `parent`.
    #[must_use]
    pub fn child_scope(&self, parent: &Scope) -> Scope {
        parent.child(self.allocate_scope_id())
    }

    /// Allocate a removable sub-entity scope inside `parent`.
    ///
    /// Releasing the returned [`Registration`] unmounts every field mounted in
    /// that scope or below it.
    #[must_use]
    pub fn register(&self, parent: &Scope) -> Registration {
        let scope = self.child_scope(parent);
        debug!(scope = %scope, "registered entity scope");
        Registration {
            bus: self.clone(),
            scope,
            released: false,
        }
    }

    // -- Subscriptions --

    /// Add a subscriber. It receives announcements published from now on.
    pub fn subscribe<S: Subscriber + 'static>(&self, subscriber: S) -> SubId {
        self.subscribe_shared(Rc::new(RefCell::new(subscriber)))
    }

    /// Add a subscriber whose state the caller keeps a handle to.
    pub fn subscribe_shared(&self, subscriber: Rc<RefCell<dyn Subscriber>>) -> SubId {
        let id = self.inner.next_sub.get();
        self.inner.next_sub.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push(Entry { id, subscriber });
        trace!(sub_id = id, "subscriber added");
        id
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubId) -> bool {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|entry| entry.id != id);
        let removed = subscribers.len() != before;
        if removed {
            trace!(sub_id = id, "subscriber removed");
        }
        removed
    }

    #[must_use]
    pub fn is_subscribed(&self, id: SubId) -> bool {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .any(|entry| entry.id == id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    // -- Ledger queries --

    /// Returns `true` if a field named `name` is currently mounted in `scope`.
    #[must_use]
    pub fn is_mounted(&self, scope: ScopeId, name: &str) -> bool {
        self.inner
            .ledger
            .borrow()
            .contains_key(&FieldKey::new(scope, name))
    }

    #[must_use]
    pub fn mounted_count(&self) -> usize {
        self.inner.ledger.borrow().len()
    }

    /// Keys of every mounted field inside `scope` (or below it), sorted.
    #[must_use]
    pub fn mounted_within(&self, scope: ScopeId) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = self
            .inner
            .ledger
            .borrow()
            .iter()
            .filter(|(_, mounted)| mounted.scope.is_within(scope))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    // -- Trace --

    /// Copy of the recorded trace (empty unless tracing is enabled).
    #[must_use]
    pub fn trace(&self) -> BusTrace {
        self.inner.trace.borrow().clone()
    }

    pub fn clear_trace(&self) {
        self.inner.trace.borrow_mut().clear();
    }

    fn record(&self, event: BusEvent) {
        if self.inner.config.record_trace {
            self.inner.trace.borrow_mut().push(event);
        }
    }

    // -- Publishing --

    /// Publish an announcement and deliver everything it triggers.
    ///
    /// Called from inside a handler, the announcement is only queued and an
    /// empty report is returned; the running drain delivers it.
    pub fn publish(&self, announcement: FieldAnnouncement) -> Result<PublishReport, BusError> {
        if self.inner.draining.get() {
            let depth = self.inner.current_depth.get() + 1;
            self.enqueue(announcement, depth);
            return Ok(PublishReport::default());
        }

        self.enqueue(announcement, 0);
        let guard = DrainGuard::start(&self.inner);
        let mut report = PublishReport::default();
        let mut config_errors = Vec::new();
        let outcome = self.drain(&mut report, &mut config_errors);
        drop(guard);

        outcome?;
        match config_errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Unmount every field mounted in `scope` or below it.
    ///
    /// Every field is unmounted even if one of the publishes fails; the first
    /// error is returned afterwards.
    pub fn retire(&self, scope: ScopeId) -> Result<PublishReport, BusError> {
        let retiring: Vec<(FieldKey, Scope, bool)> = {
            let ledger = self.inner.ledger.borrow();
            let mut entries: Vec<_> = ledger
                .iter()
                .filter(|(_, mounted)| mounted.scope.is_within(scope))
                .map(|(key, mounted)| (key.clone(), mounted.scope.clone(), mounted.watch))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };

        debug!(scope = %scope, fields = retiring.len(), "retiring scope");
        let mut report = PublishReport::default();
        let mut first_error = None;
        for (key, field_scope, watch) in retiring {
            let unmount = FieldAnnouncement::unmount(key.name, field_scope).with_watch(watch);
            let field = unmount.name.clone();
            match self.publish(unmount) {
                Ok(published) => report.merge(published),
                Err(err) => {
                    warn!(
                        scope = %scope,
                        field = %field,
                        error = %err,
                        "unmount failed during retire; continuing"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Drop every subscriber, queued announcement, and ledger entry.
    ///
    /// Ends the session; scope ids keep counting so stale scopes never alias.
    pub fn clear(&self) {
        self.inner.subscribers.borrow_mut().clear();
        self.inner.queue.borrow_mut().clear();
        self.inner.ledger.borrow_mut().clear();
        debug!("bus cleared");
    }

    fn enqueue(&self, announcement: FieldAnnouncement, depth: usize) {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        self.inner.queue.borrow_mut().push_back(Queued {
            seq,
            depth,
            announcement,
        });
    }

    fn abort(&self, queued: &Queued, deliveries: usize) {
        self.inner.queue.borrow_mut().clear();
        self.record(BusEvent::GuardTripped {
            seq: queued.seq,
            name: queued.announcement.name.clone(),
            depth: queued.depth,
            deliveries,
        });
    }

    fn drain(
        &self,
        report: &mut PublishReport,
        config_errors: &mut Vec<BusError>,
    ) -> Result<(), BusError> {
        let config = self.inner.config;
        loop {
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(queued) = next else {
                return Ok(());
            };

            if queued.depth > config.max_depth {
                self.abort(&queued, report.deliveries);
                error!(
                    field = %queued.announcement.name,
                    depth = queued.depth,
                    limit = config.max_depth,
                    "publish depth limit exceeded; derived fields likely form a cycle"
                );
                return Err(BusError::CycleDetected {
                    name: queued.announcement.name,
                    depth: queued.depth,
                    limit: config.max_depth,
                });
            }

            if !self.admit(&queued, config_errors) {
                report.dropped += 1;
                continue;
            }

            report.announcements += 1;
            report.max_depth = report.max_depth.max(queued.depth);
            self.inner.current_depth.set(queued.depth);
            self.record(BusEvent::Published {
                seq: queued.seq,
                name: queued.announcement.name.clone(),
                kind: queued.announcement.kind,
                scope: queued.announcement.scope.id(),
                depth: queued.depth,
            });
            trace!(
                seq = queued.seq,
                depth = queued.depth,
                announcement = %queued.announcement,
                "delivering"
            );

            let subscribers: Vec<(SubId, Rc<RefCell<dyn Subscriber>>)> = self
                .inner
                .subscribers
                .borrow()
                .iter()
                .map(|entry| (entry.id, Rc::clone(&entry.subscriber)))
                .collect();

            for (id, subscriber) in subscribers {
                // Removed by an earlier handler for this same announcement.
                if !self.is_subscribed(id) {
                    continue;
                }
                if report.deliveries >= config.max_deliveries {
                    self.abort(&queued, report.deliveries);
                    error!(
                        deliveries = report.deliveries,
                        limit = config.max_deliveries,
                        "delivery budget exhausted; aborting drain"
                    );
                    return Err(BusError::DeliveryBudgetExhausted {
                        deliveries: report.deliveries,
                        limit: config.max_deliveries,
                    });
                }

                let mut outbox = Outbox::default();
                let outcome = match subscriber.try_borrow_mut() {
                    Ok(mut handler) => handler.on_announcement(&queued.announcement, &mut outbox),
                    Err(_) => Err(HandlerError::new("subscriber is busy (already borrowed)")),
                };
                report.deliveries += 1;

                match outcome {
                    Ok(()) => self.record(BusEvent::Delivered {
                        seq: queued.seq,
                        subscriber: id,
                    }),
                    Err(err) => {
                        report.failures += 1;
                        warn!(
                            sub_id = id,
                            seq = queued.seq,
                            field = %queued.announcement.name,
                            error = %err,
                            "subscriber failed; continuing delivery"
                        );
                        self.record(BusEvent::HandlerFailed {
                            seq: queued.seq,
                            subscriber: id,
                            message: err.message().to_string(),
                        });
                    }
                }

                for follow_up in outbox.pending {
                    self.enqueue(follow_up, queued.depth + 1);
                }
            }
        }
    }

    /// Apply the mount ledger. Returns `false` if the announcement is dropped.
    fn admit(&self, queued: &Queued, config_errors: &mut Vec<BusError>) -> bool {
        let announcement = &queued.announcement;
        let key = announcement.key();
        let mut ledger = self.inner.ledger.borrow_mut();

        match announcement.kind {
            AnnouncementKind::Mount => {
                let duplicate = match ledger.get_mut(&key) {
                    Some(mounted) => {
                        mounted.count += 1;
                        mounted.watch = announcement.watch;
                        true
                    }
                    None => false,
                };
                if duplicate {
                    drop(ledger);
                    error!(
                        field = %announcement.name,
                        scope = %announcement.scope,
                        "field mounted twice in one scope; last writer wins"
                    );
                    self.record(BusEvent::DuplicateMount {
                        seq: queued.seq,
                        name: announcement.name.clone(),
                        scope: announcement.scope.id(),
                    });
                    config_errors.push(BusError::DuplicateField {
                        name: announcement.name.clone(),
                        scope: announcement.scope.id(),
                    });
                } else {
                    ledger.insert(
                        key,
                        Mounted {
                            scope: announcement.scope.clone(),
                            watch: announcement.watch,
                            count: 1,
                        },
                    );
                }
                true
            }
            AnnouncementKind::Change => {
                let mounted = ledger.contains_key(&key);
                drop(ledger);
                if !mounted {
                    self.drop_unmounted(queued);
                }
                mounted
            }
            AnnouncementKind::Unmount => {
                let remaining = ledger.get_mut(&key).map(|mounted| {
                    mounted.count -= 1;
                    mounted.count
                });
                match remaining {
                    None => {
                        drop(ledger);
                        self.drop_unmounted(queued);
                        false
                    }
                    Some(0) => {
                        ledger.remove(&key);
                        true
                    }
                    Some(_) => true,
                }
            }
        }
    }

    fn drop_unmounted(&self, queued: &Queued) {
        debug!(
            field = %queued.announcement.name,
            scope = %queued.announcement.scope,
            kind = %queued.announcement.kind,
            "dropping announcement for unmounted field"
        );
        self.record(BusEvent::Dropped {
            seq: queued.seq,
            name: queued.announcement.name.clone(),
            reason: DropReason::NotMounted,
        });
    }
}

// ---------------------------------------------------------------------------
// DrainGuard
// ---------------------------------------------------------------------------

/// Marks the bus as draining for its lifetime.
///
/// Dropping it, including while a panicking handler unwinds, leaves the bus
/// idle with an empty queue so later publishes deliver normally.
struct DrainGuard<'a> {
    inner: &'a BusInner,
}

impl<'a> DrainGuard<'a> {
    fn start(inner: &'a BusInner) -> Self {
        inner.draining.set(true);
        Self { inner }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let discarded = match self.inner.queue.try_borrow_mut() {
                Ok(mut queue) => {
                    let discarded = queue.len();
                    queue.clear();
                    discarded
                }
                Err(_) => 0,
            };
            error!(discarded, "subscriber panicked; drain abandoned");
        }
        self.inner.draining.set(false);
        self.inner.current_depth.set(0);
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Owned scope of one removable sub-entity (e.g. a line item).
///
/// Fields mounted in [`Registration::scope`] are unmounted together when the
/// registration is released, explicitly via [`Registration::unregister`] or by
/// dropping it.
pub struct Registration {
    bus: Bus,
    scope: Scope,
    released: bool,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("scope", &self.scope)
            .field("released", &self.released)
            .finish()
    }
}

impl Registration {
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Unmount everything registered under this scope.
    pub fn unregister(mut self) -> Result<PublishReport, BusError> {
        self.released = true;
        self.bus.retire(self.scope.id())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.bus.retire(self.scope.id()) {
            warn!(scope = %self.scope, error = %err, "failed to retire dropped registration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn traced_bus() -> Bus {
        Bus::with_config(BusConfig::default().with_trace(true))
    }

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> impl Subscriber + 'static {
        let log = Rc::clone(log);
        move |a: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> {
            log.borrow_mut().push(format!("{tag}:{}:{}", a.kind, a.name));
            Ok(())
        }
    }

    // -- Delivery order --

    #[test]
    fn delivers_in_registration_order() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "a"));
        bus.subscribe(recorder(&log, "b"));

        bus.publish(FieldAnnouncement::mount("x", scope)).unwrap();

        assert_eq!(*log.borrow(), vec!["a:mount:x", "b:mount:x"]);
    }

    #[test]
    fn late_subscriber_misses_earlier_mount() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        bus.publish(FieldAnnouncement::mount("x", scope.clone()))
            .unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "late"));
        bus.publish(FieldAnnouncement::change("x", scope)).unwrap();

        assert_eq!(*log.borrow(), vec!["late:change:x"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let log = Rc::new(RefCell::new(Vec::new()));
        let id = bus.subscribe(recorder(&log, "a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.publish(FieldAnnouncement::mount("x", scope)).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    // -- Handler isolation --

    #[test]
    fn failing_handler_does_not_block_others() {
        let bus = traced_bus();
        let scope = bus.root_scope();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(|_: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        });
        bus.subscribe(recorder(&log, "ok"));

        let report = bus.publish(FieldAnnouncement::mount("x", scope)).unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.deliveries, 2);
        assert_eq!(*log.borrow(), vec!["ok:mount:x"]);
        assert_eq!(bus.trace().count("handler_failed"), 1);
    }

    #[test]
    fn busy_subscriber_is_reported_not_panicking() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let shared: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let handler = Rc::new(RefCell::new({
            let shared = Rc::clone(&shared);
            move |a: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> {
                shared.borrow_mut().push(a.name.clone());
                Ok(())
            }
        }));
        bus.subscribe_shared(handler.clone());

        let _guard = handler.borrow_mut();
        let report = bus.publish(FieldAnnouncement::mount("x", scope)).unwrap();
        assert_eq!(report.failures, 1);
        assert!(shared.borrow().is_empty());
    }

    // -- Re-entrancy --

    #[test]
    fn outbox_announcements_are_delivered_breadth_first() {
        let bus = traced_bus();
        let scope = bus.root_scope();
        let echo_scope = scope.clone();
        bus.publish(FieldAnnouncement::mount("echo", scope.clone()))
            .unwrap();
        bus.subscribe(move |a: &FieldAnnouncement, outbox: &mut Outbox| -> Result<(), HandlerError> {
            if a.name == "source" && a.kind == AnnouncementKind::Change {
                outbox.publish(FieldAnnouncement::change("echo", echo_scope.clone()));
            }
            Ok(())
        });
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "r"));
        bus.publish(FieldAnnouncement::mount("source", scope.clone()))
            .unwrap();

        let report = bus
            .publish(FieldAnnouncement::change("source", scope))
            .unwrap();

        assert_eq!(report.announcements, 2);
        assert_eq!(report.max_depth, 1);
        assert_eq!(
            *log.borrow(),
            vec!["r:mount:source", "r:change:source", "r:change:echo"]
        );
        assert!(bus.trace().verify_invariants().is_empty());
    }

    #[test]
    fn direct_publish_inside_handler_is_queued() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        bus.publish(FieldAnnouncement::mount("inner", scope.clone()))
            .unwrap();
        let inner_bus = bus.clone();
        let inner_scope = scope.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(move |a: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> {
            if a.name == "outer" {
                let report = inner_bus
                    .publish(FieldAnnouncement::change("inner", inner_scope.clone()))
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                assert_eq!(report, PublishReport::default());
            }
            Ok(())
        });
        bus.subscribe(recorder(&log, "r"));

        bus.publish(FieldAnnouncement::mount("outer", scope)).unwrap();
        assert_eq!(*log.borrow(), vec!["r:mount:outer", "r:change:inner"]);
    }

    #[test]
    #[traced_test]
    fn cycle_trips_depth_guard() {
        let bus = Bus::with_config(BusConfig::default().with_max_depth(8).with_trace(true));
        let scope = bus.root_scope();
        bus.publish(FieldAnnouncement::mount("a", scope.clone()))
            .unwrap();
        bus.publish(FieldAnnouncement::mount("b", scope.clone()))
            .unwrap();

        // a -> b -> a -> ...
        let ping_scope = scope.clone();
        bus.subscribe(move |x: &FieldAnnouncement, outbox: &mut Outbox| -> Result<(), HandlerError> {
            if x.kind == AnnouncementKind::Change {
                let other = if x.name == "a" { "b" } else { "a" };
                outbox.publish(FieldAnnouncement::change(other, ping_scope.clone()));
            }
            Ok(())
        });

        let err = bus
            .publish(FieldAnnouncement::change("a", scope.clone()))
            .unwrap_err();
        assert_eq!(
            err,
            BusError::CycleDetected {
                name: "b".into(),
                depth: 9,
                limit: 8
            }
        );
        assert!(logs_contain("publish depth limit exceeded"));
        assert_eq!(bus.trace().count("guard_tripped"), 1);

        // The queue was cleared; the bus remains usable.
        let report = bus.publish(FieldAnnouncement::unmount("a", scope)).unwrap();
        assert_eq!(report.announcements, 1);
    }

    #[test]
    fn delivery_budget_is_enforced() {
        let bus = Bus::with_config(BusConfig::default().with_max_deliveries(3));
        let scope = bus.root_scope();
        for _ in 0..4 {
            bus.subscribe(|_: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> { Ok(()) });
        }
        let err = bus.publish(FieldAnnouncement::mount("x", scope)).unwrap_err();
        assert_eq!(
            err,
            BusError::DeliveryBudgetExhausted {
                deliveries: 3,
                limit: 3
            }
        );
    }

    // -- Mount ledger --

    #[test]
    #[traced_test]
    fn duplicate_mount_is_reported_but_delivered() {
        let bus = traced_bus();
        let scope = bus.root_scope();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "r"));

        bus.publish(FieldAnnouncement::mount("number", scope.clone()))
            .unwrap();
        let err = bus
            .publish(FieldAnnouncement::mount("number", scope.clone()))
            .unwrap_err();

        assert_eq!(
            err,
            BusError::DuplicateField {
                name: "number".into(),
                scope: scope.id()
            }
        );
        assert_eq!(log.borrow().len(), 2);
        assert!(logs_contain("field mounted twice in one scope"));
    }

    #[test]
    fn same_name_in_different_scopes_is_fine() {
        let bus = Bus::new();
        let form = bus.root_scope();
        let first = bus.child_scope(&form);
        let second = bus.child_scope(&form);
        bus.publish(FieldAnnouncement::mount("number", first))
            .unwrap();
        bus.publish(FieldAnnouncement::mount("number", second))
            .unwrap();
        assert_eq!(bus.mounted_count(), 2);
    }

    #[test]
    fn change_for_unmounted_field_is_dropped() {
        let bus = traced_bus();
        let scope = bus.root_scope();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "r"));

        let report = bus
            .publish(FieldAnnouncement::change("ghost", scope))
            .unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.announcements, 0);
        assert!(log.borrow().is_empty());
        assert_eq!(bus.trace().count("dropped"), 1);
    }

    #[test]
    fn unmount_clears_ledger_entry() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        bus.publish(FieldAnnouncement::mount("x", scope.clone()))
            .unwrap();
        assert!(bus.is_mounted(scope.id(), "x"));
        bus.publish(FieldAnnouncement::unmount("x", scope.clone()))
            .unwrap();
        assert!(!bus.is_mounted(scope.id(), "x"));

        let report = bus.publish(FieldAnnouncement::unmount("x", scope)).unwrap();
        assert_eq!(report.dropped, 1);
    }

    #[test]
    #[traced_test]
    fn panicking_subscriber_does_not_wedge_the_bus() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        bus.subscribe(move |x: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> {
            if x.name == "boom" {
                panic!("rule bug");
            }
            counter.set(counter.get() + 1);
            Ok(())
        });

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bus.publish(FieldAnnouncement::mount("boom", scope.clone()))
        }));
        assert!(unwound.is_err());
        assert!(logs_contain("subscriber panicked"));

        let report = bus
            .publish(FieldAnnouncement::mount("ok", scope.clone()))
            .unwrap();
        assert_eq!(report.announcements, 1);
        assert_eq!(hits.get(), 1);
        assert!(bus.is_mounted(scope.id(), "ok"));
    }

    // -- Registration --

    #[test]
    fn retire_unmounts_everything_even_after_a_guard_trip() {
        let bus = Bus::with_config(BusConfig::default().with_max_depth(4));
        let form = bus.root_scope();
        bus.publish(FieldAnnouncement::mount("ping", form.clone()))
            .unwrap();
        let line = bus.register(&form);
        let line_id = line.scope().id();
        for name in ["a", "b"] {
            bus.publish(FieldAnnouncement::mount(name, line.scope().clone()))
                .unwrap();
        }

        // Removing `a` starts a runaway republish loop.
        let ping_scope = form.clone();
        bus.subscribe(move |x: &FieldAnnouncement, outbox: &mut Outbox| -> Result<(), HandlerError> {
            let runaway = (x.name == "a" && x.kind == AnnouncementKind::Unmount)
                || (x.name == "ping" && x.kind == AnnouncementKind::Change);
            if runaway {
                outbox.publish(FieldAnnouncement::change("ping", ping_scope.clone()));
            }
            Ok(())
        });
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "r"));

        let err = line.unregister().unwrap_err();
        assert!(matches!(err, BusError::CycleDetected { .. }));
        assert!(!bus.is_mounted(line_id, "a"));
        assert!(!bus.is_mounted(line_id, "b"));
        assert!(log.borrow().contains(&"r:unmount:b".to_string()));
        assert!(bus.is_mounted(form.id(), "ping"));
    }

    #[test]
    fn registration_retires_nested_fields() {
        let bus = Bus::new();
        let form = bus.root_scope();
        bus.publish(FieldAnnouncement::mount("title", form.clone()))
            .unwrap();

        let line = bus.register(&form);
        let nested = bus.child_scope(line.scope());
        bus.publish(FieldAnnouncement::mount("number", line.scope().clone()))
            .unwrap();
        bus.publish(FieldAnnouncement::mount("start_date", nested).with_watch(true))
            .unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(recorder(&log, "r"));
        let report = line.unregister().unwrap();

        assert_eq!(report.announcements, 2);
        assert_eq!(
            *log.borrow(),
            vec!["r:unmount:number", "r:unmount:start_date"]
        );
        assert_eq!(bus.mounted_within(form.id()).len(), 1);
        assert!(bus.is_mounted(form.id(), "title"));
    }

    #[test]
    fn dropping_registration_retires_fields() {
        let bus = Bus::new();
        let form = bus.root_scope();
        {
            let line = bus.register(&form);
            bus.publish(FieldAnnouncement::mount("number", line.scope().clone()))
                .unwrap();
            assert_eq!(bus.mounted_count(), 1);
        }
        assert_eq!(bus.mounted_count(), 0);
    }

    #[test]
    fn clear_resets_session_state() {
        let bus = Bus::new();
        let scope = bus.root_scope();
        bus.subscribe(|_: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> { Ok(()) });
        bus.publish(FieldAnnouncement::mount("x", scope)).unwrap();
        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.mounted_count(), 0);
        let next = bus.root_scope();
        assert!(next.id().raw() > 1);
    }

    #[test]
    fn scopes_are_unique() {
        let bus = Bus::new();
        let a = bus.root_scope();
        let b = bus.child_scope(&a);
        let c = bus.child_scope(&a);
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert!(b.is_within(a.id()));
    }

    #[test]
    fn trace_checksum_is_deterministic() {
        let run = || {
            let bus = traced_bus();
            let scope = bus.root_scope();
            bus.subscribe(|_: &FieldAnnouncement, _: &mut Outbox| -> Result<(), HandlerError> { Ok(()) });
            bus.publish(FieldAnnouncement::mount("x", scope.clone()))
                .unwrap();
            bus.publish(FieldAnnouncement::change("x", scope)).unwrap();
            bus.trace().checksum()
        };
        assert_eq!(run(), run());
    }
}
