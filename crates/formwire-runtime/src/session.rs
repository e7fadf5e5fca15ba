#![forbid(unsafe_code)]

//! One form session: a bus plus the settings its fields share.

use formwire_core::{Bus, BusTrace, Registration, Scope};
use formwire_fields::{
    DerivedField, DerivedRule, DerivedSpec, Field, FieldError, FieldSpec, PeriodRule, UploadField,
};
use tracing::info;

use crate::aggregator::{Aggregator, AggregatorConfig};
use crate::config::{ConfigError, SessionConfig};
use crate::step_gate::{StepGate, StepGateError};

/// Owns the [`Bus`] for one form session and hands out scopes, fields, and
/// aggregators wired to it.
#[derive(Debug)]
pub struct FormSession {
    bus: Bus,
    config: SessionConfig,
    root: Scope,
}

impl FormSession {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let bus = Bus::with_config(config.bus_config());
        let root = bus.root_scope();
        info!(
            max_depth = config.max_publish_depth,
            max_deliveries = config.max_deliveries,
            trace = config.record_trace,
            "form session started"
        );
        Self { bus, config, root }
    }

    /// A session configured from `FORMWIRE_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(SessionConfig::from_env()?))
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The form's top-level scope.
    #[must_use]
    pub fn root(&self) -> &Scope {
        &self.root
    }

    /// A nested container that lives as long as the form.
    #[must_use]
    pub fn child_scope(&self, parent: &Scope) -> Scope {
        self.bus.child_scope(parent)
    }

    /// A removable sub-entity, such as one line item.
    #[must_use]
    pub fn register(&self, parent: &Scope) -> Registration {
        self.bus.register(parent)
    }

    #[must_use]
    pub fn aggregator(&self, scope: &Scope) -> Aggregator {
        Aggregator::new(&self.bus, scope)
    }

    #[must_use]
    pub fn aggregator_with(&self, scope: &Scope, config: AggregatorConfig) -> Aggregator {
        Aggregator::attach(&self.bus, scope, config)
    }

    /// A wizard over an aggregator of `scope`.
    pub fn step_gate(
        &self,
        scope: &Scope,
        config: AggregatorConfig,
        steps: usize,
    ) -> Result<StepGate, StepGateError> {
        StepGate::new(self.aggregator_with(scope, config), steps)
    }

    pub fn mount(&self, scope: &Scope, spec: FieldSpec) -> Result<Field, FieldError> {
        Field::mount(&self.bus, scope, spec)
    }

    pub fn mount_derived<R: DerivedRule + 'static>(
        &self,
        scope: &Scope,
        spec: DerivedSpec<R>,
    ) -> Result<DerivedField<R>, FieldError> {
        DerivedField::mount(&self.bus, scope, spec)
    }

    /// An upload field limited to the configured size.
    pub fn mount_upload(&self, scope: &Scope, spec: FieldSpec) -> Result<UploadField, FieldError> {
        Ok(UploadField::mount(&self.bus, scope, spec)?.with_max_bytes(self.config.upload_max_bytes))
    }

    /// A period rule bounded by the configured contract period.
    #[must_use]
    pub fn period_rule(&self, start: &str, end: &str) -> PeriodRule {
        PeriodRule::new(start, end)
            .with_floor(self.config.contract_start)
            .with_ceiling(self.config.contract_end)
    }

    #[must_use]
    pub fn trace(&self) -> BusTrace {
        self.bus.trace()
    }

    /// Tear down every subscription and mount record.
    pub fn end(self) {
        info!(mounted = self.bus.mounted_count(), "form session ended");
        self.bus.clear();
    }
}

impl Default for FormSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwire_fields::{FieldKind, UploadFile, UploadStart};
    use time::macros::date;

    #[test]
    fn session_applies_bus_limits() {
        let session = FormSession::new(SessionConfig::default().with_max_publish_depth(4));
        assert_eq!(session.bus().config().max_depth, 4);
        assert!(session.root().parent().is_none());
    }

    #[test]
    fn upload_limit_comes_from_config() {
        let session = FormSession::new(SessionConfig::default().with_upload_max_bytes(10));
        let root = session.root().clone();
        let mut pdf = session
            .mount_upload(&root, FieldSpec::new("pdf", FieldKind::Upload))
            .unwrap();
        let start = pdf.begin(&UploadFile::new("a.pdf", 11)).unwrap();
        assert_eq!(start, UploadStart::TooLarge);
    }

    #[test]
    fn period_rule_uses_contract_bounds() {
        let session = FormSession::new(
            SessionConfig::default()
                .with_contract_period(Some(date!(2019 - 01 - 01)), Some(date!(2022 - 01 - 01))),
        );
        let rule = session.period_rule("start", "end");
        assert_eq!(rule.check(Some(date!(2018 - 01 - 01)), None).len(), 1);
    }

    #[test]
    fn end_clears_the_bus() {
        let session = FormSession::default();
        let bus = session.bus().clone();
        let root = session.root().clone();
        let _agg = session.aggregator(&root);
        let _field = session
            .mount(&root, FieldSpec::new("agree", FieldKind::Checkbox))
            .unwrap();
        session.end();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.mounted_count(), 0);
    }
}
