//! Live subscription registry.
//!
//! Maps each registration (one per subscribe call, even for identical query
//! text) to a matcher and a sink. [`SubscriptionRegistry::dispatch`] holds the
//! registry lock for the whole pass over one event, so every event sees a
//! consistent snapshot: a registration added while an event is being
//! dispatched does not receive that event.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use powerstream_core::event::{AttributeMap, TxEvent};
use powerstream_core::query::CompiledQuery;

use crate::error::ServiceError;

/// Identity of one registration. Monotonic; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Decides whether an event's attributes match a subscription.
pub trait EventMatcher: Send + Sync {
    fn matches(&self, attributes: &AttributeMap) -> Result<bool, ServiceError>;
}

impl EventMatcher for CompiledQuery {
    fn matches(&self, attributes: &AttributeMap) -> Result<bool, ServiceError> {
        Ok(self.predicate()?.matches(attributes))
    }
}

/// Receives matching events. Must not call back into the registry.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TxEvent) -> Result<(), ServiceError>;
}

struct Entry {
    query: String,
    matcher: Arc<dyn EventMatcher>,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Entry>,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Process-wide registry of live subscriptions. Cheap to clone.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matcher and sink under `query`, returning a fresh id.
    pub fn register(
        &self,
        query: impl Into<String>,
        matcher: Arc<dyn EventMatcher>,
        sink: Arc<dyn EventSink>,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        let query = query.into();
        debug!(%id, query = %query, "subscription registered");
        inner.entries.insert(
            id,
            Entry {
                query,
                matcher,
                sink,
            },
        );
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.lock().unwrap().entries.remove(&id).is_some();
        if removed {
            debug!(%id, "subscription removed");
        }
        removed
    }

    /// Deliver `event` to every registration whose matcher accepts it.
    ///
    /// A failing or panicking matcher or sink is logged and skipped; it never
    /// prevents delivery to the other registrations.
    pub fn dispatch(&self, event: &TxEvent) -> DispatchReport {
        let inner = self.inner.lock().unwrap();
        let mut report = DispatchReport::default();

        for (id, entry) in &inner.entries {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<bool, ServiceError> {
                if entry.matcher.matches(&event.events)? {
                    entry.sink.emit(event.for_query(&entry.query))?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }));

            match outcome {
                Ok(Ok(true)) => report.delivered += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(%id, query = %entry.query, error = %e, "subscription dispatch failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(%id, query = %entry.query, "subscription dispatch panicked");
                }
            }
        }
        report
    }

    /// Number of live registrations under exactly `query`.
    pub fn count_for(&self, query: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.query == query)
            .count()
    }

    /// Total number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use powerstream_core::event::TxResult;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<TxEvent>>);

    impl EventSink for Collect {
        fn emit(&self, event: TxEvent) -> Result<(), ServiceError> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Panics;

    impl EventMatcher for Panics {
        fn matches(&self, _: &AttributeMap) -> Result<bool, ServiceError> {
            panic!("matcher bug")
        }
    }

    fn event(pairs: &[(&str, &str)]) -> TxEvent {
        let attrs = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect();
        TxEvent::new(1, 0, b"", TxResult::default(), attrs)
    }

    fn query(text: &str) -> Arc<CompiledQuery> {
        Arc::new(CompiledQuery::parse(text).unwrap())
    }

    #[test]
    fn delivers_to_matching_subscriptions_only() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(Collect::default());
        let misses = Arc::new(Collect::default());
        registry.register("x=1", query("x=1"), hits.clone());
        registry.register("x=2", query("x=2"), misses.clone());

        let report = registry.dispatch(&event(&[("x", "1")]));
        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });

        let got = hits.0.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].query.as_deref(), Some("x=1"));
        assert!(misses.0.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_matcher_is_isolated() {
        let registry = SubscriptionRegistry::new();
        let sink = Arc::new(Collect::default());
        registry.register("bad", Arc::new(Panics), sink.clone());
        registry.register("x=1", query("x=1"), sink.clone());

        let report = registry.dispatch(&event(&[("x", "1")]));
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(sink.0.lock().unwrap().len(), 1);

        // the registry stays usable afterwards
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ids_are_never_reused() {
        let registry = SubscriptionRegistry::new();
        let sink = Arc::new(Collect::default());
        let a = registry.register("x=1", query("x=1"), sink.clone());
        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        let b = registry.register("x=1", query("x=1"), sink);
        assert!(b > a);
    }
}
