use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::TransContext;
use crate::internal_events::{SubTransformationDeregistered, SubTransformationRegistered};

#[derive(Debug, Default)]
struct Inner {
    active: Mutex<IndexMap<String, TransContext>>,
    registered: AtomicU64,
    deregistered: AtomicU64,
}

/// Nested transformations currently owned by steps of one transformation,
/// keyed by `<step>.<copy>` of the owning step copy.
#[derive(Clone, Debug, Default)]
pub struct ActiveSubTransformations {
    inner: Arc<Inner>,
}

impl ActiveSubTransformations {
    /// Registers a nested transformation. Returns `false` if the key is taken.
    pub fn add(&self, key: &str, context: TransContext) -> bool {
        let active = {
            let mut active = self.inner.active.lock();
            if active.contains_key(key) {
                return false;
            }
            active.insert(key.to_owned(), context);
            active.len()
        };
        self.inner.registered.fetch_add(1, Ordering::AcqRel);
        emit!(SubTransformationRegistered { key, active });
        true
    }

    /// Deregisters a nested transformation. Returns `false` if it was not registered.
    pub fn remove(&self, key: &str) -> bool {
        let active = {
            let mut active = self.inner.active.lock();
            if active.shift_remove(key).is_none() {
                return false;
            }
            active.len()
        };
        self.inner.deregistered.fetch_add(1, Ordering::AcqRel);
        emit!(SubTransformationDeregistered { key, active });
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.active.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.active.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.active.lock().keys().cloned().collect()
    }

    pub fn registered_total(&self) -> u64 {
        self.inner.registered.load(Ordering::Acquire)
    }

    pub fn deregistered_total(&self) -> u64 {
        self.inner.deregistered.load(Ordering::Acquire)
    }

    /// Stops every registered nested transformation, recursively.
    pub fn stop_all(&self) {
        let contexts = self
            .inner
            .active
            .lock()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for context in contexts {
            context.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunOptions, step::StepRegistry};

    fn context(name: &str) -> TransContext {
        TransContext::new(name, RunOptions::default(), Arc::new(StepRegistry::default()))
    }

    #[test]
    fn add_and_remove_exactly_once() {
        let active = ActiveSubTransformations::default();
        assert!(active.add("mapping.0", context("nested")));
        assert!(!active.add("mapping.0", context("other")));
        assert_eq!(active.len(), 1);

        assert!(active.remove("mapping.0"));
        assert!(!active.remove("mapping.0"));
        assert!(active.is_empty());
        assert_eq!(active.registered_total(), 1);
        assert_eq!(active.deregistered_total(), 1);
    }

    #[test]
    fn stop_all_reaches_nested_contexts() {
        let active = ActiveSubTransformations::default();
        let nested = context("nested");
        let grandchild = context("grandchild");
        nested.sub_transformations().add("inner.0", grandchild.clone());
        active.add("mapping.0", nested.clone());

        active.stop_all();
        assert!(nested.control().is_stopped());
        assert!(grandchild.control().is_stopped());
    }
}
