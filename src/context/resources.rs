use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use snafu::Snafu;

/// Identifies a resource shared by the step copies of one transformation.
///
/// Copies of steps in the same `group` that work on the same partition share one
/// instance per `name`, for example one connection per partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub group: String,
    pub name: String,
    pub partition: Option<String>,
}

impl ResourceKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>, partition: Option<&str>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            partition: partition.map(ToOwned::to_owned),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(partition) => write!(f, "{}/{}[{}]", self.group, self.name, partition),
            None => write!(f, "{}/{}", self.group, self.name),
        }
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ResourceError {
    #[snafu(display("Shared resource {key} already holds a value of another type"))]
    TypeMismatch { key: ResourceKey },
}

struct Entry {
    references: usize,
    value: Arc<dyn Any + Send + Sync>,
}

/// Reference counted resources scoped to one transformation.
///
/// The first [`acquire`](Self::acquire) of a key creates the value; later
/// acquisitions share it. The value is dropped when the last holder calls
/// [`release`](Self::release).
#[derive(Clone, Default)]
pub struct SharedResources {
    entries: Arc<Mutex<HashMap<ResourceKey, Entry>>>,
    transaction_ids: Arc<AtomicU64>,
}

impl SharedResources {
    pub fn acquire<T, F>(&self, key: &ResourceKey, make: F) -> Result<Arc<T>, ResourceError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            let value = Arc::clone(&entry.value)
                .downcast::<T>()
                .map_err(|_| ResourceError::TypeMismatch { key: key.clone() })?;
            entry.references += 1;
            debug!(message = "Shared resource acquired.", %key, references = entry.references);
            return Ok(value);
        }

        let value = Arc::new(make());
        entries.insert(
            key.clone(),
            Entry {
                references: 1,
                value: Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
            },
        );
        debug!(message = "Shared resource created.", %key);
        Ok(value)
    }

    /// Drops one reference. Returns `true` when this was the last one and the
    /// resource was disposed.
    pub fn release(&self, key: &ResourceKey) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            warn!(message = "Released a shared resource that is not held.", %key);
            return false;
        };
        entry.references -= 1;
        if entry.references > 0 {
            return false;
        }
        entries.remove(key);
        debug!(message = "Shared resource disposed.", %key);
        true
    }

    pub fn references(&self, key: &ResourceKey) -> usize {
        self.entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.references)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Next id of the transformation-wide transaction sequence, starting at 1.
    pub fn next_transaction_id(&self) -> u64 {
        self.transaction_ids.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResources")
            .field("resources", &self.len())
            .field(
                "transaction_ids",
                &self.transaction_ids.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn shares_one_instance_per_group_and_partition() {
        let resources = SharedResources::default();
        let p1 = ResourceKey::new("db", "conn", Some("P1"));
        let p2 = ResourceKey::new("db", "conn", Some("P2"));
        let created = AtomicUsize::new(0);
        let make = || {
            created.fetch_add(1, Ordering::SeqCst);
            AtomicU64::new(0)
        };

        let a = resources.acquire(&p1, make).unwrap();
        let b = resources.acquire(&p1, make).unwrap();
        let c = resources.acquire(&p2, make).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(resources.references(&p1), 2);
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn disposes_on_last_release() {
        let resources = SharedResources::default();
        let key = ResourceKey::new("db", "conn", None);
        let _first = resources.acquire(&key, || 1_u32).unwrap();
        let _second = resources.acquire(&key, || 2_u32).unwrap();

        assert!(!resources.release(&key));
        assert_eq!(resources.references(&key), 1);
        assert!(resources.release(&key));
        assert!(resources.is_empty());
        assert!(!resources.release(&key));
    }

    #[test]
    fn rejects_type_confusion() {
        let resources = SharedResources::default();
        let key = ResourceKey::new("seq", "ids", None);
        resources.acquire(&key, || 1_u32).unwrap();
        assert_eq!(
            resources.acquire(&key, String::new).unwrap_err(),
            ResourceError::TypeMismatch { key: key.clone() }
        );
        assert_eq!(key.to_string(), "seq/ids");
    }

    #[test]
    fn transaction_ids_increase() {
        let resources = SharedResources::default();
        let shared = resources.clone();
        assert_eq!(resources.next_transaction_id(), 1);
        assert_eq!(shared.next_transaction_id(), 2);
    }
}
