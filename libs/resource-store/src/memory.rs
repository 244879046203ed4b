//! in-memory [`ResourceStore`]
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument, trace};

use crate::{Resource, StoreError, StoreResult};

/// Thread-safe keyed collection of [`Resource`]s. Cloning is cheap and every
/// clone refers to the same collection.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    inner: Arc<RwLock<HashMap<String, Resource>>>,
}

impl ResourceStore {
    /// an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `name`, generate a fresh id and insert. Returns the stored
    /// resource.
    #[instrument(level = "debug", name = "store.create", skip(self, name, description), fields(item_name = %name))]
    pub fn create(&self, name: &str, description: &str) -> StoreResult<Resource> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("name is required".to_owned()));
        }
        let mut resource = Resource::new(name, description);

        let mut guard = self.inner.write();
        // never overwrite a live entry
        while guard.contains_key(&resource.id) {
            resource.id = uuid::Uuid::new_v4().to_string();
        }
        guard.insert(resource.id.clone(), resource.clone());
        debug!(item_id = %resource.id, total = guard.len(), "item created");
        Ok(resource)
    }

    /// current state of `id`
    #[instrument(level = "debug", name = "store.get", skip(self, id), fields(item_id = %id))]
    pub fn get(&self, id: &str) -> StoreResult<Resource> {
        self.inner
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    /// A point-in-time copy of every resource. Order is unspecified.
    #[instrument(level = "debug", name = "store.list", skip(self))]
    pub fn list(&self) -> Vec<Resource> {
        let guard = self.inner.read();
        trace!(count = guard.len(), "listing items");
        guard.values().cloned().collect()
    }

    /// Partial update: `None`, empty or whitespace-only fields keep their current value.
    /// `updated_at` is always refreshed.
    #[instrument(level = "debug", name = "store.update", skip(self, id, name, description), fields(item_id = %id))]
    pub fn update(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> StoreResult<Resource> {
        let mut guard = self.inner.write();
        let resource = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        let old_name = resource.name.clone();
        resource.apply(name, description);
        debug!(item_id = %id, %old_name, new_name = %resource.name, "item updated");
        Ok(resource.clone())
    }

    /// Hard delete. A second delete of the same id is `NotFound`.
    #[instrument(level = "debug", name = "store.delete", skip(self, id), fields(item_id = %id))]
    pub fn delete(&self, id: &str) -> StoreResult<()> {
        let mut guard = self.inner.write();
        match guard.remove(id) {
            Some(resource) => {
                debug!(item_id = %id, deleted_name = %resource.name, remaining = guard.len(), "item deleted");
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_owned())),
        }
    }

    /// number of live resources
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn create_then_get() {
        let store = ResourceStore::new();
        let mut ids = HashSet::new();
        for i in 0..50 {
            let name = format!("item-{i}");
            let created = store.create(&name, "desc").unwrap();
            assert_eq!(created.created_at, created.updated_at);
            assert!(ids.insert(created.id.clone()));

            let got = store.get(&created.id).unwrap();
            assert_eq!(got, created);
            assert_eq!(got.name, name);
            assert_eq!(got.description, "desc");
        }
        assert_eq!(store.count(), 50);
    }

    #[test]
    fn create_requires_name() {
        let store = ResourceStore::new();
        assert!(matches!(
            store.create("", "d"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.create("   ", "d"),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn description_defaults_to_empty() {
        let store = ResourceStore::new();
        let res = store.create("only-name", "").unwrap();
        assert_eq!(store.get(&res.id).unwrap().description, "");
    }

    #[test]
    fn update_is_partial() {
        let store = ResourceStore::new();
        let created = store.create("A", "d").unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let updated = store.update(&created.id, Some(""), Some("d2")).unwrap();
        assert_eq!(updated.name, "A");
        assert_eq!(updated.description, "d2");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(store.get(&created.id).unwrap(), updated);

        let renamed = store.update(&created.id, Some("B"), None).unwrap();
        assert_eq!(renamed.name, "B");
        assert_eq!(renamed.description, "d2");

        let blank = store.update(&created.id, Some("   "), Some("\t")).unwrap();
        assert_eq!(blank.name, "B");
        assert_eq!(blank.description, "d2");
    }

    #[test]
    #[traced_test]
    fn operations_run_in_item_spans() {
        let store = ResourceStore::new();
        let res = store.create("spanned", "").unwrap();
        store.delete(&res.id).unwrap();
        assert!(logs_contain("store.create"));
        assert!(logs_contain("item_name=spanned"));
        assert!(logs_contain("store.delete"));
    }

    #[test]
    fn update_missing() {
        let store = ResourceStore::new();
        let err = store.update("nope", Some("x"), None).unwrap_err();
        assert_eq!(err, StoreError::NotFound("nope".into()));
    }

    #[test]
    #[traced_test]
    fn delete_is_not_repeatable() {
        let store = ResourceStore::new();
        let res = store.create("A", "d").unwrap();

        store.delete(&res.id).unwrap();
        assert!(logs_contain("item deleted"));
        assert!(store.get(&res.id).unwrap_err().is_not_found());
        assert!(store.delete(&res.id).unwrap_err().is_not_found());
        assert_eq!(store.count(), 0);

        // ids are never handed out again
        let next = store.create("A", "d").unwrap();
        assert_ne!(next.id, res.id);
    }

    #[test]
    fn list_is_a_snapshot() {
        let store = ResourceStore::new();
        let a = store.create("a", "").unwrap();
        store.create("b", "").unwrap();

        let snapshot = store.list();
        store.delete(&a.id).unwrap();
        store.create("c", "").unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|r| r.id == a.id));
        assert_eq!(store.list().len(), store.count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_creates_lose_nothing() {
        const N: usize = 500;
        let store = ResourceStore::new();

        let tasks = (0..N)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.create(&format!("n{i}"), "").unwrap().id })
            })
            .collect::<Vec<_>>();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }
        assert_eq!(ids.len(), N);
        assert_eq!(store.count(), N);
        assert_eq!(store.list().len(), N);
    }

    #[test]
    fn list_matches_count_under_writes() {
        let store = ResourceStore::new();
        std::thread::scope(|s| {
            for w in 0..4 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..200 {
                        let res = store.create(&format!("{w}-{i}"), "").unwrap();
                        if i % 3 == 0 {
                            store.delete(&res.id).unwrap();
                        }
                    }
                });
            }
            let reader = store.clone();
            s.spawn(move || {
                for _ in 0..200 {
                    // a snapshot never exposes a half-applied write
                    let listed = reader.list();
                    assert!(listed.iter().all(|r| !r.name.is_empty()));
                    let unique = listed.iter().map(|r| &r.id).collect::<HashSet<_>>();
                    assert_eq!(unique.len(), listed.len());
                }
            });
        });
        assert_eq!(store.list().len(), store.count());
        // 4 writers, 200 creates each, every third deleted
        assert_eq!(store.count(), 4 * (200 - 67));
    }
}
