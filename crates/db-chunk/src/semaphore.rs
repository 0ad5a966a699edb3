use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Lazily creates and hands out one weighted semaphore per table name,
/// capping the number of in-flight statements against any single
/// table at `max_connections_per_table` regardless of how many
/// pipelines are writing to it concurrently.
///
/// Acquired permits are concurrency-safe to hold across `.await`
/// points; only creation/lookup is guarded by the internal mutex.
#[derive(Debug)]
pub struct SemaphoreRegistry {
    capacity: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SemaphoreRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    pub fn semaphore_for(&self, table: &str) -> Arc<Semaphore> {
        let mut guard = self.semaphores.lock().expect("semaphore registry poisoned");
        guard
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.capacity)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_the_same_semaphore_for_a_table() {
        let registry = SemaphoreRegistry::new(4);
        let a = registry.semaphore_for("host");
        let b = registry.semaphore_for("host");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_tables_get_independent_semaphores() {
        let registry = SemaphoreRegistry::new(4);
        let a = registry.semaphore_for("host");
        let b = registry.semaphore_for("service");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn caps_concurrent_permits_at_capacity() {
        let registry = SemaphoreRegistry::new(2);
        let sem = registry.semaphore_for("host");

        let _p1 = sem.clone().acquire_owned().await.unwrap();
        let _p2 = sem.clone().acquire_owned().await.unwrap();

        assert_eq!(sem.available_permits(), 0);
    }
}
