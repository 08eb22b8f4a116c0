//! Single-flight guard for expensive per-identity work.
//!
//! Concurrent callers asking for the same key while an operation is running
//! await the one shared result instead of starting a duplicate. Results (and
//! errors) are shared only with callers that joined that flight; once it
//! completes the next miss starts a fresh attempt.
//!
//! # Ordering
//!
//! The caller-supplied cache probe runs under the in-flight lock. Flights
//! write their result to the cache before they resolve and are removed only
//! after they resolve, so a caller either joins the running flight or sees
//! the cached value. A completed operation is never repeated.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};

struct Flight<V> {
    id: u64,
    future: Shared<BoxFuture<'static, V>>,
}

/// In-flight operation map keyed by entity identity.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Flight<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { inflight: Mutex::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` for `key` unless a value is cached or a flight is running.
    ///
    /// - `cached`: cache probe, evaluated only when no flight is running
    /// - `start`: builds the operation; called at most once per flight
    pub async fn run<P, F, Fut>(&self, key: K, cached: P, start: F) -> V
    where
        P: FnOnce() -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (id, future) = {
            let mut inflight = self.lock();

            if let Some(flight) = inflight.get(&key) {
                tracing::trace!(flight_id = flight.id, "joining in-flight operation");
                (flight.id, flight.future.clone())
            } else {
                if let Some(value) = cached() {
                    return value;
                }

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = start().boxed().shared();
                inflight.insert(key.clone(), Flight { id, future: future.clone() });
                (id, future)
            }
        };

        let value = future.await;

        // Only the flight we awaited may be removed; a newer one may have
        // replaced it already.
        let mut inflight = self.lock();
        if inflight.get(&key).is_some_and(|flight| flight.id == id) {
            inflight.remove(&key);
        }

        value
    }

    /// Check if an operation for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of running operations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no operation is running.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_operation() {
        let flights: SingleFlight<&str, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let first = {
            let calls = Arc::clone(&calls);
            flights.run("k", || None, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = gate.await;
                42
            })
        };
        let second = {
            let calls = Arc::clone(&calls);
            flights.run("k", || None, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                7
            })
        };
        let opener = async {
            tokio::task::yield_now().await;
            let _ = release.send(());
        };

        let (a, b, ()) = tokio::join!(first, second, opener);

        assert_eq!((a, b), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn cached_value_skips_operation() {
        let flights: SingleFlight<&str, u32> = SingleFlight::new();

        let value = flights.run("k", || Some(5), || async { 9 }).await;

        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn completed_flight_allows_fresh_attempt() {
        let flights: SingleFlight<&str, Result<u32, String>> = SingleFlight::new();

        let failed = flights.run("k", || None, || async { Err("boom".to_owned()) }).await;
        let retried = flights.run("k", || None, || async { Ok(1) }).await;

        assert_eq!(failed, Err("boom".to_owned()));
        assert_eq!(retried, Ok(1));
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();

        let (a, b) = tokio::join!(
            flights.run(1, || None, || async { 10 }),
            flights.run(2, || None, || async { 20 }),
        );

        assert_eq!((a, b), (10, 20));
    }
}
