//! Collapse concurrent identical requests onto one in-flight computation.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-key single-flight gate.
///
/// The first caller for a key starts the work; callers arriving while it
/// runs await the same shared future and receive a clone of its output.
/// Once finished the slot is cleared, so the next call recomputes.
///
/// The work future is `'static` and survives its starter being dropped:
/// any remaining waiter (or the next caller) keeps driving it.
pub struct SingleFlight<K, V>
where
    V: Clone,
{
    inflight: Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                // A finished future still in the map is stale.
                Some(existing) if existing.peek().is_none() => {
                    debug!(key = ?key, "joining in-flight computation");
                    existing.clone()
                }
                _ => {
                    let flight = make().boxed().shared();
                    inflight.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };

        let output = flight.clone().await;

        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(&key)
            .map(|current| current.ptr_eq(&flight))
            .unwrap_or(false)
        {
            inflight.remove(&key);
        }
        output
    }

    /// Number of keys with work currently registered.
    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
