//! Request deduplication
//!
//! Concurrent callers asking for the same key share one in-flight request.
//! The entry is dropped as soon as the request settles, so the next call
//! with that key runs a fresh request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

type SharedRequest<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T: Clone> {
    generation: u64,
    request: SharedRequest<T>,
}

struct Registry<T: Clone> {
    next_generation: u64,
    in_flight: HashMap<String, InFlight<T>>,
}

/// Collapses concurrent requests with equal keys into one.
pub struct RequestDeduplicator<T: Clone> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_generation: 0,
                in_flight: HashMap::new(),
            })),
        }
    }

    /// Run `producer` for `key` unless a request with that key is already
    /// in flight, in which case its result is awaited instead.
    ///
    /// `producer` is only invoked when it is going to run. Success and
    /// failure are both shared with every joined caller.
    pub async fn execute<F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let request = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = registry.in_flight.get(key) {
                tracing::trace!(key = %key, "Joining in-flight request");
                existing.request.clone()
            } else {
                registry.next_generation += 1;
                let generation = registry.next_generation;
                let request = Self::settle_and_release(
                    Arc::clone(&self.registry),
                    key.to_string(),
                    generation,
                    producer(),
                );
                registry.in_flight.insert(
                    key.to_string(),
                    InFlight {
                        generation,
                        request: request.clone(),
                    },
                );
                request
            }
        };

        request.await
    }

    fn settle_and_release(
        registry: Arc<Mutex<Registry<T>>>,
        key: String,
        generation: u64,
        request: impl Future<Output = Result<T>> + Send + 'static,
    ) -> SharedRequest<T> {
        async move {
            let result = request.await;
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            // A newer request may have taken the key after this one was released
            if registry
                .in_flight
                .get(&key)
                .is_some_and(|entry| entry.generation == generation)
            {
                registry.in_flight.remove(&key);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Whether a request with `key` is currently in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .len()
    }

    /// Forget every in-flight entry. Requests already running still finish
    /// for the callers awaiting them.
    pub fn clear(&self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .clear();
    }
}

/// Stable key for `operation` called with `params`.
///
/// Parameters are rendered as JSON with object keys sorted at every level
/// and null members dropped, so field order and `None` versus absent never
/// produce different keys.
pub fn create_request_key<P: Serialize + ?Sized>(operation: &str, params: &P) -> String {
    match serde_json::to_value(params) {
        Ok(value) => format!("{}:{}", operation, canonical(&value)),
        Err(e) => {
            tracing::warn!(operation = %operation, error = %e, "Unserializable request parameters");
            format!("{}:", operation)
        }
    }
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}
