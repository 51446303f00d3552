//! Per-key coalescing of concurrent identical operations.
//!
//! The first caller for a key spawns the operation; callers arriving while it
//! is in flight await the same shared completion handle and receive a clone of
//! its result. The operation runs on its own task, so a caller that stops
//! waiting does not cancel it.

use crate::error::{Error, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{future::Future, hash::Hash, sync::Arc};

type Flight<T> = Shared<BoxFuture<'static, Result<T>>>;

pub struct SingleFlight<K, T> {
    flights: Arc<DashMap<K, Flight<T>>>,
}

impl<K, T> Clone for SingleFlight<K, T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }
}

/// Removes the flight entry once the operation finishes, including on panic
struct Landing<K: Eq + Hash, T> {
    flights: Arc<DashMap<K, Flight<T>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, T> Drop for Landing<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flights.remove(&key);
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` unless an operation for `key` is already in flight, in which
    /// case `work` is dropped unpolled and the in-flight result is awaited instead.
    pub async fn run<F>(&self, key: K, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.join_or_start(key, work).await
    }

    #[cfg(test)]
    pub fn in_flight(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }

    fn join_or_start<F>(&self, key: K, work: F) -> Flight<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(slot) => {
                let landing = Landing {
                    flights: Arc::clone(&self.flights),
                    key: Some(key),
                };
                // the entry guard is held until insert, so the landing cannot
                // remove the slot before it exists
                let handle = tokio::spawn(async move {
                    let _landing = landing;
                    work.await
                });
                let flight = async move {
                    handle
                        .await
                        .unwrap_or_else(|e| Err(Error::Aborted(e.to_string())))
                }
                .boxed()
                .shared();
                slot.insert(flight.clone());
                flight
            }
        }
    }
}
