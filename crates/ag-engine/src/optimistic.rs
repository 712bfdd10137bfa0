//! Optimistic mutation coordinator.
//!
//! `mutate` captures the affected entity, applies the change locally, runs
//! the remote call and then either keeps the optimistic value, replaces it
//! with the server's, or restores the captured snapshot. Failures are never
//! retried here; a repeated user action is a new mutation.
//!
//! Mutations that share a key run one at a time: a second click on the same
//! post waits until the first has settled and snapshots the settled state.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use ag_core::{Result, SyncError};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cell::StateCell;

/// Read/write access to a single entity of a replica, keyed by `K`.
///
/// `write_entity(key, read_entity(key))` must be a no-op.
pub trait Replica<K> {
    type Entity: Clone + Send + 'static;

    fn read_entity(&self, key: &K) -> Self::Entity;
    fn write_entity(&mut self, key: &K, entity: Self::Entity);
}

/// Server answer to a successful remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation<E> {
    /// The optimistic value stands.
    Keep,
    /// The server returned the authoritative entity.
    Replace(E),
}

/// Uniform result handed back to rendering code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub success: bool,
    pub error: Option<SyncError>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: SyncError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

pub struct MutationCoordinator<K> {
    label: &'static str,
    gates: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> MutationCoordinator<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync,
{
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            gates: DashMap::new(),
        }
    }

    fn gate(&self, key: &K) -> Arc<Mutex<()>> {
        self.gates.entry(key.clone()).or_default().clone()
    }

    /// Number of keys with a mutation running or queued.
    pub fn in_flight(&self) -> usize {
        self.gates.len()
    }

    /// `local_apply` must leave the state untouched when it returns `Err`;
    /// its `Ok` value is handed to `remote_call`.
    pub async fn mutate<S, T, L, R, Fut>(
        &self,
        cell: &StateCell<S>,
        key: K,
        local_apply: L,
        remote_call: R,
    ) -> MutationOutcome
    where
        S: Replica<K>,
        L: FnOnce(&mut S) -> Result<T>,
        R: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<Confirmation<S::Entity>>>,
    {
        let gate = self.gate(&key);
        let outcome = {
            let _serialized = gate.lock().await;
            self.run(cell, &key, local_apply, remote_call).await
        };
        drop(gate);
        self.gates.remove_if(&key, |_, g| Arc::strong_count(g) == 1);
        outcome
    }

    async fn run<S, T, L, R, Fut>(&self, cell: &StateCell<S>, key: &K, local_apply: L, remote_call: R) -> MutationOutcome
    where
        S: Replica<K>,
        L: FnOnce(&mut S) -> Result<T>,
        R: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<Confirmation<S::Entity>>>,
    {
        let prepared = cell.update(|state| {
            let snapshot = state.read_entity(key);
            local_apply(state).map(|token| (snapshot, token))
        });
        let (snapshot, token) = match prepared.and_then(|r| r) {
            Ok(v) => v,
            Err(e) => {
                debug!(mutation = self.label, ?key, error = %e, "local apply rejected");
                return MutationOutcome::failed(e);
            }
        };

        let result = remote_call(token).await;

        // A settle write against a disposed cell is refused; report that
        // rather than the remote result.
        let settled = match result {
            Ok(Confirmation::Keep) if cell.is_disposed() => Err(SyncError::Disposed),
            Ok(Confirmation::Keep) => Ok(()),
            Ok(Confirmation::Replace(entity)) => cell.update(|state| state.write_entity(key, entity)),
            Err(e) => {
                if !cell.is_disposed() {
                    warn!(mutation = self.label, ?key, error = %e, "remote call failed, rolling back");
                }
                cell.update(|state| state.write_entity(key, snapshot)).and(Err(e))
            }
        };

        match settled {
            Ok(()) => MutationOutcome::ok(),
            Err(SyncError::Disposed) => {
                debug!(mutation = self.label, ?key, "surface disposed mid-flight, result discarded");
                MutationOutcome::failed(SyncError::Disposed)
            }
            Err(e) => MutationOutcome::failed(e),
        }
    }
}
