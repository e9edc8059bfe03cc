//! # In-Flight Execution Registry
//!
//! Shared map of running forward and compensating executions keyed by
//! `(saga_id, step_name)`. Every way an execution can end (natural completion,
//! timeout, cancellation, shutdown) goes through removing its record, and only
//! the caller that removes it may report an outcome. That makes exactly one
//! notification per execution.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::messages::{ExecutionKey, ExecutionKind};

/// One registered execution
///
/// Dropping the record drops its cancel sender, which wakes the worker.
#[derive(Debug)]
pub struct InFlightExecution {
    pub execution_id: Uuid,
    pub kind: ExecutionKind,
    pub started_at: Instant,
    pub timeout: Duration,
    cancel: Option<oneshot::Sender<()>>,
}

impl InFlightExecution {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Signal the worker explicitly; dropping the record has the same effect
    pub fn cancel(mut self) {
        if let Some(sender) = self.cancel.take() {
            let _ = sender.send(());
        }
    }
}

/// Snapshot of an in-flight record for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightSnapshot {
    pub key: ExecutionKey,
    pub execution_id: Uuid,
    pub kind: ExecutionKind,
    pub elapsed: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
pub struct InFlightRegistry {
    executions: DashMap<ExecutionKey, InFlightExecution>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution; `None` if one already exists for `key`
    pub fn register(
        &self,
        key: ExecutionKey,
        kind: ExecutionKind,
        timeout: Duration,
    ) -> Option<(Uuid, oneshot::Receiver<()>)> {
        match self.executions.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                let execution_id = Uuid::new_v4();
                vacant.insert(InFlightExecution {
                    execution_id,
                    kind,
                    started_at: Instant::now(),
                    timeout,
                    cancel: Some(cancel_tx),
                });
                Some((execution_id, cancel_rx))
            }
        }
    }

    /// Natural completion: remove the record iff it is still this execution's
    pub fn complete(&self, key: &ExecutionKey, execution_id: Uuid) -> Option<InFlightExecution> {
        self.executions
            .remove_if(key, |_, record| record.execution_id == execution_id)
            .map(|(_, record)| record)
    }

    /// Timeout check: remove the record iff it is still this execution's and its budget is spent
    pub fn expire(&self, key: &ExecutionKey, execution_id: Uuid) -> Option<InFlightExecution> {
        self.executions
            .remove_if(key, |_, record| {
                record.execution_id == execution_id && record.is_expired()
            })
            .map(|(_, record)| record)
    }

    /// Remove and cancel whatever runs under `key`
    pub fn cancel(&self, key: &ExecutionKey) -> bool {
        match self.executions.remove(key) {
            Some((_, record)) => {
                record.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove and cancel every execution belonging to `saga_id`
    pub fn cancel_saga(&self, saga_id: Uuid) -> usize {
        let keys: Vec<ExecutionKey> = self
            .executions
            .iter()
            .filter(|entry| entry.key().saga_id == saga_id)
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    /// Remove every expired record, returning what was removed
    pub fn drain_expired(&self) -> Vec<(ExecutionKey, InFlightExecution)> {
        let expired: Vec<(ExecutionKey, Uuid)> = self
            .executions
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| (entry.key().clone(), entry.value().execution_id))
            .collect();

        expired
            .into_iter()
            .filter_map(|(key, execution_id)| {
                self.expire(&key, execution_id).map(|record| (key, record))
            })
            .collect()
    }

    /// Remove and cancel everything
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<ExecutionKey> = self
            .executions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    pub fn contains(&self, key: &ExecutionKey) -> bool {
        self.executions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn snapshot(&self) -> Vec<InFlightSnapshot> {
        self.executions
            .iter()
            .map(|entry| InFlightSnapshot {
                key: entry.key().clone(),
                execution_id: entry.value().execution_id,
                kind: entry.value().kind,
                elapsed: entry.value().elapsed(),
                timeout: entry.value().timeout,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(step: &str) -> ExecutionKey {
        ExecutionKey::new(Uuid::nil(), step)
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let registry = InFlightRegistry::new();
        let first = registry.register(key("reserve"), ExecutionKind::Forward, Duration::from_secs(1));
        assert!(first.is_some());
        let second =
            registry.register(key("reserve"), ExecutionKind::Forward, Duration::from_secs(1));
        assert!(second.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_only_first_remover_wins() {
        let registry = InFlightRegistry::new();
        let (execution_id, _cancel) = registry
            .register(key("reserve"), ExecutionKind::Forward, Duration::ZERO)
            .unwrap();

        assert!(registry.expire(&key("reserve"), execution_id).is_some());
        assert!(registry.complete(&key("reserve"), execution_id).is_none());
    }

    #[test]
    fn test_stale_execution_id_does_not_remove_newer_record() {
        let registry = InFlightRegistry::new();
        let (old_id, _old) = registry
            .register(key("reserve"), ExecutionKind::Forward, Duration::from_secs(5))
            .unwrap();
        assert!(registry.complete(&key("reserve"), old_id).is_some());

        let (new_id, _new) = registry
            .register(key("reserve"), ExecutionKind::Forward, Duration::from_secs(5))
            .unwrap();
        assert!(registry.complete(&key("reserve"), old_id).is_none());
        assert!(registry.contains(&key("reserve")));
        assert!(registry.complete(&key("reserve"), new_id).is_some());
    }

    #[test]
    fn test_expire_respects_budget() {
        let registry = InFlightRegistry::new();
        let (execution_id, _cancel) = registry
            .register(key("reserve"), ExecutionKind::Forward, Duration::from_secs(60))
            .unwrap();
        assert!(registry.expire(&key("reserve"), execution_id).is_none());
        assert!(registry.drain_expired().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_wakes_worker() {
        let registry = InFlightRegistry::new();
        let (_, cancel_rx) = registry
            .register(key("reserve"), ExecutionKind::Forward, Duration::from_secs(60))
            .unwrap();
        let (_, other_rx) = registry
            .register(key("charge"), ExecutionKind::Compensation, Duration::from_secs(60))
            .unwrap();

        assert_eq!(registry.cancel_saga(Uuid::nil()), 2);
        assert!(cancel_rx.await.is_ok());
        assert!(other_rx.await.is_ok());
        assert!(registry.is_empty());
    }
}
