use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::SagaStore;
use crate::error::SagaResult;
use crate::models::SagaTransaction;
use crate::state_machine::SagaStatus;

/// Concurrent in-memory store; the default registry
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    sagas: DashMap<Uuid, SagaTransaction>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn get(&self, saga_id: Uuid) -> SagaResult<Option<SagaTransaction>> {
        Ok(self.sagas.get(&saga_id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, saga: SagaTransaction) -> SagaResult<()> {
        self.sagas.insert(saga.id, saga);
        Ok(())
    }

    async fn remove(&self, saga_id: Uuid) -> SagaResult<Option<SagaTransaction>> {
        Ok(self.sagas.remove(&saga_id).map(|(_, saga)| saga))
    }

    async fn list_by_status(&self, statuses: &[SagaStatus]) -> SagaResult<Vec<SagaTransaction>> {
        Ok(self
            .sagas
            .iter()
            .filter(|entry| statuses.contains(&entry.value().status))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn len(&self) -> SagaResult<usize> {
        Ok(self.sagas.len())
    }
}
