//! # Saga Store
//!
//! The transaction registry behind the coordinator. Coordinator logic only sees
//! the [`SagaStore`] trait, so the in-memory default can be replaced by a
//! durable implementation.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SagaResult;
use crate::models::SagaTransaction;
use crate::state_machine::SagaStatus;

pub use memory::InMemorySagaStore;

/// Registry of saga transactions keyed by id
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Snapshot of a transaction
    async fn get(&self, saga_id: Uuid) -> SagaResult<Option<SagaTransaction>>;

    /// Insert or replace a transaction
    async fn put(&self, saga: SagaTransaction) -> SagaResult<()>;

    /// Remove a transaction, returning it if it existed
    async fn remove(&self, saga_id: Uuid) -> SagaResult<Option<SagaTransaction>>;

    /// Snapshots of every transaction whose status is in `statuses`
    async fn list_by_status(&self, statuses: &[SagaStatus]) -> SagaResult<Vec<SagaTransaction>>;

    async fn len(&self) -> SagaResult<usize>;

    async fn is_empty(&self) -> SagaResult<bool> {
        Ok(self.len().await? == 0)
    }
}
