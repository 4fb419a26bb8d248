//! Saga persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::Result;
use common::{RepositoryError, SagaId};
use tokio::sync::RwLock;

use crate::saga::Saga;
use crate::state::SagaStatus;

/// Stores the latest version of every saga.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Inserts or replaces the saga with the same id.
    async fn save(&self, saga: &Saga) -> Result<()>;

    async fn get(&self, id: SagaId) -> Result<Option<Saga>>;

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>>;

    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>>;
}

#[async_trait]
impl<T: SagaRepository + ?Sized> SagaRepository for Arc<T> {
    async fn save(&self, saga: &Saga) -> Result<()> {
        (**self).save(saga).await
    }

    async fn get(&self, id: SagaId) -> Result<Option<Saga>> {
        (**self).get(id).await
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        (**self).find_by_correlation_id(correlation_id).await
    }

    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>> {
        (**self).list_by_status(status).await
    }
}

#[derive(Debug, Default)]
struct SagaTable {
    sagas: HashMap<SagaId, Saga>,
    history: Option<HashMap<SagaId, Vec<Saga>>>,
    fail_on_save: bool,
}

/// In-memory saga store holding the latest version of each saga.
///
/// Built with [`Self::with_history`], it also keeps every saved version.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaRepository {
    state: Arc<RwLock<SagaTable>>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that records every saved version, for inspecting transitions.
    pub fn with_history() -> Self {
        let table = SagaTable {
            history: Some(HashMap::new()),
            ..SagaTable::default()
        };
        Self {
            state: Arc::new(RwLock::new(table)),
        }
    }

    /// Configures the store to refuse saves.
    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.write().await.fail_on_save = fail;
    }

    /// Every version of the saga in save order. Empty unless the store was
    /// built with [`Self::with_history`].
    pub async fn history(&self, id: SagaId) -> Vec<Saga> {
        self.state
            .read()
            .await
            .history
            .as_ref()
            .and_then(|history| history.get(&id).cloned())
            .unwrap_or_default()
    }

    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn save(&self, saga: &Saga) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_save {
            return Err(RepositoryError::Unavailable("saga store offline".to_string()));
        }
        state.sagas.insert(saga.id, saga.clone());
        if let Some(history) = state.history.as_mut() {
            history.entry(saga.id).or_default().push(saga.clone());
        }
        Ok(())
    }

    async fn get(&self, id: SagaId) -> Result<Option<Saga>> {
        Ok(self.state.read().await.sagas.get(&id).cloned())
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        let state = self.state.read().await;
        let mut sagas: Vec<_> = state
            .sagas
            .values()
            .filter(|s| s.correlation_id == correlation_id)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| s.created_at);
        Ok(sagas)
    }

    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<Saga>> {
        let state = self.state.read().await;
        let mut sagas: Vec<_> = state
            .sagas
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| s.created_at);
        Ok(sagas)
    }
}
