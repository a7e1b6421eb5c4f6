use crate::models::{MenuQueryParam, MenuRecord};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("menu backend unavailable: {0}")]
    Unavailable(String),
}

/// MenuRepository
///
/// The business-layer seam the menu handlers read through. Records come back flat and in
/// no particular order; shaping them into trees is the handler's job.
#[async_trait]
pub trait MenuRepository: Send + Sync {
    async fn query(&self, params: &MenuQueryParam) -> Result<Vec<MenuRecord>, RepositoryError>;
    async fn get(&self, record_id: &str) -> Result<Option<MenuRecord>, RepositoryError>;
}

/// MenuRepositoryState
///
/// Shared handle to the menu repository held in the application state.
pub type MenuRepositoryState = Arc<dyn MenuRepository>;

/// InMemoryMenuRepository
///
/// Menu records held in process memory, seeded at startup or by tests.
#[derive(Default)]
pub struct InMemoryMenuRepository {
    records: RwLock<Vec<MenuRecord>>,
}

impl InMemoryMenuRepository {
    pub fn new(records: Vec<MenuRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl MenuRepository for InMemoryMenuRepository {
    async fn query(&self, params: &MenuQueryParam) -> Result<Vec<MenuRecord>, RepositoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| RepositoryError::Unavailable("menu store lock poisoned".to_string()))?;

        Ok(records
            .iter()
            .filter(|r| {
                params
                    .name
                    .as_deref()
                    .is_none_or(|name| r.name.contains(name))
            })
            .filter(|r| params.hidden.is_none_or(|hidden| r.hidden == hidden))
            .filter(|r| {
                params
                    .parent_id
                    .as_deref()
                    .is_none_or(|parent| r.parent_id.as_deref() == Some(parent))
            })
            .cloned()
            .collect())
    }

    async fn get(&self, record_id: &str) -> Result<Option<MenuRecord>, RepositoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| RepositoryError::Unavailable("menu store lock poisoned".to_string()))?;

        Ok(records.iter().find(|r| r.record_id == record_id).cloned())
    }
}
