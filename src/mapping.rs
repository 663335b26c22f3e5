//! Persistent identity mapping between local users and remote accounts.
//!
//! A mapping is created exactly once, either at first successful remote
//! account creation or when a pre-existing remote account is discovered by
//! email match. It is never re-pointed afterwards; if the remote account
//! disappears out-of-band, lookups by the stored identifier surface a
//! not-found condition instead of silently re-creating a duplicate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::model::RemoteId;

/// Composite key a mapping is unique under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingKey {
    /// Local entity type (e.g. "User").
    pub local_type: String,
    /// Local entity identifier.
    pub local_id: Uuid,
    /// Connector this mapping belongs to.
    pub connector: String,
    /// Name of the external key field (e.g. "user[id]").
    pub external_key: String,
}

impl std::fmt::Display for MappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}/{} via {} as {})",
            self.local_type, self.local_id, self.connector, self.external_key
        )
    }
}

/// A persisted association between a local user and a remote account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub key: MappingKey,
    pub external_id: RemoteId,
}

/// Persistence boundary for identity mappings.
///
/// Uniqueness per [`MappingKey`] is an invariant the store must enforce;
/// duplicate creation is a programming error, not a retryable condition,
/// so there is deliberately no upsert.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Look up the mapping for a key. Returns none-or-one.
    async fn get_mapping(&self, key: &MappingKey) -> SyncResult<Option<IdentityMapping>>;

    /// Insert a new mapping; fails with [`SyncError::DuplicateMapping`] if
    /// one already exists for the same key.
    async fn create_mapping(&self, key: MappingKey, external_id: RemoteId) -> SyncResult<()>;
}

/// In-memory mapping store for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMappingStore {
    mappings: Arc<RwLock<HashMap<MappingKey, RemoteId>>>,
}

impl InMemoryMappingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mappings currently stored.
    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mappings.read().await.is_empty()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn get_mapping(&self, key: &MappingKey) -> SyncResult<Option<IdentityMapping>> {
        let mappings = self.mappings.read().await;
        Ok(mappings.get(key).map(|external_id| IdentityMapping {
            key: key.clone(),
            external_id: *external_id,
        }))
    }

    async fn create_mapping(&self, key: MappingKey, external_id: RemoteId) -> SyncResult<()> {
        let mut mappings = self.mappings.write().await;
        if mappings.contains_key(&key) {
            return Err(SyncError::DuplicateMapping {
                key: key.to_string(),
            });
        }
        mappings.insert(key, external_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(local_id: Uuid) -> MappingKey {
        MappingKey {
            local_type: "User".into(),
            local_id,
            connector: "analytics".into(),
            external_key: "user[id]".into(),
        }
    }

    #[tokio::test]
    async fn missing_mapping_is_none() {
        let store = InMemoryMappingStore::new();
        let found = store.get_mapping(&key(Uuid::new_v4())).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryMappingStore::new();
        let k = key(Uuid::new_v4());
        store.create_mapping(k.clone(), 77).await.unwrap();

        let found = store.get_mapping(&k).await.unwrap().unwrap();
        assert_eq!(found.external_id, 77);
        assert_eq!(found.key, k);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryMappingStore::new();
        let k = key(Uuid::new_v4());
        store.create_mapping(k.clone(), 1).await.unwrap();

        match store.create_mapping(k, 2).await {
            Err(SyncError::DuplicateMapping { .. }) => {}
            other => panic!("expected DuplicateMapping, got {other:?}"),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_connectors_do_not_collide() {
        let store = InMemoryMappingStore::new();
        let local_id = Uuid::new_v4();
        let mut a = key(local_id);
        let mut b = key(local_id);
        a.connector = "analytics".into();
        b.connector = "warehouse".into();

        store.create_mapping(a, 10).await.unwrap();
        store.create_mapping(b, 20).await.unwrap();
        assert_eq!(store.len().await, 2);
    }
}
