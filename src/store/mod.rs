//! Endpoint Storage Module
//!
//! Durable key-value persistence of endpoint node ids: one first-party node id
//! per [`EndpointOwner`] and the node id of the server's public endpoint.

pub mod file;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::endpoint::EndpointOwner;
use crate::error::StoreError;

pub use file::FileEndpointStore;

/// Persistence of endpoint node ids.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn first_party_node_id(&self, owner: &EndpointOwner)
        -> Result<Option<String>, StoreError>;

    async fn save_first_party_node_id(
        &self,
        owner: &EndpointOwner,
        node_id: &str,
    ) -> Result<(), StoreError>;

    async fn server_third_party_node_id(&self) -> Result<Option<String>, StoreError>;

    async fn save_server_third_party_node_id(&self, node_id: &str) -> Result<(), StoreError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Non-durable store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryEndpointStore {
    first_party: RwLock<HashMap<EndpointOwner, String>>,
    server_third_party: RwLock<Option<String>>,
}

impl InMemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn first_party_node_id(
        &self,
        owner: &EndpointOwner,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.first_party.read().await.get(owner).cloned())
    }

    async fn save_first_party_node_id(
        &self,
        owner: &EndpointOwner,
        node_id: &str,
    ) -> Result<(), StoreError> {
        self.first_party
            .write()
            .await
            .insert(owner.clone(), node_id.to_string());
        Ok(())
    }

    async fn server_third_party_node_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.server_third_party.read().await.clone())
    }

    async fn save_server_third_party_node_id(&self, node_id: &str) -> Result<(), StoreError> {
        *self.server_third_party.write().await = Some(node_id.to_string());
        Ok(())
    }
}
