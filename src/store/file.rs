//! JSON-file backed endpoint store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use super::EndpointStore;
use crate::endpoint::EndpointOwner;
use crate::error::StoreError;

/// On-disk document. Keys of `first_party` come from [`EndpointOwner::storage_key`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    first_party: BTreeMap<String, String>,
    #[serde(default)]
    server_third_party: Option<String>,
}

/// Store persisting node ids to a JSON file.
///
/// Each write replaces the file atomically (temp file + rename).
pub struct FileEndpointStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
}

impl FileEndpointStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened endpoint store at {}", path.display());
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for FileEndpointStore {
    async fn first_party_node_id(
        &self,
        owner: &EndpointOwner,
    ) -> Result<Option<String>, StoreError> {
        let document = self.document.read().await;
        Ok(document.first_party.get(&owner.storage_key()).cloned())
    }

    async fn save_first_party_node_id(
        &self,
        owner: &EndpointOwner,
        node_id: &str,
    ) -> Result<(), StoreError> {
        let mut document = self.document.write().await;
        let mut updated = document.clone();
        updated
            .first_party
            .insert(owner.storage_key(), node_id.to_string());
        self.persist(&updated).await?;
        *document = updated;
        Ok(())
    }

    async fn server_third_party_node_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.document.read().await.server_third_party.clone())
    }

    async fn save_server_third_party_node_id(&self, node_id: &str) -> Result<(), StoreError> {
        let mut document = self.document.write().await;
        let mut updated = document.clone();
        updated.server_third_party = Some(node_id.to_string());
        self.persist(&updated).await?;
        *document = updated;
        Ok(())
    }
}
