//! Tests for the endpoint stores.

use std::path::PathBuf;

use letro_core::{EndpointOwner, EndpointStore, FileEndpointStore, InMemoryEndpointStore};
use uuid::Uuid;

fn temp_store_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("letro-core-test-{}", Uuid::new_v4()))
        .join("endpoints.json")
}

/// 1. Test: In-Memory Store Keys By Owner
/// Verifies that the unassigned owner and accounts keep separate node ids.
/// Why: The server endpoint and account endpoints must never overwrite each other.
#[tokio::test]
async fn test_in_memory_store_keys_by_owner() {
    let store = InMemoryEndpointStore::new();
    let account = EndpointOwner::Account("account-1".to_string());

    store
        .save_first_party_node_id(&EndpointOwner::Unassigned, "fp-server")
        .await
        .unwrap();
    store.save_first_party_node_id(&account, "fp-1").await.unwrap();

    assert_eq!(
        store
            .first_party_node_id(&EndpointOwner::Unassigned)
            .await
            .unwrap()
            .as_deref(),
        Some("fp-server")
    );
    assert_eq!(
        store.first_party_node_id(&account).await.unwrap().as_deref(),
        Some("fp-1")
    );
    assert_eq!(store.server_third_party_node_id().await.unwrap(), None);
}

/// 2. Test: File Store Survives Reopen
/// Verifies that node ids written to a file store are read back by a new instance.
/// Why: Endpoints must be recovered across process restarts.
#[tokio::test]
async fn test_file_store_survives_reopen() {
    let path = temp_store_path();
    let account = EndpointOwner::Account("account-1".to_string());

    {
        let store = FileEndpointStore::open(&path).await.unwrap();
        store.save_first_party_node_id(&account, "fp-1").await.unwrap();
        store.save_server_third_party_node_id("srv-1").await.unwrap();
    }

    let reopened = FileEndpointStore::open(&path).await.unwrap();
    assert_eq!(
        reopened.first_party_node_id(&account).await.unwrap().as_deref(),
        Some("fp-1")
    );
    assert_eq!(
        reopened.server_third_party_node_id().await.unwrap().as_deref(),
        Some("srv-1")
    );
    assert_eq!(
        reopened
            .first_party_node_id(&EndpointOwner::Unassigned)
            .await
            .unwrap(),
        None
    );

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

/// 3. Test: Missing File Opens Empty
/// Verifies that opening a store whose file does not exist yet succeeds empty
/// and creates nothing until the first write.
/// Why: First launch has no store file.
#[tokio::test]
async fn test_missing_file_opens_empty() {
    let path = temp_store_path();

    let store = FileEndpointStore::open(&path).await.unwrap();

    assert_eq!(store.path(), path.as_path());
    assert_eq!(store.server_third_party_node_id().await.unwrap(), None);
    assert!(!path.exists());
}

/// 4. Test: Corrupt File Is An Error
/// Verifies that a store file with invalid JSON fails to open.
/// Why: Silently starting empty would re-register every endpoint.
#[tokio::test]
async fn test_corrupt_file_is_an_error() {
    let path = temp_store_path();
    let dir = path.parent().unwrap().to_path_buf();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(&path, b"{ not json").unwrap();

    assert!(FileEndpointStore::open(&path).await.is_err());

    let _ = std::fs::remove_dir_all(dir);
}
