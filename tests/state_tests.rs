//! Integration tests for the file state backend.

mod common;

use common::{prior_state, resource, scope};
use intentrun::state::{FileStateStorage, StateStorage};
use intentrun::Error;
use serde_json::json;

#[tokio::test]
async fn test_file_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStorage::with_path(dir.path().to_path_buf()).unwrap();

    assert!(store.get_latest(&scope()).await.unwrap().is_none());

    let state = prior_state(vec![resource("jack", json!({"a": 1}), &[])], 1);
    store.apply(&state).await.unwrap();

    let loaded = store.get_latest(&scope()).await.unwrap().unwrap();
    assert_eq!(loaded, state);
}

#[tokio::test]
async fn test_file_backend_rejects_stale_serial() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStorage::with_path(dir.path().to_path_buf()).unwrap();

    let state = prior_state(vec![], 3);
    store.apply(&state).await.unwrap();

    let stale = prior_state(vec![], 3);
    let err = store.apply(&stale).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let newer = prior_state(vec![], 4);
    store.apply(&newer).await.unwrap();
    assert_eq!(store.get_latest(&scope()).await.unwrap().unwrap().serial, 4);
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStorage::with_path(dir.path().to_path_buf()).unwrap();

    let mut other = prior_state(vec![], 9);
    other.stack = "other-stack".to_string();
    store.apply(&other).await.unwrap();

    assert!(store.get_latest(&scope()).await.unwrap().is_none());
}
