use agentry::client_wrapper::Message;
use agentry::session_store::SessionStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_requests_share_one_entry_per_correlation_id() {
    let store = Arc::new(SessionStore::new());
    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let (memory, cid) = store.get_or_create("agent", Some("shared"));
            memory.lock().await.add_user(format!("message {}", i));
            cid
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), "shared");
    }

    assert_eq!(store.len(), 1);
    let (memory, _) = store.get_or_create("agent", Some("shared"));
    assert_eq!(memory.lock().await.messages().len(), 16);
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let store = SessionStore::new();
    let (_, a) = store.get_or_create("agent", None);
    let (_, b) = store.get_or_create("agent", None);
    assert_ne!(a, b);
    assert!(uuid::Uuid::parse_str(&a).is_ok());
}

#[tokio::test]
async fn test_memory_handle_outlives_eviction() {
    let store = SessionStore::new().with_retention(Duration::from_millis(20));
    let (memory, cid) = store.get_or_create("agent", None);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(store.sweep_expired(), 1);

    // a turn already holding the handle keeps working on its copy
    memory.lock().await.add_user("still here");
    assert_eq!(memory.lock().await.last_message(), Some(&Message::user("still here")));

    // the id now starts a fresh conversation
    let (fresh, same) = store.get_or_create("agent", Some(&cid));
    assert_eq!(same, cid);
    assert!(fresh.lock().await.is_empty());
}

#[test]
fn test_new_memories_use_configured_budget() {
    let store = SessionStore::new().with_token_budget(42);
    let (memory, _) = store.get_or_create("agent", None);
    assert_eq!(memory.try_lock().unwrap().token_budget(), 42);
}
