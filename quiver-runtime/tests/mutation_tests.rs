//! Mutation Tests
//!
//! Optimistic data is visible while a mutation is in flight and is rolled
//! back once it completes, leaving whatever the server answered.

use quiver_core::{CacheKey, QuiverError, TransportError};
use quiver_test_utils::assertions::assert_string_field;
use quiver_test_utils::fixtures::{self, HeroData, HeroQuery, RenameData, RenameMutation};
use quiver_test_utils::{eventually, MockReply, MockTransport, QuiverClient, RecordingCallback};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

async fn warm_client(transport: &Arc<MockTransport>) -> QuiverClient {
    let client = fixtures::client(transport.clone()).unwrap();
    transport.release(1);
    client.query(HeroQuery::new("EMPIRE")).execute().await.unwrap();
    client
}

fn hero_name(client: &QuiverClient) -> String {
    let record = client.cache().get(&CacheKey::from("2001")).unwrap().unwrap();
    match record.field("name").and_then(|value| value.to_scalar()) {
        Some(serde_json::Value::String(name)) => name,
        other => panic!("unexpected name: {:?}", other),
    }
}

#[tokio::test]
async fn test_mutation_merges_server_result() {
    let transport = Arc::new(
        MockTransport::new()
            .with_body(fixtures::hero_payload())
            .with_body(fixtures::rename_payload("2001", "Droid", "Artoo")),
    );
    let client = warm_client(&transport).await;

    let response = client
        .mutate(RenameMutation::new("2001", "Artoo"))
        .execute()
        .await
        .unwrap();
    assert_eq!(
        response.data.and_then(|data| data.rename_character).map(|c| c.name),
        Some("Artoo".to_string())
    );
    assert_string_field(
        &client.cache().get(&CacheKey::from("2001")).unwrap().unwrap(),
        "name",
        "Artoo",
    );

    // Mutations never read from the store
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].operation_name, "Rename");
    assert_eq!(sent[1].variables.get("name"), Some(&serde_json::json!("Artoo")));
}

#[tokio::test]
async fn test_optimistic_update_is_visible_then_replaced() {
    let transport = Arc::new(
        MockTransport::new()
            .with_body(fixtures::hero_payload())
            .with_body(fixtures::rename_payload("2001", "Droid", "Artoo-Detoo"))
            .gated(),
    );
    let client = warm_client(&transport).await;
    let watched = RecordingCallback::<HeroData>::new();
    let _watcher = client.query(HeroQuery::new("EMPIRE")).watcher(watched.clone());
    assert!(watched.wait_for(1, TIMEOUT).await);

    let mutation = RenameMutation::new("2001", "Artoo");
    let optimistic = mutation.expected("Droid");
    let callback = RecordingCallback::<RenameData>::new();
    client
        .mutate(mutation)
        .optimistic_updates(optimistic)
        .enqueue(callback.clone());

    // In flight: the optimistic layer answers reads and reaches watchers
    assert!(eventually(TIMEOUT, || transport.calls() == 2).await);
    assert_eq!(hero_name(&client), "Artoo");
    assert_eq!(client.cache().optimistic_versions().unwrap().len(), 1);
    assert!(watched.wait_for(2, TIMEOUT).await);

    transport.release(1);
    assert!(callback.wait_for(1, TIMEOUT).await);
    assert_eq!(hero_name(&client), "Artoo-Detoo");
    assert!(client.cache().optimistic_versions().unwrap().is_empty());
    assert!(watched.wait_for(3, TIMEOUT).await);
}

#[tokio::test]
async fn test_failed_mutation_rolls_back_optimistic_data() {
    let transport = Arc::new(MockTransport::new().with_body(fixtures::hero_payload()).gated());
    transport.push(MockReply::Error(TransportError::Http {
        status: 500,
        message: "boom".to_string(),
    }));
    let client = warm_client(&transport).await;

    let mutation = RenameMutation::new("2001", "Artoo");
    let optimistic = mutation.expected("Droid");
    let callback = RecordingCallback::<RenameData>::new();
    client
        .mutate(mutation)
        .optimistic_updates(optimistic)
        .enqueue(callback.clone());

    assert!(eventually(TIMEOUT, || transport.calls() == 2).await);
    assert_eq!(hero_name(&client), "Artoo");

    transport.release(1);
    assert!(callback.wait_for(1, TIMEOUT).await);
    assert!(matches!(
        callback.failures()[0],
        QuiverError::Transport(TransportError::Http { status: 500, .. })
    ));
    assert_eq!(hero_name(&client), "R2-D2");
    assert!(client.cache().optimistic_versions().unwrap().is_empty());
}

#[tokio::test]
async fn test_canceled_mutation_rolls_back_without_callback() {
    let transport = Arc::new(
        MockTransport::new()
            .with_body(fixtures::hero_payload())
            .with_body(fixtures::rename_payload("2001", "Droid", "Artoo"))
            .gated(),
    );
    let client = warm_client(&transport).await;

    let mutation = RenameMutation::new("2001", "Artoo");
    let optimistic = mutation.expected("Droid");
    let callback = RecordingCallback::<RenameData>::new();
    let handle = client
        .mutate(mutation)
        .optimistic_updates(optimistic)
        .enqueue(callback.clone());

    assert!(eventually(TIMEOUT, || transport.calls() == 2).await);
    handle.cancel();
    assert!(eventually(TIMEOUT, || client.cache().optimistic_versions().unwrap().is_empty()).await);
    assert_eq!(hero_name(&client), "R2-D2");
    assert!(!callback.wait_for(1, Duration::from_millis(100)).await);
}
