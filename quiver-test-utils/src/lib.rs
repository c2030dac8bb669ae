//! Quiver Test Utilities
//!
//! Shared test infrastructure for the Quiver workspace:
//! - Operation fixtures modeled on the classic hero schema
//! - A scripted mock transport and a recording callback
//! - Proptest generators for records and field values
//! - Custom assertions for Quiver-specific validation

pub use quiver_core::{
    Argument, CacheKey, FetchPolicy, FieldValue, IdKeyResolver, Operation, OperationKind,
    OperationPayload, QuiverError, QuiverResult, Record, Response, ResponseField, Selection,
    TransportError, Variables,
};
pub use quiver_runtime::{CallCallback, QuiverClient, Transport};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Body(Vec<u8>),
    Error(TransportError),
}

/// Transport that replays scripted replies in order.
///
/// The last reply repeats once the script runs out of others. A gated
/// transport holds every send until [`MockTransport::release`] is called,
/// which lets tests cancel calls while they are in flight.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<OperationPayload>>,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
    disposed: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON body.
    pub fn with_body(self, body: JsonValue) -> Self {
        self.push(MockReply::Body(body.to_string().into_bytes()));
        self
    }

    /// Queue raw body bytes.
    pub fn with_raw(self, body: impl Into<Vec<u8>>) -> Self {
        self.push(MockReply::Body(body.into()));
        self
    }

    /// Queue a transport failure.
    pub fn with_error(self, error: TransportError) -> Self {
        self.push(MockReply::Error(error));
        self
    }

    /// Hold sends until released.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Append a reply after construction.
    pub fn push(&self, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Replace the whole script with a single JSON body.
    pub fn reply_with(&self, body: JsonValue) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.clear();
            replies.push_back(MockReply::Body(body.to_string().into_bytes()));
        }
    }

    /// Let `sends` gated sends through.
    pub fn release(&self, sends: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(sends);
        }
    }

    /// Number of sends started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads of completed sends, in order.
    pub fn sent(&self) -> Vec<OperationPayload> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> MockReply {
        let mut replies = match self.replies.lock() {
            Ok(replies) => replies,
            Err(poisoned) => poisoned.into_inner(),
        };
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply.unwrap_or_else(|| {
            MockReply::Error(TransportError::Unavailable {
                reason: "no scripted reply".to_string(),
            })
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, payload: &OperationPayload) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| TransportError::Unavailable { reason: e.to_string() })?
                .forget();
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload.clone());
        }
        match self.next_reply() {
            MockReply::Body(body) => Ok(body),
            MockReply::Error(error) => Err(error),
        }
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// RECORDING CALLBACK
// ============================================================================

/// Callback that records every delivery. Clones share the recording.
pub struct RecordingCallback<D> {
    events: Arc<Mutex<Vec<QuiverResult<Response<D>>>>>,
    count: Arc<watch::Sender<usize>>,
}

impl<D> Clone for RecordingCallback<D> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            count: self.count.clone(),
        }
    }
}

impl<D> Default for RecordingCallback<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> RecordingCallback<D> {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(count),
        }
    }

    fn record(&self, event: QuiverResult<Response<D>>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        self.count.send_modify(|count| *count += 1);
    }

    /// Number of deliveries so far.
    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` deliveries arrived. Returns `false` on
    /// timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let mut receiver = self.count.subscribe();
        tokio::time::timeout(timeout, receiver.wait_for(|delivered| *delivered >= count))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }
}

impl<D: Clone> RecordingCallback<D> {
    /// Every delivery so far, in order.
    pub fn events(&self) -> Vec<QuiverResult<Response<D>>> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Successful deliveries so far.
    pub fn responses(&self) -> Vec<Response<D>> {
        self.events().into_iter().filter_map(Result::ok).collect()
    }

    /// Failed deliveries so far.
    pub fn failures(&self) -> Vec<QuiverError> {
        self.events().into_iter().filter_map(Result::err).collect()
    }
}

impl<D: Send + 'static> CallCallback<D> for RecordingCallback<D> {
    fn on_response(&self, response: Response<D>) {
        self.record(Ok(response));
    }

    fn on_failure(&self, error: QuiverError) {
        self.record(Err(error));
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Quiver types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a plain field name.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9]{0,10}"
    }

    /// Generate a record key.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        "[0-9]{1,5}".prop_map(CacheKey::new)
    }

    /// Generate a scalar field value.
    pub fn arb_scalar_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::Boolean),
            any::<i64>().prop_map(FieldValue::from),
            "[a-zA-Z0-9 ]{0,20}".prop_map(FieldValue::String),
        ]
    }

    /// Generate a field value, including references and nested lists.
    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        let leaf = prop_oneof![
            4 => arb_scalar_value(),
            1 => arb_cache_key().prop_map(FieldValue::Reference),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(FieldValue::List)
        })
    }

    /// Generate a record with up to eight fields.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            arb_cache_key(),
            prop::collection::btree_map(arb_field_name(), arb_field_value(), 0..8),
        )
            .prop_map(|(key, fields)| {
                fields
                    .into_iter()
                    .fold(Record::new(key), |record, (name, value)| record.with_field(name, value))
            })
    }

    /// Generate a FetchPolicy variant.
    pub fn arb_fetch_policy() -> impl Strategy<Value = FetchPolicy> {
        prop_oneof![
            Just(FetchPolicy::CacheOnly),
            Just(FetchPolicy::CacheFirst),
            Just(FetchPolicy::NetworkOnly),
            Just(FetchPolicy::NetworkFirst),
            Just(FetchPolicy::CacheAndNetwork),
        ]
    }

    /// Generate a character name.
    pub fn arb_character_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,8}( [A-Z][a-z]{2,8})?"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Operations and payloads around a small hero schema.

    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct Friend {
        #[serde(rename = "__typename")]
        pub typename: String,
        pub id: String,
        pub name: String,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct Hero {
        #[serde(rename = "__typename")]
        pub typename: String,
        pub id: String,
        pub name: String,
        #[serde(default)]
        pub friends: Option<Vec<Friend>>,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct HeroData {
        pub hero: Option<Hero>,
    }

    /// `query Hero($episode: Episode) { hero(episode: $episode) { ... } }`
    #[derive(Debug, Clone)]
    pub struct HeroQuery {
        pub episode: Option<String>,
    }

    impl HeroQuery {
        pub fn new(episode: impl Into<String>) -> Self {
            Self {
                episode: Some(episode.into()),
            }
        }
    }

    impl Operation for HeroQuery {
        type Data = HeroData;

        fn operation_id(&self) -> &str {
            "hero-query-v1"
        }

        fn name(&self) -> &str {
            "Hero"
        }

        fn document(&self) -> &str {
            "query Hero($episode: Episode) { hero(episode: $episode) { __typename id name friends { __typename id name } } }"
        }

        fn variables(&self) -> Variables {
            let mut variables = Variables::new();
            if let Some(episode) = &self.episode {
                variables.insert("episode".to_string(), JsonValue::String(episode.clone()));
            }
            variables
        }

        fn fields(&self) -> Selection {
            vec![ResponseField::object(
                "hero",
                vec![
                    ResponseField::typename(),
                    ResponseField::id("id").non_null(),
                    ResponseField::string("name").non_null(),
                    ResponseField::object_list("friends", character_fields()),
                ],
            )
            .argument("episode", Argument::variable("episode"))]
            .into()
        }
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct RenameData {
        #[serde(rename = "renameCharacter")]
        pub rename_character: Option<Friend>,
    }

    /// `mutation Rename($id: ID!, $name: String!) { renameCharacter(...) { ... } }`
    #[derive(Debug, Clone)]
    pub struct RenameMutation {
        pub id: String,
        pub name: String,
    }

    impl RenameMutation {
        pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
            }
        }

        /// Data the server is expected to answer with.
        pub fn expected(&self, typename: &str) -> serde_json::Map<String, JsonValue> {
            let data = json!({
                "renameCharacter": {"__typename": typename, "id": self.id, "name": self.name}
            });
            data.as_object().cloned().unwrap_or_default()
        }
    }

    impl Operation for RenameMutation {
        type Data = RenameData;

        fn operation_id(&self) -> &str {
            "rename-mutation-v1"
        }

        fn name(&self) -> &str {
            "Rename"
        }

        fn document(&self) -> &str {
            "mutation Rename($id: ID!, $name: String!) { renameCharacter(id: $id, name: $name) { __typename id name } }"
        }

        fn kind(&self) -> OperationKind {
            OperationKind::Mutation
        }

        fn variables(&self) -> Variables {
            let mut variables = Variables::new();
            variables.insert("id".to_string(), JsonValue::String(self.id.clone()));
            variables.insert("name".to_string(), JsonValue::String(self.name.clone()));
            variables
        }

        fn fields(&self) -> Selection {
            vec![ResponseField::object("renameCharacter", character_fields())
                .argument("id", Argument::variable("id"))
                .argument("name", Argument::variable("name"))]
            .into()
        }
    }

    fn character_fields() -> Vec<ResponseField> {
        vec![
            ResponseField::typename(),
            ResponseField::id("id").non_null(),
            ResponseField::string("name").non_null(),
        ]
    }

    /// R2-D2 with Luke and Han as friends.
    pub fn hero_payload() -> JsonValue {
        hero_payload_named("R2-D2")
    }

    pub fn hero_payload_named(name: &str) -> JsonValue {
        json!({
            "data": {
                "hero": {
                    "__typename": "Droid",
                    "id": "2001",
                    "name": name,
                    "friends": [
                        {"__typename": "Human", "id": "1000", "name": "Luke Skywalker"},
                        {"__typename": "Human", "id": "1002", "name": "Han Solo"}
                    ]
                }
            }
        })
    }

    /// Server answer to a [`RenameMutation`].
    pub fn rename_payload(id: &str, typename: &str, name: &str) -> JsonValue {
        json!({
            "data": {
                "renameCharacter": {"__typename": typename, "id": id, "name": name}
            }
        })
    }

    /// Client over `transport` keyed by `id`, on the current runtime.
    pub fn client(transport: Arc<MockTransport>) -> QuiverResult<QuiverClient> {
        QuiverClient::builder()
            .with_transport(transport)
            .with_key_resolver(Arc::new(IdKeyResolver::new("id")))
            .build()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Quiver-specific validation.

    use super::*;

    /// Assert that a record field holds a string.
    #[track_caller]
    pub fn assert_string_field(record: &Record, field_key: &str, expected: &str) {
        match record.field(field_key) {
            Some(FieldValue::String(value)) => assert_eq!(value, expected, "Wrong value in {}.{}", record.key(), field_key),
            other => panic!("Expected string in {}.{}, got: {:?}", record.key(), field_key, other),
        }
    }

    /// Assert that a record field references `expected`.
    #[track_caller]
    pub fn assert_reference(record: &Record, field_key: &str, expected: &str) {
        match record.field(field_key).and_then(FieldValue::as_reference) {
            Some(key) => assert_eq!(key.as_str(), expected, "Wrong reference in {}.{}", record.key(), field_key),
            None => panic!("Expected reference in {}.{}, got: {:?}", record.key(), field_key, record.field(field_key)),
        }
    }

    /// Assert that a result failed with a transport error.
    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &QuiverResult<T>) {
        match result {
            Err(QuiverError::Transport(_)) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    /// Assert that a result failed with a decode error.
    #[track_caller]
    pub fn assert_decode_error<T: std::fmt::Debug>(result: &QuiverResult<T>) {
        match result {
            Err(QuiverError::Decode(_)) => {}
            other => panic!("Expected Decode error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
