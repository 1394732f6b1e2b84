//! End-to-end send pipeline tests
//!
//! Drives `ChatOrchestrator` with a real `ChatClient` talking to a
//! `wiremock` provider, so persistence, thinking state and view updates
//! are checked together with the HTTP exchange.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatroom::chat::{ChatOrchestrator, InputState, RejectReason, SendOutcome};
use chatroom::client::{ChatClient, RecordingSleeper, RetryPolicy};
use chatroom::coordinator::{ThinkingCoordinator, DEFAULT_LEASE_TTL};
use chatroom::session::MessageKind;
use chatroom::storage::KeyValueStore;
use chatroom::{ConfigStore, SessionStore};

use common::{completion, configured_store, memory_store, TestView};

struct Harness {
    orchestrator: Arc<ChatOrchestrator>,
    sessions: Arc<SessionStore>,
    view: Arc<TestView>,
    storage: Arc<dyn KeyValueStore>,
}

fn harness_with(config: Arc<ConfigStore>, storage: Arc<dyn KeyValueStore>, streaming: bool) -> Harness {
    let sessions = Arc::new(SessionStore::load(Arc::clone(&storage)).unwrap());
    let coordinator = Arc::new(ThinkingCoordinator::new(
        Arc::clone(&storage),
        DEFAULT_LEASE_TTL,
    ));
    let client = ChatClient::new(Arc::clone(&config))
        .with_policy(RetryPolicy::new(1, Duration::from_millis(10)))
        .with_sleeper(Arc::new(RecordingSleeper::new()));
    let view = TestView::new();
    let orchestrator = ChatOrchestrator::new(
        config,
        Arc::clone(&sessions),
        Arc::new(client),
        coordinator,
        view.clone(),
    )
    .with_streaming(streaming);

    Harness {
        orchestrator: Arc::new(orchestrator),
        sessions,
        view,
        storage,
    }
}

fn harness(server: &MockServer) -> Harness {
    let storage = memory_store();
    let config = configured_store(Arc::clone(&storage), &server.uri());
    harness_with(config, storage, false)
}

#[tokio::test]
async fn test_send_persists_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("hi there")))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    let outcome = h.orchestrator.send("  hello  ").await.unwrap();
    assert!(outcome.is_replied());

    let session = h.sessions.get_current_session().unwrap();
    assert_eq!(session.message_count, 2);
    assert_eq!(session.messages[0].kind, MessageKind::User);
    assert_eq!(session.messages[0].content, "hello");
    assert_eq!(session.messages[1].kind, MessageKind::Ai);
    assert_eq!(session.messages[1].content, "hi there");
    assert_eq!(session.title, "hello");

    assert_eq!(h.view.ai_messages(), vec!["hi there"]);
    assert_eq!(h.view.states().last(), Some(&InputState::Ready));
    assert!(!h.orchestrator.coordinator().is_any_tab_thinking());

    // The transcript survives a reload from the same storage.
    let reloaded = SessionStore::load(Arc::clone(&h.storage)).unwrap();
    assert_eq!(reloaded.get_current_session().unwrap().message_count, 2);
}

#[tokio::test]
async fn test_unconfigured_send_issues_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("never")))
        .expect(0)
        .mount(&server)
        .await;

    let storage = memory_store();
    let config = Arc::new(ConfigStore::load(Arc::clone(&storage)).unwrap());
    let h = harness_with(config, storage, false);

    let outcome = h.orchestrator.send("hello").await.unwrap();
    assert_eq!(outcome, SendOutcome::Rejected(RejectReason::NotConfigured));
    assert_eq!(h.sessions.get_current_session().unwrap().message_count, 0);
    assert_eq!(*h.view.settings_opened.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_failure_leaves_only_user_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness(&server);
    let outcome = h.orchestrator.send("hello").await.unwrap();

    assert!(matches!(outcome, SendOutcome::Failed { kind: "http", .. }));
    let session = h.sessions.get_current_session().unwrap();
    assert_eq!(session.message_count, 1);
    assert_eq!(session.messages[0].kind, MessageKind::User);
    assert_eq!(h.view.errors().len(), 1);
    assert_eq!(h.view.states().last(), Some(&InputState::Ready));
}

#[tokio::test]
async fn test_rate_limit_starts_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    let outcome = h.orchestrator.send("hello").await.unwrap();

    match outcome {
        SendOutcome::Failed { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(h.view.errors()[0].contains("Please wait 30s"));
    assert!(h.orchestrator.cooldown_remaining().is_some());

    // A second send during the countdown is refused without a request.
    let second = h.orchestrator.send("again").await.unwrap();
    assert_eq!(second, SendOutcome::Rejected(RejectReason::CoolingDown));
    h.orchestrator.shutdown();
}

#[tokio::test]
async fn test_reply_lands_in_origin_session_after_switch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late answer"))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let h = harness(&server);
    let origin = h.sessions.get_current_session().unwrap().id;

    let orchestrator = Arc::clone(&h.orchestrator);
    let task = tokio::spawn(async move { orchestrator.send("slow question").await });

    while !h.orchestrator.coordinator().is_session_thinking(&origin) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let other = h.orchestrator.new_session(None).unwrap();
    assert_eq!(other.input_state, InputState::Ready);

    let outcome = task.await.unwrap().unwrap();
    assert!(outcome.is_replied());

    let origin_session = h.sessions.get_session(&origin).unwrap();
    assert_eq!(origin_session.message_count, 2);
    assert_eq!(origin_session.messages[1].content, "late answer");
    assert_eq!(
        h.sessions.get_session(&other.session.id).unwrap().message_count,
        0
    );
    // The displayed session never saw the reply.
    assert!(h.view.ai_messages().is_empty());
}

#[tokio::test]
async fn test_other_window_blocks_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("never")))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server);
    let other_window = Arc::new(ThinkingCoordinator::new(
        Arc::clone(&h.storage),
        DEFAULT_LEASE_TTL,
    ));
    let _busy = other_window.begin("elsewhere").unwrap();

    let outcome = h.orchestrator.send("hello").await.unwrap();
    assert_eq!(outcome, SendOutcome::Rejected(RejectReason::AnotherTabBusy));
    assert_eq!(h.sessions.get_current_session().unwrap().message_count, 0);
}

#[tokio::test]
async fn test_regenerate_resends_last_question() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("answer")))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.orchestrator.send("question").await.unwrap();
    let outcome = h.orchestrator.regenerate().await.unwrap();
    assert!(outcome.is_replied());

    let session = h.sessions.get_current_session().unwrap();
    assert_eq!(session.message_count, 2);
    assert_eq!(session.messages[0].content, "question");

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[1].body_json().unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], "question");
}

#[tokio::test]
async fn test_streaming_send_shows_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"tial\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let storage = memory_store();
    let config = configured_store(Arc::clone(&storage), &server.uri());
    let h = harness_with(config, storage, true);

    let outcome = h.orchestrator.send("stream please").await.unwrap();
    assert!(outcome.is_replied());
    assert_eq!(h.view.deltas(), vec!["par", "tial"]);
    assert_eq!(
        h.sessions.get_current_session().unwrap().messages[1].content,
        "partial"
    );
}
