//! User Story Integration Tests
//!
//! These tests trace complete user workflows with logging to verify
//! the system behaves correctly from the user's perspective.
//!
//! Each story drives a `ChatEngine` through the real HTTP client against a
//! mock backend.

use chatdeck::attachment::Attachment;
use chatdeck::client::ApiClient;
use chatdeck::engine::ERROR_MARKER;
use chatdeck::models::Provider;
use chatdeck::transcript::Sender;
use chatdeck::{ChatEngine, ChatMode, EngineOptions, StreamOutcome};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test helper to capture and display trace logs
struct TestTracer {
    name: String,
    logs: Vec<String>,
}

impl TestTracer {
    fn new(name: &str) -> Self {
        eprintln!("\n╔═══════════════════════════════════════════════════════════════");
        eprintln!("║ USER STORY: {}", name);
        eprintln!("╚═══════════════════════════════════════════════════════════════\n");
        Self {
            name: name.to_string(),
            logs: vec![],
        }
    }

    fn step(&mut self, description: &str) {
        let msg = format!("  → {}", description);
        eprintln!("{}", msg);
        self.logs.push(msg);
    }

    fn expect(&mut self, condition: bool, description: &str) {
        let status = if condition { "✓" } else { "✗" };
        let msg = format!("    {} {}", status, description);
        eprintln!("{}", msg);
        self.logs.push(msg);
        assert!(condition, "FAILED: {}", description);
    }

    fn done(&self) {
        eprintln!("\n  ══════════════════════════════════════════════════════");
        eprintln!("  ✓ Story completed: {} ({} steps)", self.name, self.logs.len());
        eprintln!();
    }
}

fn engine() -> ChatEngine {
    ChatEngine::new(EngineOptions {
        user_id: "story-user".into(),
        ..Default::default()
    })
}

// ═══════════════════════════════════════════════════════════════
// STORY: User asks a question and watches the answer stream in
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_ask_and_follow_up_with_context() {
    let mut t = TestTracer::new("Ask, get an answer, follow up with context");
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"message": "Hello", "context": []})))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hi there"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({
            "message": "And you?",
            "context": [{"user_message": "Hello", "assistant_message": "Hi there"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("Doing well"))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let mut engine = engine();

    t.step("User types 'Hello' and sends it");
    engine.set_input("Hello");
    let outcome = engine.submit(&client, ChatMode::Plain).await.unwrap();

    t.expect(outcome == StreamOutcome::Completed, "Stream completes");
    let messages = engine.transcript().messages();
    t.expect(messages.len() == 2, "Transcript holds question and answer");
    t.expect(messages[0].sender == Sender::User, "First message is the user's");
    t.expect(messages[1].text == "Hi there", "Answer text is 'Hi there'");
    t.expect(!engine.is_loading(), "Loading cleared");

    t.step("User follows up");
    engine.set_input("And you?");
    let outcome = engine.submit(&client, ChatMode::Plain).await.unwrap();
    t.expect(outcome == StreamOutcome::Completed, "Follow-up completes");
    t.expect(
        engine.transcript().last().map(|m| m.text.as_str()) == Some("Doing well"),
        "Backend saw the prior turn as context",
    );

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: Backend fails mid-conversation
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_backend_error_shows_inline() {
    let mut t = TestTracer::new("Backend error appears inline in the reply");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let mut engine = engine();

    t.step("User sends a question while the backend is overloaded");
    engine.set_input("Explain lifetimes");
    let outcome = engine.submit(&client, ChatMode::Chat).await.unwrap();

    t.expect(matches!(outcome, StreamOutcome::Failed(_)), "Outcome is a failure");
    let reply = engine.transcript().last().unwrap();
    t.expect(reply.text.contains(ERROR_MARKER), "Reply carries the error marker");
    t.expect(reply.text.contains("503"), "Reply names the status");
    t.expect(!engine.is_loading(), "User can send again");

    t.step("Empty input is rejected without touching the backend");
    engine.set_input("   ");
    t.expect(
        engine.submit(&client, ChatMode::Plain).await.is_err(),
        "Whitespace-only submit rejected",
    );
    let received = server.received_requests().await.unwrap_or_default();
    t.expect(received.len() == 1, "Only the first request reached the backend");

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: User sends an image
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_image_switches_provider_and_back() {
    let mut t = TestTracer::new("Image attachment borrows an image-capable provider");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"api_type": "openai", "model": "gpt-4.1-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("A cat."))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let mut engine = engine();
    t.expect(
        engine.settings().active().provider == Provider::OpenRouter,
        "Starts on openrouter",
    );

    t.step("User attaches a photo");
    engine.attach(Attachment::from_bytes("cat.png", &[0x89, 0x50, 0x4e, 0x47], "cat.png".into()));
    t.expect(
        engine.settings().active().provider == Provider::OpenAi,
        "Switched to openai",
    );
    t.expect(!engine.take_notices().is_empty(), "User was told about the switch");

    t.step("User asks about the photo");
    engine.set_input("What is this?");
    let outcome = engine.submit(&client, ChatMode::Plain).await.unwrap();
    t.expect(outcome == StreamOutcome::Completed, "Reply completes");

    t.expect(
        engine.settings().active().provider == Provider::OpenRouter,
        "Provider restored after the reply",
    );
    t.expect(
        engine.settings().active().model == "deepseek/deepseek-r1:free",
        "Model restored exactly",
    );

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: User browses history and reopens a session
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_reopen_session_from_history() {
    let mut t = TestTracer::new("Browse history and continue an old session");
    let server = MockServer::start().await;
    let old = "6f1c7c4e-8d2a-4c38-9a53-0b6a1f1d2e3f";

    Mock::given(method("GET"))
        .and(path("/history"))
        .and(query_param("skip", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "session_id": old, "turn_id": 1,
                "user_message": "What is ownership?",
                "assistant_message": "A set of rules.",
                "timestamp": "2024-05-01T10:00:00"
            }],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/history/session/{old}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "session_id": old, "turn_id": 1,
            "user_message": "What is ownership?",
            "assistant_message": "A set of rules.",
            "timestamp": "2024-05-01T10:00:00"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"session_id": old})))
        .respond_with(ResponseTemplate::new(200).set_body_string("Borrowing comes next."))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let mut engine = engine();

    t.step("User opens the history panel");
    engine.history_mut().open(&client).await;
    let items = engine.history().items().to_vec();
    t.expect(items.len() == 1, "One past session listed");
    t.expect(!engine.history().has_more(), "No more pages");
    t.expect(
        items[0].last_message_preview.starts_with("What is ownership"),
        "Preview shows the question",
    );

    t.step("User reopens it");
    let count = engine.load_session(&client, &items[0].session_id).await.unwrap();
    t.expect(count == 2, "Two messages restored");
    t.expect(engine.session_id().to_string() == old, "Session id adopted");

    t.step("User continues the conversation");
    engine.set_input("Then what?");
    let outcome = engine.submit(&client, ChatMode::Plain).await.unwrap();
    t.expect(outcome == StreamOutcome::Completed, "Reply completes in the old session");
    t.expect(engine.transcript().len() == 4, "Transcript grew by one exchange");

    t.done();
}
