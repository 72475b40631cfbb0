//! End-to-end tests for the GemRelay proxy.
//!
//! These drive the real gateway router, client pool, bridge backend and
//! conversation store against an in-process fake bridge, covering session
//! continuity across turns, restarts and maintenance.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use gemrelay_config::{AppConfig, ClientConfig};
use gemrelay_gateway::{AppState, build_router};
use gemrelay_store::{ConversationStore, Retention};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

// ── Fake bridge ──────────────────────────────────────────────────────────

/// Everything the bridge saw, plus counters for issuing session ids.
#[derive(Clone, Default)]
struct Bridge {
    inits: Arc<Mutex<Vec<Value>>>,
    generates: Arc<Mutex<Vec<Value>>>,
}

impl Bridge {
    fn generates(&self) -> Vec<Value> {
        self.generates.lock().unwrap().clone()
    }
}

async fn init(State(bridge): State<Bridge>, Json(body): Json<Value>) -> Json<Value> {
    let mut inits = bridge.inits.lock().unwrap();
    inits.push(body.clone());
    let psid = body["secure_1psid"].as_str().unwrap_or_default();
    Json(json!({ "handle": format!("h-{psid}") }))
}

/// New sessions get a fresh conversation id; resumed ones keep theirs and
/// advance the reply id.
async fn generate(State(bridge): State<Bridge>, Json(body): Json<Value>) -> Json<Value> {
    let mut generates = bridge.generates.lock().unwrap();
    generates.push(body.clone());
    let turn = generates.len();

    let conversation = body["metadata"][0]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| format!("c_{turn}"));

    Json(json!({
        "text": format!("answer {turn}"),
        "metadata": [conversation, format!("r_{turn}")],
    }))
}

async fn spawn_bridge() -> (String, Bridge) {
    let bridge = Bridge::default();
    let app = Router::new()
        .route("/v1/sessions/init", post(init))
        .route("/v1/sessions/generate", post(generate))
        .with_state(bridge.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), bridge)
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn config(bridge_url: &str, dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.api_key = Some("relay-key".into());
    config.remote.bridge_url = bridge_url.into();
    config.remote.clients = ["c0", "c1"]
        .iter()
        .map(|id| ClientConfig {
            id: id.to_string(),
            secure_1psid: format!("{id}-psid"),
            secure_1psidts: format!("{id}-ts"),
        })
        .collect();
    config.storage.path = dir.path().join("conversations");
    config.validate().unwrap();
    config
}

async fn boot(config: AppConfig) -> Arc<AppState> {
    let state = Arc::new(AppState::build(config).unwrap());
    state.pool.init().await.unwrap();
    state
}

async fn chat(state: &Arc<AppState>, messages: Value) -> Value {
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer relay-key")
        .body(Body::from(
            json!({ "model": "gemini-2.5-flash", "messages": messages }).to_string(),
        ))
        .unwrap();

    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn answer(response: &Value) -> String {
    response["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .to_string()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_member_authenticates_with_its_own_cookies() {
    let (url, bridge) = spawn_bridge().await;
    let dir = TempDir::new().unwrap();
    let state = boot(config(&url, &dir)).await;

    let inits = bridge.inits.lock().unwrap().clone();
    assert_eq!(inits.len(), 2);
    let mut psids: Vec<&str> = inits
        .iter()
        .map(|i| i["secure_1psid"].as_str().unwrap())
        .collect();
    psids.sort();
    assert_eq!(psids, vec!["c0-psid", "c1-psid"]);
    assert!(state.pool.status().values().all(|live| *live));
}

#[tokio::test]
async fn conversation_continues_on_the_owning_session() {
    let (url, bridge) = spawn_bridge().await;
    let dir = TempDir::new().unwrap();
    let state = boot(config(&url, &dir)).await;

    let first = chat(&state, json!([{"role": "user", "content": "hi"}])).await;
    assert_eq!(answer(&first), "answer 1");

    let second = chat(
        &state,
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "answer 1"},
            {"role": "user", "content": "tell me more"}
        ]),
    )
    .await;
    assert_eq!(answer(&second), "answer 2");

    let generates = bridge.generates();
    assert_eq!(generates.len(), 2);

    // The first turn carries the whole tagged history on a fresh session.
    assert!(generates[0]["metadata"].is_null());
    assert_eq!(
        generates[0]["prompt"],
        "<|im_start|>user\nhi\n<|im_end|>\n<|im_start|>assistant\n"
    );

    // The second only sends the new turn, on the first turn's session and handle.
    assert_eq!(generates[1]["prompt"], "tell me more");
    assert_eq!(generates[1]["metadata"], json!(["c_1", "r_1"]));
    assert_eq!(generates[1]["handle"], generates[0]["handle"]);
}

#[tokio::test]
async fn unrelated_history_starts_a_new_session() {
    let (url, bridge) = spawn_bridge().await;
    let dir = TempDir::new().unwrap();
    let state = boot(config(&url, &dir)).await;

    chat(&state, json!([{"role": "user", "content": "hi"}])).await;
    chat(
        &state,
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "something else entirely"},
            {"role": "user", "content": "and now?"}
        ]),
    )
    .await;

    let generates = bridge.generates();
    assert!(generates[1]["metadata"].is_null());
    assert!(
        generates[1]["prompt"]
            .as_str()
            .unwrap()
            .contains("<|im_start|>assistant\nsomething else entirely\n<|im_end|>")
    );
}

#[tokio::test]
async fn continuity_survives_a_restart() {
    let (url, bridge) = spawn_bridge().await;
    let dir = TempDir::new().unwrap();

    {
        let state = boot(config(&url, &dir)).await;
        chat(&state, json!([{"role": "user", "content": "hi"}])).await;
        state.store.close();
    }

    let state = boot(config(&url, &dir)).await;
    chat(
        &state,
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "answer 1"},
            {"role": "user", "content": "still there?"}
        ]),
    )
    .await;

    let generates = bridge.generates();
    assert_eq!(generates[1]["prompt"], "still there?");
    assert_eq!(generates[1]["metadata"], json!(["c_1", "r_1"]));
}

#[tokio::test]
async fn rotated_conversations_are_no_longer_resumed() {
    let (url, bridge) = spawn_bridge().await;
    let dir = TempDir::new().unwrap();
    let config = config(&url, &dir);

    {
        let state = boot(config.clone()).await;
        chat(&state, json!([{"role": "user", "content": "hi"}])).await;
        state.store.close();
    }

    {
        let store = ConversationStore::open_path(&config.storage.path).unwrap();
        let dumped = store.dump(&[]).unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0].value["client_id"], "c0");

        let report = store.rotate(Retention::All, chrono::Utc::now()).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.stats().unwrap().fingerprints, 0);
        store.close();
    }

    let state = boot(config).await;
    chat(
        &state,
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "answer 1"},
            {"role": "user", "content": "hello again"}
        ]),
    )
    .await;
    assert!(bridge.generates()[1]["metadata"].is_null());
}

#[tokio::test]
async fn wrong_api_key_never_reaches_the_bridge() {
    let (url, bridge) = spawn_bridge().await;
    let dir = TempDir::new().unwrap();
    let state = boot(config(&url, &dir)).await;

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer guess")
        .body(Body::from(
            json!({
                "model": "gemini-2.5-flash",
                "messages": [{"role": "user", "content": "hi"}]
            })
            .to_string(),
        ))
        .unwrap();
    let response = build_router(state).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(bridge.generates().is_empty());
}
