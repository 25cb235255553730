//! End-to-end pipeline tests against an in-process mock of the RAGFlow
//! agent API (axum on 127.0.0.1, ephemeral port).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use ragflow_bridge::config::{PipelineConfig, RagFlowConfig};
use ragflow_bridge::pipeline::relay::SESSION_NOT_INITIALIZED;
use ragflow_bridge::{Pipeline, RagFlowPipeline};

const API_KEY: &str = "ragflow-test-key";
const BROKEN_AGENT: &str = "agent-without-sessions";

/// Completion events: cumulative answers, a progress event, a malformed
/// line, a mid-stream `[DONE]`, the reference payload and the terminal event.
const STREAM_BODY: &str = concat!(
    "data: {\"code\":0,\"data\":{\"answer\":\"\",\"reference\":null}}\n\n",
    "data: {\"code\":0,\"data\":{\"answer\":\"Retrieval is running...\"}}\n\n",
    "data: {\"code\":0,\"data\":{\"answer\":\"Hel\"}}\n\n",
    "data: {broken json\n\n",
    "data: {\"code\":0,\"data\":{\"answer\":\"Hello\"}}\n\n",
    "data: [DONE]\n\n",
    "data: {\"code\":0,\"data\":{\"answer\":\"Hello 世界\",\"reference\":{\"chunks\":[",
    "{\"document_id\":\"d1\",\"document_name\":\"Guide.PDF\"},",
    "{\"document_id\":\"d1\",\"document_name\":\"Guide.PDF\"},",
    "{\"document_id\":\"d2\",\"document_name\":\"notes\"}]}}}\n\n",
    "data: {\"code\":0,\"data\":true}\n\n",
);

// ── Mock backend ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockBackend {
    sessions_created: AtomicUsize,
    completions: Mutex<Vec<Value>>,
    auth_headers: Mutex<Vec<String>>,
}

impl MockBackend {
    fn record_auth(&self, headers: &HeaderMap) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth_headers.lock().unwrap().push(auth);
    }
}

async fn create_session(
    State(mock): State<Arc<MockBackend>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record_auth(&headers);
    assert_eq!(body, json!({}));

    if agent_id == BROKEN_AGENT {
        return Json(json!({"code": 102, "message": "You don't own the agent."})).into_response();
    }
    let expected = format!("Bearer {API_KEY}");
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }

    let n = mock.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"code": 0, "data": {"id": format!("sess-{n}"), "agent_id": agent_id}})).into_response()
}

async fn complete(
    State(mock): State<Arc<MockBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record_auth(&headers);
    let question = body["question"].as_str().unwrap_or_default().to_string();
    mock.completions.lock().unwrap().push(body);

    if question == "fail" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal boom").into_response();
    }
    if question == "cut" {
        return cut_stream();
    }

    // Five-byte chunks: lines and UTF-8 sequences straddle chunk boundaries.
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = STREAM_BODY
        .as_bytes()
        .chunks(5)
        .map(|c| Ok(c.to_vec()))
        .collect();
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

/// Two answer events, then the body fails: the connection drops without the
/// chunked terminator.
fn cut_stream() -> Response {
    let items: Vec<Result<&'static str, std::io::Error>> = vec![
        Ok("data: {\"code\":0,\"data\":{\"answer\":\"Hel\"}}\n\n"),
        Ok("data: {\"code\":0,\"data\":{\"answer\":\"Hello\"}}\n\n"),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "backend went away")),
    ];
    // Pause between items so the first events reach the client before the reset.
    let body = futures_util::stream::iter(items).then(|item| async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        item
    });
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn spawn_backend() -> (String, Arc<MockBackend>) {
    let mock = Arc::new(MockBackend::default());
    let app = Router::new()
        .route("/api/v1/agents/{agent_id}/sessions", post(create_session))
        .route("/api/v1/agents/{agent_id}/completions", post(complete))
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port.to_string(), mock)
}

fn pipeline_for(port: &str, agent_id: &str) -> RagFlowPipeline {
    let ragflow = RagFlowConfig {
        host: "http://127.0.0.1".into(),
        port: port.into(),
        agent_id: agent_id.into(),
        lang: "Chinese".into(),
        session_timeout_seconds: 5,
        completion_timeout_seconds: 5,
        accept_invalid_certs: false,
    };
    let pipeline = PipelineConfig { session_bootstrap: true, channel_capacity: 2 };
    RagFlowPipeline::new(&ragflow, &pipeline, API_KEY).unwrap()
}

fn envelope(chat_id: &str) -> Value {
    json!({"metadata": {"chat_id": chat_id}, "messages": []})
}

fn expected_references(port: &str) -> String {
    format!(
        "\n\n### References\n\
         \n- [Guide.PDF](http://127.0.0.1:{port}/document/d1?ext=pdf&prefix=document)\
         \n- [notes](http://127.0.0.1:{port}/document/d2?ext=&prefix=document)"
    )
}

// ── Session bootstrap ─────────────────────────────────────────────────────────

#[tokio::test]
async fn one_session_per_conversation() {
    let (port, mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");

    p.inlet(envelope("chat-a"), None).await.unwrap();
    assert_eq!(mock.sessions_created.load(Ordering::SeqCst), 1);

    p.inlet(envelope("chat-a"), None).await.unwrap();
    p.inlet(envelope("chat-a"), None).await.unwrap();
    assert_eq!(mock.sessions_created.load(Ordering::SeqCst), 1);
    assert_eq!(p.sessions().get("chat-a").as_deref(), Some("sess-1"));

    p.inlet(envelope("chat-b"), None).await.unwrap();
    assert_eq!(mock.sessions_created.load(Ordering::SeqCst), 2);
    assert_eq!(p.sessions().get("chat-b").as_deref(), Some("sess-2"));

    let auth = mock.auth_headers.lock().unwrap();
    assert!(auth.iter().all(|a| a == &format!("Bearer {API_KEY}")));
}

#[tokio::test]
async fn missing_session_id_in_response_fails_inlet() {
    let (port, mock) = spawn_backend().await;
    let p = pipeline_for(&port, BROKEN_AGENT);

    let err = p.inlet(envelope("chat-a"), None).await.unwrap_err();
    assert!(err.to_string().contains("data.id"));
    assert!(p.sessions().is_empty());
    assert_eq!(mock.sessions_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_api_key_fails_inlet_with_status() {
    let (port, _mock) = spawn_backend().await;
    let ragflow = RagFlowConfig {
        host: "http://127.0.0.1".into(),
        port: port.clone(),
        agent_id: "agent-1".into(),
        lang: "Chinese".into(),
        session_timeout_seconds: 5,
        completion_timeout_seconds: 5,
        accept_invalid_certs: false,
    };
    let cfg = PipelineConfig { session_bootstrap: true, channel_capacity: 8 };
    let p = RagFlowPipeline::new(&ragflow, &cfg, "wrong-key").unwrap();

    let err = p.inlet(envelope("chat-a"), None).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("401"), "{msg}");
    assert!(msg.contains("invalid api key"), "{msg}");
}

// ── Streaming relay ───────────────────────────────────────────────────────────

#[tokio::test]
async fn streams_deltas_then_references() {
    let (port, mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");
    let body = p.inlet(envelope("chat-a"), None).await.unwrap();

    let fragments: Vec<String> = p.pipe("what is in the guide?", "ragflow", &[], &body).collect().await;

    assert_eq!(
        fragments,
        vec![
            "Hel".to_string(),
            "lo".to_string(),
            " 世界".to_string(),
            expected_references(&port),
        ]
    );

    let completions = mock.completions.lock().unwrap();
    assert_eq!(
        completions[0],
        json!({
            "question": "what is in the guide?",
            "stream": true,
            "session_id": "sess-1",
            "lang": "Chinese"
        })
    );
}

#[tokio::test]
async fn envelope_without_conversation_falls_back_to_current_session() {
    let (port, mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");
    p.inlet(envelope("chat-a"), None).await.unwrap();

    let text = p.pipe("hi", "ragflow", &[], &json!({})).concat().await;
    assert!(text.starts_with("Hello 世界"));
    assert_eq!(mock.completions.lock().unwrap()[0]["session_id"], "sess-1");
}

#[tokio::test]
async fn unknown_conversation_never_borrows_another_session() {
    let (port, mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");
    p.inlet(envelope("chat-a"), None).await.unwrap();

    let fragments: Vec<String> = p.pipe("hi", "ragflow", &[], &envelope("chat-b")).collect().await;
    assert_eq!(fragments, vec![SESSION_NOT_INITIALIZED.to_string()]);
    assert!(mock.completions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pipe_without_any_session_sends_nothing() {
    let (port, mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");

    let fragments: Vec<String> = p.pipe("hi", "ragflow", &[], &envelope("chat-a")).collect().await;
    assert_eq!(fragments, vec![SESSION_NOT_INITIALIZED.to_string()]);
    assert!(mock.completions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn non_success_status_becomes_one_fragment() {
    let (port, _mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");
    let body = p.inlet(envelope("chat-a"), None).await.unwrap();

    let fragments: Vec<String> = p.pipe("fail", "ragflow", &[], &body).collect().await;
    assert_eq!(fragments, vec!["Error from RAGFlow API: 500 - internal boom".to_string()]);
}

#[tokio::test]
async fn failure_mid_stream_keeps_earlier_deltas() {
    let (port, _mock) = spawn_backend().await;
    let p = pipeline_for(&port, "agent-1");
    let body = p.inlet(envelope("chat-a"), None).await.unwrap();

    let fragments: Vec<String> = p.pipe("cut", "ragflow", &[], &body).collect().await;
    assert_eq!(fragments.len(), 3, "{fragments:?}");
    assert_eq!(fragments[..2], ["Hel".to_string(), "lo".to_string()]);
    assert!(
        fragments[2].starts_with("An unexpected error occurred: "),
        "{}",
        fragments[2]
    );
}

#[tokio::test]
async fn unreachable_backend_becomes_one_fragment() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    drop(listener);

    let p = pipeline_for(&port, "agent-1");
    p.sessions().insert("chat-a", "sess-stale");

    let fragments: Vec<String> = p.pipe("hi", "ragflow", &[], &envelope("chat-a")).collect().await;
    assert_eq!(
        fragments,
        vec![format!("Error: Could not connect to RAGFlow service at http://127.0.0.1:{port}")]
    );
    // The stale session stays cached.
    assert_eq!(p.sessions().get("chat-a").as_deref(), Some("sess-stale"));
}

// ── Synchronous bridge ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_iterator_yields_the_same_fragments() {
    let (port, _mock) = spawn_backend().await;
    let p = Arc::new(pipeline_for(&port, "agent-1"));
    let body = p.inlet(envelope("chat-a"), None).await.unwrap();

    let pipeline = p.clone();
    let fragments = tokio::task::spawn_blocking(move || {
        pipeline
            .pipe_blocking("what is in the guide?", "ragflow", &[], &body)
            .collect::<Vec<_>>()
    })
    .await
    .unwrap();

    assert_eq!(fragments.len(), 4);
    assert_eq!(fragments[..3].concat(), "Hello 世界");
    assert_eq!(fragments[3], expected_references(&port));
}
