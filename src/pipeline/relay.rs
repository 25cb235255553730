//! Streaming completion relay.
//!
//! [`relay`] runs as one task per user message: it opens the streaming
//! completion, decodes each `data:` line with an [`EventDecoder`] and pushes
//! the resulting text fragments into a bounded channel. It never fails:
//! every error after the call starts becomes a single fragment describing
//! it, and the channel closes when the task ends.
//!
//! The backend resends the whole answer-so-far in every event, so the
//! decoder keeps the cumulative answer and emits only the new suffix.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ragflow::lines::LineBuffer;
use crate::ragflow::{RagFlowClient, RagFlowError};

use super::references::{self, Reference};

pub const SESSION_NOT_INITIALIZED: &str = "Error: RAGFlow session not initialized. Please start a new chat or send a new message to create one.";

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
/// Progress events ("Retrieval is running...") carry no answer text.
const RUNNING_MARKER: &str = " is running...";

// ── EventDecoder ──────────────────────────────────────────────────────────────

/// Why a single line was skipped. Neither case ends the stream.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected event shape: {0}")]
    Shape(String),
}

/// Per-stream decoding state: the cumulative answer emitted so far.
#[derive(Debug)]
pub struct EventDecoder {
    base_url: String,
    answer: String,
}

impl EventDecoder {
    /// `base_url` prefixes the document links of the reference list.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), answer: String::new() }
    }

    /// The full answer seen so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Decode one line, pushing any fragments it yields onto `out`.
    ///
    /// Lines without the `data:` prefix, empty payloads and `[DONE]` yield
    /// nothing. On error, fragments pushed before the failure are kept.
    pub fn decode_line(&mut self, line: &str, out: &mut Vec<String>) -> Result<(), LineError> {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Ok(());
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return Ok(());
        }

        let event: Value = serde_json::from_str(payload)?;
        // The final event is `{"code":0,"data":true}`.
        let Some(data) = event.get("data").and_then(Value::as_object) else {
            return Ok(());
        };

        if let Some(answer) = data.get("answer").and_then(Value::as_str) {
            if let Some(delta) = self.advance(answer) {
                out.push(delta);
            }
        }

        if let Some(reference) = data.get("reference").filter(|r| !r.is_null()) {
            let reference =
                Reference::deserialize(reference).map_err(|e| LineError::Shape(e.to_string()))?;
            if let Some(chunks) = reference.chunks {
                out.push(references::render(&self.base_url, &references::parse_chunks(&chunks)));
            }
        }
        Ok(())
    }

    /// Suffix of `answer` beyond what was already emitted, if it grew.
    fn advance(&mut self, answer: &str) -> Option<String> {
        if answer.contains(RUNNING_MARKER) {
            return None;
        }
        let emitted = self.answer.chars().count();
        if answer.chars().count() <= emitted {
            return None;
        }
        let delta: String = answer.chars().skip(emitted).collect();
        self.answer = answer.to_string();
        Some(delta)
    }
}

// ── relay ─────────────────────────────────────────────────────────────────────

/// Answer `question` on `session_id`, sending fragments to `tx`.
///
/// Without a session, sends [`SESSION_NOT_INITIALIZED`] and returns without
/// touching the network. Stops early if the receiver is dropped.
pub async fn relay(
    client: RagFlowClient,
    session_id: Option<String>,
    question: String,
    tx: mpsc::Sender<String>,
) {
    let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
        warn!("completion requested without a RAGFlow session");
        let _ = tx.send(SESSION_NOT_INITIALIZED.to_string()).await;
        return;
    };

    if let Err(e) = stream_answer(&client, &session_id, &question, &tx).await {
        let fragment = error_fragment(&client, &e);
        error!(%session_id, error = %e, "completion failed");
        let _ = tx.send(fragment).await;
    }
}

/// The user-visible text for a completion failure.
pub fn error_fragment(client: &RagFlowClient, e: &RagFlowError) -> String {
    match e {
        RagFlowError::Status { status, body } => {
            format!("Error from RAGFlow API: {status} - {body}")
        }
        RagFlowError::Connect { .. } => format!(
            "Error: Could not connect to RAGFlow service at {}",
            client.base_url()
        ),
        other => format!("An unexpected error occurred: {other}"),
    }
}

async fn stream_answer(
    client: &RagFlowClient,
    session_id: &str,
    question: &str,
    tx: &mpsc::Sender<String>,
) -> Result<(), RagFlowError> {
    let response = client.open_completion(session_id, question).await?;
    info!(session_id, "connected to RAGFlow stream");

    let mut decoder = EventDecoder::new(client.base_url());
    let mut lines = LineBuffer::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| RagFlowError::Request(format!("stream read failed: {e}")))?;
        for line in lines.feed(&chunk) {
            if !forward_line(&mut decoder, &line, tx).await {
                debug!(session_id, "fragment receiver dropped, abandoning stream");
                return Ok(());
            }
        }
    }
    if let Some(line) = lines.finish() {
        forward_line(&mut decoder, &line, tx).await;
    }

    debug!(session_id, answer_len = decoder.answer().len(), "RAGFlow stream closed");
    Ok(())
}

/// Decode `line` and send its fragments. `false` once the receiver is gone.
async fn forward_line(decoder: &mut EventDecoder, line: &str, tx: &mpsc::Sender<String>) -> bool {
    let mut out = Vec::new();
    match decoder.decode_line(line, &mut out) {
        Ok(()) => {}
        Err(LineError::Json(e)) => warn!(error = %e, %line, "failed to parse JSON from stream"),
        Err(e) => error!(error = %e, %line, "error processing stream line"),
    }
    for fragment in out {
        if tx.send(fragment).await.is_err() {
            return false;
        }
    }
    true
}
