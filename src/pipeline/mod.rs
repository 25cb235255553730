//! Host-facing pipeline contract.
//!
//! A chat front-end drives a [`Pipeline`] through five hooks: lifecycle
//! (`on_startup`, `on_shutdown`), request filters (`inlet`, `outlet`) and
//! `pipe`, which answers one user message as a lazy sequence of text
//! fragments. Envelopes are opaque JSON; the only field the pipeline reads is
//! `metadata.chat_id`.
//!
//! `pipe` returns [`Fragments`] for async hosts; `pipe_blocking` returns
//! [`BlockingFragments`] for hosts that can only pull synchronously. Both
//! read from the same bounded channel fed by a relay task.

mod adapter;
pub mod bridge;
pub mod references;
pub mod relay;
pub mod session;

pub use adapter::RagFlowPipeline;
pub use bridge::{BlockingFragments, Fragments};
pub use session::SessionCache;

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::ragflow::RagFlowError;

// ── Error ─────────────────────────────────────────────────────────────────────

/// Failures that abort a turn. Completion-time problems never surface here;
/// they become text fragments instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session bootstrap failed: {0}")]
    Session(#[from] RagFlowError),
}

// ── Pipeline trait ────────────────────────────────────────────────────────────

/// A chat pipeline loaded by a host.
///
/// `pipe` must be called from within a tokio runtime; `pipe_blocking` must
/// not be called from an async task (it is meant for plain threads or
/// `spawn_blocking`).
pub trait Pipeline: Send + Sync {
    /// Unique pipeline identifier.
    fn id(&self) -> &str;

    fn on_startup(&self) -> impl Future<Output = ()> + Send;

    fn on_shutdown(&self) -> impl Future<Output = ()> + Send;

    /// Pre-process an inbound request envelope. Returns it unchanged on success.
    fn inlet(
        &self,
        body: Value,
        user: Option<&Value>,
    ) -> impl Future<Output = Result<Value, PipelineError>> + Send;

    /// Post-process an outbound envelope.
    fn outlet(
        &self,
        body: Value,
        user: Option<&Value>,
    ) -> impl Future<Output = Result<Value, PipelineError>> + Send;

    /// Answer `user_message` as a stream of fragments.
    fn pipe(&self, user_message: &str, model_id: &str, messages: &[Value], body: &Value) -> Fragments;

    /// Same as [`Pipeline::pipe`], pulled synchronously.
    fn pipe_blocking(
        &self,
        user_message: &str,
        model_id: &str,
        messages: &[Value],
        body: &Value,
    ) -> BlockingFragments;
}

/// `metadata.chat_id` of a host envelope, if present and non-empty.
pub fn chat_id(body: &Value) -> Option<&str> {
    body.get("metadata")
        .and_then(|m| m.get("chat_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_id_from_metadata() {
        let body = json!({"metadata": {"chat_id": "c-42"}, "messages": []});
        assert_eq!(chat_id(&body), Some("c-42"));
    }

    #[test]
    fn chat_id_absent_or_empty() {
        assert_eq!(chat_id(&json!({})), None);
        assert_eq!(chat_id(&json!({"metadata": {}})), None);
        assert_eq!(chat_id(&json!({"metadata": {"chat_id": ""}})), None);
        assert_eq!(chat_id(&json!({"metadata": {"chat_id": 7}})), None);
    }
}
