//! RAGFlow agent API client.
//!
//! [`RagFlowClient`] owns the two round trips the pipeline needs: session
//! creation and the streaming completion. [`lines::LineBuffer`] splits the
//! completion body into the `data:` lines the relay decodes.
//!
//! All wire types are private to [`client`]; callers only see session ids,
//! raw `reqwest::Response` bodies and [`RagFlowError`].

pub mod client;
pub mod lines;

pub use client::RagFlowClient;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RagFlowError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The TCP/TLS connection could not be established.
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-2xx status. `body` is the raw text.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("session response carried no data.id")]
    MissingSessionId,
}

impl RagFlowError {
    /// Classify a transport-level failure for `url`.
    pub(crate) fn from_transport(url: &str, e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Connect { url: url.to_string(), message: e.to_string() }
        } else {
            Self::Request(e.to_string())
        }
    }
}
