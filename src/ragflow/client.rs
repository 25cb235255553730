//! HTTP client for the RAGFlow agent endpoints.
//!
//! - `POST {host}:{port}/api/v1/agents/{agent_id}/sessions` — new session.
//! - `POST {host}:{port}/api/v1/agents/{agent_id}/completions` — streamed answer.
//!
//! Both carry `Authorization: Bearer {api_key}` and a JSON body. Constructed
//! once per pipeline, then cheaply cloned because `reqwest::Client` is an
//! `Arc` internally.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::config::RagFlowConfig;

use super::RagFlowError;

#[derive(Debug, Clone)]
pub struct RagFlowClient {
    client: Client,
    base_url: String,
    agent_id: String,
    api_key: String,
    lang: String,
    session_timeout: Duration,
}

impl RagFlowClient {
    /// Build a client from config and the API key.
    ///
    /// The completion timeout bounds connecting and each read of the
    /// stream, not the whole answer; session creation gets its own
    /// end-to-end timeout per request.
    pub fn new(config: &RagFlowConfig, api_key: impl Into<String>) -> Result<Self, RagFlowError> {
        let completion_timeout = Duration::from_secs(config.completion_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(completion_timeout)
            .read_timeout(completion_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| RagFlowError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            agent_id: config.agent_id.clone(),
            api_key: api_key.into(),
            lang: config.lang.clone(),
            session_timeout: Duration::from_secs(config.session_timeout_seconds),
        })
    }

    /// `{host}:{port}`, shared by API and document links.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn sessions_url(&self) -> String {
        format!("{}/api/v1/agents/{}/sessions", self.base_url, self.agent_id)
    }

    pub fn completions_url(&self) -> String {
        format!("{}/api/v1/agents/{}/completions", self.base_url, self.agent_id)
    }

    /// Create a remote session and return its id (`data.id`).
    ///
    /// One round trip, no retry. Transport errors, non-2xx statuses, an
    /// undecodable body and a missing id are all errors.
    pub async fn create_session(&self) -> Result<String, RagFlowError> {
        let url = self.sessions_url();
        debug!(%url, "creating RAGFlow session");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({}))
            .timeout(self.session_timeout)
            .send()
            .await
            .map_err(|e| RagFlowError::from_transport(&url, e))?;

        let response = check_status(response).await?;

        let parsed = response.json::<SessionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize session response");
            RagFlowError::Decode(e.to_string())
        })?;

        match parsed.data.and_then(|d| d.id).filter(|id| !id.is_empty()) {
            Some(id) => Ok(id),
            None => {
                error!(
                    code = ?parsed.code,
                    message = parsed.message.as_deref().unwrap_or(""),
                    "session response has no data.id"
                );
                Err(RagFlowError::MissingSessionId)
            }
        }
    }

    /// Send `question` on `session_id` and return the streaming response.
    ///
    /// Only the status line has been read when this returns; the caller owns
    /// the body. A non-2xx status is returned as [`RagFlowError::Status`]
    /// with the body already read.
    pub async fn open_completion(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<Response, RagFlowError> {
        let url = self.completions_url();
        let payload = CompletionRequest {
            question,
            stream: true,
            session_id,
            lang: &self.lang,
        };

        debug!(%url, session_id, question_len = question.len(), "sending completion request");
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(
                url = %url,
                headers = "Content-Type: application/json, Authorization: Bearer ***",
                payload = %json,
                "completion request"
            );
            trace!(curl = %curl_equivalent(&url, &json), "equivalent curl command");
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RagFlowError::from_transport(&url, e))?;

        check_status(response).await
    }
}

/// Reproduce a request as a curl command for debugging. The key is redacted.
fn curl_equivalent(url: &str, json: &str) -> String {
    format!(
        "curl -X POST '{url}' -H 'Content-Type: application/json' -H 'Authorization: Bearer ***' -d '{}'",
        json.replace('\'', r"'\''")
    )
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    question: &'a str,
    stream: bool,
    session_id: &'a str,
    lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<SessionData>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    #[serde(default)]
    id: Option<String>,
}

/// Consume the response and return it if successful, or the status and raw body.
async fn check_status(response: Response) -> Result<Response, RagFlowError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    error!(%status, body = %body, "RAGFlow request returned HTTP error");
    Err(RagFlowError::Status { status: status.as_u16(), body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn client() -> RagFlowClient {
        let cfg = Config::test_default("http://ragflow.local", "9380");
        RagFlowClient::new(&cfg.ragflow, cfg.api_key).unwrap()
    }

    #[test]
    fn urls_join_host_port_and_agent() {
        let c = client();
        assert_eq!(c.base_url(), "http://ragflow.local:9380");
        assert_eq!(
            c.sessions_url(),
            "http://ragflow.local:9380/api/v1/agents/agent-test/sessions"
        );
        assert_eq!(
            c.completions_url(),
            "http://ragflow.local:9380/api/v1/agents/agent-test/completions"
        );
    }

    #[test]
    fn empty_settings_give_malformed_urls_not_errors() {
        let cfg = Config::test_default("", "");
        let c = RagFlowClient::new(&cfg.ragflow, "").unwrap();
        assert_eq!(c.sessions_url(), ":/api/v1/agents/agent-test/sessions");
    }

    #[test]
    fn completion_payload_shape() {
        let payload = CompletionRequest {
            question: "what is RAG?",
            stream: true,
            session_id: "s-1",
            lang: "Chinese",
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "question": "what is RAG?",
                "stream": true,
                "session_id": "s-1",
                "lang": "Chinese"
            })
        );
    }

    #[test]
    fn session_response_tolerates_missing_data() {
        let parsed: SessionResponse =
            serde_json::from_str(r#"{"code":102,"message":"agent not found"}"#).unwrap();
        assert!(parsed.data.is_none());
        assert_eq!(parsed.code, Some(102));
    }

    #[test]
    fn curl_redacts_key_and_escapes_quotes() {
        let cmd = curl_equivalent("http://h:1/x", r#"{"question":"it's"}"#);
        assert!(cmd.contains("Bearer ***"));
        assert!(!cmd.contains("test-key"));
        assert!(cmd.contains(r"it'\''s"));
    }
}
