//! Public configuration structs consumed by the pipeline and the binary.

use std::path::PathBuf;

/// Connection settings for the RAGFlow agent API (`[ragflow]` in TOML).
///
/// `host`, `port` and `agent_id` have no defaults and are never validated:
/// an empty value produces a malformed URL that fails at request time.
#[derive(Debug, Clone)]
pub struct RagFlowConfig {
    /// Scheme and host, e.g. `http://127.0.0.1`.
    pub host: String,
    /// Port appended to `host` as `{host}:{port}`.
    pub port: String,
    /// Agent whose sessions and completions are used.
    pub agent_id: String,
    /// `lang` field sent with every completion request.
    pub lang: String,
    /// Timeout for the session-creation round trip.
    pub session_timeout_seconds: u64,
    /// Connect and per-read timeout for the streaming completion.
    pub completion_timeout_seconds: u64,
    /// Skip TLS certificate verification (self-signed deployments).
    pub accept_invalid_certs: bool,
}

impl RagFlowConfig {
    /// `{host}:{port}`, the prefix of every API and document URL.
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Host-facing pipeline behaviour (`[pipeline]` in TOML).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// When `false`, `inlet` passes bodies through without creating sessions.
    pub session_bootstrap: bool,
    /// Bound of the fragment channel between the relay task and its reader.
    pub channel_capacity: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    pub ragflow: RagFlowConfig,
    pub pipeline: PipelineConfig,
    /// Bearer token from `RAGFLOW_API_KEY` env var. Never sourced from TOML.
    /// Empty when unset.
    pub api_key: String,
}

impl Config {
    /// Names of the required connection settings that are empty.
    ///
    /// Informational only; nothing refuses to start on a non-empty result.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        [
            ("api_key", self.api_key.as_str()),
            ("agent_id", self.ragflow.agent_id.as_str()),
            ("host", self.ragflow.host.as_str()),
            ("port", self.ragflow.port.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}
