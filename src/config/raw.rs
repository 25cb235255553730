//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

/// Raw TOML shape, the serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub bridge: RawBridge,
    #[serde(default)]
    pub ragflow: RawRagFlow,
    #[serde(default)]
    pub pipeline: RawPipeline,
}

#[derive(Deserialize)]
pub(super) struct RawBridge {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for RawBridge {
    fn default() -> Self {
        Self { log_level: default_log_level(), log_file: None }
    }
}

// ── RAGFlow ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawRagFlow {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
    #[serde(default = "default_completion_timeout_seconds")]
    pub completion_timeout_seconds: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for RawRagFlow {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: String::new(),
            agent_id: String::new(),
            lang: default_lang(),
            session_timeout_seconds: default_session_timeout_seconds(),
            completion_timeout_seconds: default_completion_timeout_seconds(),
            accept_invalid_certs: false,
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawPipeline {
    #[serde(default = "default_true")]
    pub session_bootstrap: bool,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RawPipeline {
    fn default() -> Self {
        Self {
            session_bootstrap: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ── Defaults ────────────────────────────────────────────────────────────────

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_lang() -> String {
    "Chinese".to_string()
}

pub(super) fn default_session_timeout_seconds() -> u64 {
    30
}

pub(super) fn default_completion_timeout_seconds() -> u64 {
    300
}

pub(super) fn default_channel_capacity() -> usize {
    32
}

fn default_true() -> bool {
    true
}
