//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `RAGFLOW_*` env overrides.
//!
//! # Module layout
//!
//! - **types** — Public configuration structs (`Config`, `RagFlowConfig`,
//!   `PipelineConfig`).
//! - **raw** — Raw TOML deserialization types. These mirror the file shape
//!   and use serde defaults; kept private.
//! - **load** — Loading logic: the `[meta] base` chain, env `Overrides`,
//!   `load`, `load_from`.

mod load;
mod raw;
mod types;

pub use load::{Overrides, load, load_from};
pub use types::*;

#[cfg(test)]
impl Config {
    /// `Config` for unit tests, pointing at `host:port`, never at a real backend.
    pub fn test_default(host: &str, port: &str) -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
            ragflow: RagFlowConfig {
                host: host.into(),
                port: port.into(),
                agent_id: "agent-test".into(),
                lang: raw::default_lang(),
                session_timeout_seconds: 1,
                completion_timeout_seconds: 1,
                accept_invalid_certs: false,
            },
            pipeline: PipelineConfig {
                session_bootstrap: true,
                channel_capacity: raw::default_channel_capacity(),
            },
            api_key: "test-key".into(),
        }
    }
}
