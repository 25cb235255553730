//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `RAGFLOW_HOST`, `RAGFLOW_PORT`, `RAGFLOW_AGENT_ID`,
//! `RAGFLOW_LOG_LEVEL` and `RAGFLOW_API_KEY` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::RawConfig;
use super::types::*;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Values that take precedence over the TOML file.
///
/// [`load`] fills this from the environment; tests build it directly
/// instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<String>,
    pub agent_id: Option<String>,
    pub log_level: Option<String>,
    /// The only source of the API key.
    pub api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            host: env::var("RAGFLOW_HOST").ok(),
            port: env::var("RAGFLOW_PORT").ok(),
            agent_id: env::var("RAGFLOW_AGENT_ID").ok(),
            log_level: env::var("RAGFLOW_LOG_LEVEL").ok(),
            api_key: env::var("RAGFLOW_API_KEY").ok(),
        }
    }
}

/// Lay `overlay` over `base`. Nested tables merge key by key; any other
/// value (arrays included) replaces the base value.
fn merge_into(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let toml::Value::Table(overlay_tbl) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(toml::Value::Table(base_tbl)) = base.get_mut(&key) {
            merge_into(base_tbl, overlay_tbl);
            continue;
        }
        base.insert(key, toml::Value::Table(overlay_tbl));
    }
}

/// `[meta] base` of `table`, resolved against the directory of `path`.
fn base_of(table: &toml::Table, path: &Path) -> Option<PathBuf> {
    let base = Path::new(table.get("meta")?.get("base")?.as_str()?);
    if base.is_absolute() {
        Some(base.to_path_buf())
    } else {
        Some(path.parent().unwrap_or(Path::new(".")).join(base))
    }
}

/// Read `path` and every file up its `[meta] base` chain, then merge them
/// root first so the named file has the last word.
fn read_chain(path: &Path) -> Result<toml::Table, AppError> {
    let mut layers = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(path.to_path_buf());

    while let Some(current) = next.take() {
        let key = current.canonicalize().unwrap_or_else(|_| current.clone());
        if !seen.insert(key) {
            return Err(AppError::Config(format!(
                "circular base reference detected at: {}",
                current.display()
            )));
        }
        let text = fs::read_to_string(&current)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", current.display())))?;
        let table: toml::Table = toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", current.display())))?;
        next = base_of(&table, &current);
        layers.push(table);
    }

    let mut merged = toml::Table::new();
    for layer in layers.into_iter().rev() {
        merge_into(&mut merged, layer);
    }
    Ok(merged)
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, every setting
/// takes its built-in default and the env overrides are still applied.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        Ok(resolve(RawConfig::default(), &overrides))
    }
}

/// Load `path` (and its base chain) with explicit overrides. Tests call this
/// directly instead of touching the process environment.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let merged = read_chain(path)?;

    let parsed: RawConfig = Deserialize::deserialize(toml::Value::Table(merged)).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    Ok(resolve(parsed, overrides))
}

fn resolve(parsed: RawConfig, overrides: &Overrides) -> Config {
    let pick = |over: &Option<String>, file: String| over.clone().unwrap_or(file);
    let r = parsed.ragflow;

    Config {
        log_level: pick(&overrides.log_level, parsed.bridge.log_level),
        log_file: parsed.bridge.log_file.map(PathBuf::from),
        ragflow: RagFlowConfig {
            host: pick(&overrides.host, r.host),
            port: pick(&overrides.port, r.port),
            agent_id: pick(&overrides.agent_id, r.agent_id),
            lang: r.lang,
            session_timeout_seconds: r.session_timeout_seconds,
            completion_timeout_seconds: r.completion_timeout_seconds,
            accept_invalid_certs: r.accept_invalid_certs,
        },
        pipeline: PipelineConfig {
            session_bootstrap: parsed.pipeline.session_bootstrap,
            channel_capacity: parsed.pipeline.channel_capacity.max(1),
        },
        api_key: overrides.api_key.clone().unwrap_or_default(),
    }
}
