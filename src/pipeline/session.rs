//! Conversation → remote session mapping.
//!
//! Entries are created on the first message of a conversation and never
//! removed or refreshed, even when a later completion fails on that
//! session. The cache also remembers the most recently resolved session,
//! which `pipe` falls back to when its envelope names no conversation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info};

use crate::ragflow::{RagFlowClient, RagFlowError};

#[derive(Debug, Default)]
pub struct SessionCache {
    entries: Mutex<HashMap<String, String>>,
    current: Mutex<Option<String>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat_id: &str) -> Option<String> {
        lock(&self.entries).get(chat_id).cloned()
    }

    /// Record `session_id` for `chat_id` and make it the current session.
    /// Last writer wins.
    pub fn insert(&self, chat_id: impl Into<String>, session_id: impl Into<String>) {
        let session_id = session_id.into();
        lock(&self.entries).insert(chat_id.into(), session_id.clone());
        *lock(&self.current) = Some(session_id);
    }

    /// The session most recently resolved by [`ensure_session`].
    pub fn current(&self) -> Option<String> {
        lock(&self.current).clone()
    }

    fn set_current(&self, session_id: &str) {
        *lock(&self.current) = Some(session_id.to_string());
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// The maps hold plain strings, so a panic mid-update cannot leave them torn.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve the remote session for `chat_id`, creating it on a cache miss.
///
/// Creation failures are logged and returned; nothing is cached for them.
pub async fn ensure_session(
    cache: &SessionCache,
    client: &RagFlowClient,
    chat_id: &str,
) -> Result<String, RagFlowError> {
    if let Some(session_id) = cache.get(chat_id) {
        info!(chat_id, %session_id, "reusing cached RAGFlow session");
        cache.set_current(&session_id);
        return Ok(session_id);
    }

    info!(chat_id, "no cached session, creating a new RAGFlow session");
    match client.create_session().await {
        Ok(session_id) => {
            info!(chat_id, %session_id, "created RAGFlow session");
            cache.insert(chat_id, session_id.clone());
            Ok(session_id)
        }
        Err(e) => {
            error!(chat_id, error = %e, "failed to create RAGFlow session");
            Err(e)
        }
    }
}
