//! `ragflow` pipeline — answers chat messages through a RAGFlow agent.
//!
//! `inlet` makes sure the conversation has a remote session (creating one on
//! the first message); `pipe` relays the streamed answer for the session.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, PipelineConfig, RagFlowConfig};
use crate::ragflow::{RagFlowClient, RagFlowError};

use super::bridge::{self, BlockingFragments, Fragments};
use super::relay;
use super::session::{self, SessionCache};
use super::{Pipeline, PipelineError, chat_id};

pub struct RagFlowPipeline {
    client: RagFlowClient,
    sessions: Arc<SessionCache>,
    session_bootstrap: bool,
    channel_capacity: usize,
}

impl RagFlowPipeline {
    pub fn new(
        ragflow: &RagFlowConfig,
        pipeline: &PipelineConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, RagFlowError> {
        Ok(Self {
            client: RagFlowClient::new(ragflow, api_key)?,
            sessions: Arc::new(SessionCache::new()),
            session_bootstrap: pipeline.session_bootstrap,
            channel_capacity: pipeline.channel_capacity,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RagFlowError> {
        Self::new(&config.ragflow, &config.pipeline, config.api_key.clone())
    }

    /// Share an existing cache, e.g. between pipeline instances of one host.
    pub fn with_sessions(mut self, sessions: Arc<SessionCache>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Session for this envelope's conversation. Only an envelope that names
    /// no conversation falls back to the current session; an unknown
    /// conversation never borrows another one's session.
    fn resolve_session(&self, body: &Value) -> Option<String> {
        match chat_id(body) {
            Some(id) => self.sessions.get(id),
            None => self.sessions.current(),
        }
    }

    fn log_pipe(&self, model_id: &str, messages: &[Value], session_id: Option<&str>) {
        debug!(
            model_id,
            history_len = messages.len(),
            session_id = session_id.unwrap_or("<none>"),
            "pipe"
        );
    }
}

impl Pipeline for RagFlowPipeline {
    fn id(&self) -> &str {
        "ragflow"
    }

    async fn on_startup(&self) {
        info!(backend = %self.client.base_url(), "RAGFlow pipeline starting up");
    }

    async fn on_shutdown(&self) {
        info!(sessions = self.sessions.len(), "RAGFlow pipeline shutting down");
    }

    async fn inlet(&self, body: Value, _user: Option<&Value>) -> Result<Value, PipelineError> {
        if !self.session_bootstrap {
            return Ok(body);
        }

        let Some(chat_id) = chat_id(&body) else {
            warn!("could not find metadata.chat_id in inlet body");
            return Ok(body);
        };

        info!(chat_id, "inlet: handling conversation");
        session::ensure_session(&self.sessions, &self.client, chat_id).await?;
        Ok(body)
    }

    async fn outlet(&self, body: Value, _user: Option<&Value>) -> Result<Value, PipelineError> {
        Ok(body)
    }

    fn pipe(&self, user_message: &str, model_id: &str, messages: &[Value], body: &Value) -> Fragments {
        let session_id = self.resolve_session(body);
        self.log_pipe(model_id, messages, session_id.as_deref());

        let (tx, fragments) = Fragments::channel(self.channel_capacity);
        tokio::spawn(relay::relay(
            self.client.clone(),
            session_id,
            user_message.to_string(),
            tx,
        ));
        fragments
    }

    fn pipe_blocking(
        &self,
        user_message: &str,
        model_id: &str,
        messages: &[Value],
        body: &Value,
    ) -> BlockingFragments {
        let session_id = self.resolve_session(body);
        self.log_pipe(model_id, messages, session_id.as_deref());

        let client = self.client.clone();
        let question = user_message.to_string();
        bridge::spawn_blocking_reader(self.channel_capacity, move |tx| {
            relay::relay(client, session_id, question, tx)
        })
    }
}
