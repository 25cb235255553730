//! Console host: reads lines from stdin, runs each through a [`Pipeline`],
//! prints the answer to stdout as it streams in.
//!
//! One console run is one conversation: every line carries the same
//! `metadata.chat_id`, and the transcript so far is passed to `pipe` as
//! `messages`. Runs until the `shutdown` token is cancelled (Ctrl-C) or stdin
//! is closed.

use std::io::Write as _;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::pipeline::Pipeline;

/// How `pipe` output is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// Await fragments on the runtime.
    Async,
    /// Iterate `pipe_blocking` on a blocking thread.
    Blocking,
}

pub struct Console<P> {
    pipeline: Arc<P>,
    chat_id: String,
    model_id: String,
    mode: PullMode,
    messages: Vec<Value>,
}

impl<P: Pipeline + 'static> Console<P> {
    pub fn new(pipeline: Arc<P>, chat_id: impl Into<String>, mode: PullMode) -> Self {
        let model_id = pipeline.id().to_string();
        Self {
            pipeline,
            chat_id: chat_id.into(),
            model_id,
            mode,
            messages: Vec::new(),
        }
    }

    /// The envelope sent with every turn.
    fn envelope(&self) -> Value {
        json!({
            "model": self.model_id,
            "messages": self.messages,
            "metadata": { "chat_id": self.chat_id },
        })
    }

    /// Run one turn: `inlet` → `pipe` → `outlet`. Fragments are written to
    /// stdout as they arrive; the full answer is returned.
    pub async fn turn(&mut self, input: &str) -> Result<String, AppError> {
        self.messages.push(json!({ "role": "user", "content": input }));
        let body = self.pipeline.inlet(self.envelope(), None).await?;

        let answer = match self.mode {
            PullMode::Async => {
                let mut fragments = self.pipeline.pipe(input, &self.model_id, &self.messages, &body);
                let mut answer = String::new();
                while let Some(fragment) = fragments.next().await {
                    print_fragment(&fragment);
                    answer.push_str(&fragment);
                }
                answer
            }
            PullMode::Blocking => {
                let pipeline = self.pipeline.clone();
                let (question, model_id, messages) =
                    (input.to_string(), self.model_id.clone(), self.messages.clone());
                tokio::task::spawn_blocking(move || {
                    let mut answer = String::new();
                    for fragment in pipeline.pipe_blocking(&question, &model_id, &messages, &body) {
                        print_fragment(&fragment);
                        answer.push_str(&fragment);
                    }
                    answer
                })
                .await
                .map_err(|e| AppError::Io(std::io::Error::other(e)))?
            }
        };
        println!();

        self.messages.push(json!({ "role": "assistant", "content": answer }));
        self.pipeline.outlet(self.envelope(), None).await?;
        Ok(answer)
    }

    /// [`Console::turn`], abandoned as soon as `shutdown` fires. `None` when
    /// the turn was cut short.
    pub async fn turn_until(
        &mut self,
        input: &str,
        shutdown: &CancellationToken,
    ) -> Option<Result<String, AppError>> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = self.turn(input) => Some(result),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), AppError> {
        info!(chat_id = %self.chat_id, mode = ?self.mode, "console started; type a message and press Enter. Ctrl-C to quit.");
        println!("─────────────────────────────────");
        println!(" RAGFlow console  (Ctrl-C to quit)");
        println!("─────────────────────────────────");

        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        loop {
            print!("> ");
            let _ = std::io::stdout().flush();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    println!("\n[console] shutdown signal received");
                    info!("console shutting down");
                    break;
                }

                line = lines.next_line() => {
                    match line {
                        Err(e) => {
                            warn!("stdin read error: {e}");
                            break;
                        }
                        Ok(None) => {
                            info!("stdin closed");
                            break;
                        }
                        Ok(Some(input)) => {
                            let input = input.trim().to_string();
                            if input.is_empty() { continue; }

                            debug!(input = %input, "console received line");

                            match self.turn_until(&input, &shutdown).await {
                                None => {
                                    println!("\n[console] shutdown signal received");
                                    info!("console shutting down mid-answer");
                                    break;
                                }
                                // A failed turn is reported; the conversation goes on.
                                Some(Err(e)) => {
                                    warn!(error = %e, "turn failed");
                                    println!("error: {e}");
                                    self.messages.pop();
                                }
                                Some(Ok(_)) => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn print_fragment(fragment: &str) {
    print!("{fragment}");
    let _ = std::io::stdout().flush();
}
