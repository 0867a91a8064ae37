//! Line-oriented console host.
//!
//! Each input line is either an admin command (`/rl ...`) or an LLM request
//! written as `<actor> [group]`. Replies are written one per line.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use super::admin::{AdminHandler, COMMAND_PREFIX};
use super::event::RequestEvent;
use super::gate::LlmGate;
use crate::clock::Clock;
use crate::config::MessageTemplates;
use crate::error::Result;
use crate::ratelimit::AdmissionEngine;
use crate::store::ConfigStore;

/// A request read from the console.
struct ConsoleEvent {
    actor: String,
    group: Option<String>,
    replies: Mutex<Vec<String>>,
    stopped: AtomicBool,
}

impl ConsoleEvent {
    /// Parse `<actor> [group]`. Returns `None` for blank or malformed lines.
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let actor = words.next()?.to_string();
        let group = words.next().map(str::to_string);
        if words.next().is_some() {
            return None;
        }

        Some(Self {
            actor,
            group,
            replies: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RequestEvent for ConsoleEvent {
    fn sender_id(&self) -> &str {
        &self.actor
    }

    fn group_id(&self) -> Option<&str> {
        self.group.as_deref()
    }

    async fn send_plain(&self, text: String) -> Result<()> {
        self.replies.lock().push(text);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Host runtime reading requests and admin commands from a line stream.
pub struct ConsoleHost {
    gate: LlmGate<AdmissionEngine>,
    admin: AdminHandler,
}

impl ConsoleHost {
    /// Create a console host over an engine, its store and a clock.
    pub fn new(
        engine: Arc<AdmissionEngine>,
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
        templates: MessageTemplates,
    ) -> Self {
        Self {
            gate: LlmGate::new(Arc::clone(&engine), clock, templates),
            admin: AdminHandler::new(engine, store),
        }
    }

    /// Handle a single line and return the reply.
    pub async fn handle_line(&self, line: &str) -> Result<Option<String>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        if line.split_whitespace().next() == Some(COMMAND_PREFIX) {
            return self.admin.handle_line(line).map(Some);
        }

        let Some(event) = ConsoleEvent::parse(line) else {
            return Ok(Some(format!(
                "❌ expected `<user_id> [group_id]` or `{} <command>`",
                COMMAND_PREFIX
            )));
        };

        let decision = self.gate.on_llm_request(&event).await;
        let reply = if event.stopped.load(Ordering::SeqCst) {
            event.replies.lock().join("\n")
        } else {
            format!("✅ {} may call the LLM ({})", event.actor, decision.reason)
        };

        Ok(Some(reply))
    }

    /// Serve lines from `reader` until end of input or `shutdown` resolves.
    pub async fn run<R, W, F>(&self, reader: R, mut writer: W, shutdown: F) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        info!("Console host ready");

        let mut lines = reader.lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("End of input");
                        break;
                    };

                    match self.handle_line(&line).await {
                        Ok(Some(reply)) => {
                            writer.write_all(reply.as_bytes()).await?;
                            writer.write_all(b"\n").await?;
                            writer.flush().await?;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Failed to handle line");
                            writer.write_all(format!("❌ {}\n", e).as_bytes()).await?;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        info!("Console host stopped");
        Ok(())
    }
}
