//! Pre-LLM admission hook.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::event::RequestEvent;
use crate::clock::Clock;
use crate::config::MessageTemplates;
use crate::ratelimit::{AdmissionBackend, Decision, Reason};

/// Gate that runs before every LLM call.
///
/// Asks the backend for a decision and, on denial, tells the actor how long
/// to wait and stops the event.
pub struct LlmGate<B: AdmissionBackend> {
    /// The admission backend
    backend: Arc<B>,
    /// Clock read once per request
    clock: Arc<dyn Clock>,
    /// Denial message templates
    templates: MessageTemplates,
}

impl<B: AdmissionBackend> LlmGate<B> {
    /// Create a new gate.
    pub fn new(backend: Arc<B>, clock: Arc<dyn Clock>, templates: MessageTemplates) -> Self {
        Self {
            backend,
            clock,
            templates,
        }
    }

    /// The backend this gate consults.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Handle an inbound request event.
    #[instrument(
        skip(self, event),
        fields(
            actor = %event.sender_id(),
            group = ?event.group_id()
        )
    )]
    pub async fn on_llm_request<E: RequestEvent + ?Sized>(&self, event: &E) -> Decision {
        let now = self.clock.now();
        let decision = self.backend.admit(event.sender_id(), event.group_id(), now);

        if let Some(message) = self.render_denial(&decision) {
            debug!(
                reason = %decision.reason,
                cooldown_secs = decision.cooldown_secs(),
                "Request denied"
            );
            if let Err(e) = event.send_plain(message).await {
                warn!(error = %e, "Failed to deliver denial message");
            }
            event.stop();
        }

        decision
    }

    /// Render the denial message for a decision, or `None` if it was allowed.
    pub fn render_denial(&self, decision: &Decision) -> Option<String> {
        let template = match decision.reason {
            Reason::UserLimit => &self.templates.tip_message,
            Reason::GroupTotal => &self.templates.group_tip_message,
            Reason::Whitelist | Reason::Ok => return None,
        };

        Some(render_template(
            template,
            decision.cooldown_secs(),
            decision.limit.unwrap_or_default(),
            decision.window,
        ))
    }
}

/// Substitute `{cooldown}`, `{max}` and `{window}` in a template.
pub fn render_template(template: &str, cooldown_secs: f64, max: u32, window: Duration) -> String {
    template
        .replace("{cooldown}", &format!("{:.1}", cooldown_secs))
        .replace("{max}", &max.to_string())
        .replace("{window}", &window.as_secs().to_string())
}
