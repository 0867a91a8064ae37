//! The request event supplied by the hosting runtime.

use async_trait::async_trait;

use crate::error::Result;

/// An inbound "actor wants to call the LLM" event.
///
/// Hosts implement this for whatever their runtime delivers. The gate reads
/// the identifiers, and on denial sends a message and stops the event so the
/// host skips the downstream call.
#[async_trait]
pub trait RequestEvent: Send + Sync {
    /// Identifier of the actor issuing the request.
    fn sender_id(&self) -> &str;

    /// Identifier of the group the request was issued in, if any.
    fn group_id(&self) -> Option<&str>;

    /// Send a plain text reply to the actor.
    async fn send_plain(&self, text: String) -> Result<()>;

    /// Stop further processing of this event.
    fn stop(&self);
}
