//! Admission backend trait for decoupling hosts from the engine.

use std::time::Duration;

use super::decision::Decision;

/// Trait for admission decision implementations.
///
/// The host layer works against this trait so it can be driven by the
/// [`AdmissionEngine`](super::AdmissionEngine) or by a test double.
pub trait AdmissionBackend: Send + Sync {
    /// Decide whether `actor` (optionally inside `group`) may proceed at `now`.
    fn admit(&self, actor: &str, group: Option<&str>, now: Duration) -> Decision;
}
