//! Host adapter layer.
//!
//! Connects the admission engine to a hosting runtime: a gate that runs
//! before every LLM call, the administrative command surface, and a console
//! runtime used by the binary.

mod admin;
mod console;
mod event;
mod gate;

pub use admin::{AdminCommand, AdminHandler, CommandError, COMMAND_PREFIX};
pub use console::ConsoleHost;
pub use event::RequestEvent;
pub use gate::{render_template, LlmGate};
