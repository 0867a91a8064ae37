//! Rate limiting logic and state management.

mod backend;
mod decision;
mod engine;
mod rules;
mod window;

pub use backend::AdmissionBackend;
pub use decision::{Decision, Reason};
pub use engine::{AdmissionEngine, EngineStats};
pub use rules::{validate_count, LimitConfig, LimitResolver, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
pub use window::{round_to_tenth, SlidingWindowCounter, WindowCheck};
