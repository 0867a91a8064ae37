//! LLM Throttle - sliding-window admission control for LLM calls
//!
//! This crate decides whether an actor (optionally inside a group) may trigger
//! a costly downstream call. Decisions combine a per-actor cap resolved from
//! a layered configuration, an optional per-group aggregate cap, and a bypass
//! list. A thin host layer turns decisions into denial messages and exposes
//! the administrative command surface.

pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod ratelimit;
pub mod store;
