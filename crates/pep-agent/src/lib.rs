//! The Detection Agent — spec.md §4.1/§6.
//!
//! Runs at each hospital, polls its EHR for newly recorded deaths on a
//! config-driven schedule, masks the CPF field, and delivers each new
//! record to the central system with a bounded retry ladder. Everything it
//! needs about the hospital's schema comes from its own YAML config
//! ([`pep_config::agent`]) — the agent has no compiled knowledge of any
//! particular EHR's table layout.

pub mod client;
pub mod health;
pub mod masking;
pub mod poll;
pub mod watermark;

pub use client::CentralClient;
pub use health::{new_shared, router as health_router, SharedHealth};
pub use poll::PollLoop;
pub use watermark::{AgentState, WatermarkStore};
