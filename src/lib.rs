//! # beseri-rs
//!
//! Reliable task queue over an ordered store (Redis in production).
//!
//! Producers push tasks onto a main queue; workers claim them atomically
//! into an in-flight area, run them through external executors, and settle
//! each one as a result, a retry with backoff, or a dead letter. A reaper
//! returns tasks abandoned by crashed workers. Delivery is at-least-once.

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;
