//! Scaffolding for the correctness-validation binaries.
//!
//! The primitives never detect runtime correctness violations
//! themselves; duplicate delivery, out-of-range payloads, and torn
//! barrier episodes are invariant breaches a caller's validation logic
//! must catch. This module holds that logic, plus the CPU pinning the
//! validation drivers use to spread worker threads across cores:
//!
//! - [`affinity`] - topology detection and delta-stride thread pinning
//! - [`checks`] - tagged payload entries and exactly-once accounting

pub mod affinity;
pub mod checks;
