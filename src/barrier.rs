//! Core dissemination barrier primitives.
//!
//! This module contains the shared flag table and wait loop used by
//! [`crate::sync::barrier`], which wraps them in one owned handle per
//! participant.

mod dissemination;

pub use dissemination::{BarrierError, FlagTable, WaitState};
