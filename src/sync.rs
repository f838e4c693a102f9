//! Safe, handle-based wrappers for in-process use.
//!
//! The core modules ([`crate::ring`], [`crate::barrier`]) expose the raw
//! algorithms; this module splits them into owned endpoint handles so
//! the single-caller contracts become unrepresentable instead of
//! documented:
//!
//! - [`spsc`] - `(Producer, Consumer)` pair over one ring buffer
//! - [`barrier`] - one [`barrier::Waiter`] per participant id

pub mod barrier;
pub mod spsc;
