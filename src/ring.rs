//! Core bounded ring buffer primitives.
//!
//! This module contains the shared lock-free ring buffer used by:
//! - [`crate::sync::spsc`] - safe single-producer/single-consumer handles
//! - the MPMC surface of [`RingBuffer`] itself, which is safe to share
//!   directly between any number of producer and consumer threads

mod buffer;

pub use buffer::{RingBuffer, RingError};
