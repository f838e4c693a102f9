//! Lock-free synchronization primitives and their validation harness.
//!
//! Two primitives, built exclusively from atomic loads/stores, atomic
//! read-modify-write operations, spin hints, and acquire/release ordering:
//!
//! - [`ring::RingBuffer`] - a bounded circular queue of payload handles,
//!   offered in SPSC and MPMC enqueue/dequeue variants
//! - [`barrier::FlagTable`] - a reusable N-participant dissemination
//!   barrier with O(log N) communication rounds per episode
//!
//! Neither primitive blocks on a mutex or performs a syscall; "blocking"
//! behavior is busy-spin polling with a backoff hint. Safe, handle-based
//! wrappers for in-process use live in [`sync`]; the scaffolding used by
//! the validation binaries (CPU pinning, tagged payloads, delivery
//! accounting) lives in [`harness`].

pub mod barrier;
pub mod harness;
pub mod ring;
pub mod sync;

mod trace;

pub use trace::init_tracing;
