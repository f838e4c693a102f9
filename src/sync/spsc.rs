//! Safe SPSC endpoints over a shared ring buffer.
//!
//! A bounded queue split into a [`Producer`] and a [`Consumer`] handle.
//! Each handle is `Send` but not `Sync`, so the single-producer and
//! single-consumer contracts of the underlying
//! [`RingBuffer`](crate::ring::RingBuffer) hold by construction: an
//! endpoint can move to another thread, but `&Producer` cannot be shared
//! for concurrent pushes.
//!
//! # Example
//!
//! ```
//! use weft::sync::spsc;
//!
//! let (producer, consumer) = spsc::channel::<u64>(1024).unwrap();
//!
//! producer.push(42).expect("queue full");
//! assert_eq!(consumer.pop(), Some(42));
//! ```
//!
//! The primitives themselves never block beyond a peer's progress;
//! bounded waiting is layered here, outside them, via the `*_blocking`
//! methods and their [`Timeout`].

use std::cell::Cell;
use std::hint;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::ring::{RingBuffer, RingError};

/// Timeout specification for the blocking wrappers.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Spin indefinitely.
    Infinite,
    /// Spin for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Marker type to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the queue. Exactly one exists per channel.
pub struct Producer<T: Send> {
    ring: Arc<RingBuffer<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the queue. Exactly one exists per channel.
pub struct Consumer<T: Send> {
    ring: Arc<RingBuffer<T>>,
    _unsync: PhantomUnsync,
}

/// Creates an SPSC channel over a ring with `capacity` slots.
///
/// The usable capacity is `capacity - 1`; see
/// [`RingBuffer`](crate::ring::RingBuffer).
///
/// # Errors
///
/// Returns [`RingError::InvalidCapacity`] unless `capacity` is a power
/// of two greater than 1.
pub fn channel<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), RingError> {
    let ring = Arc::new(RingBuffer::with_capacity(capacity)?);

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    Ok((producer, consumer))
}

impl<T: Send> Producer<T> {
    /// Attempts to push an item (non-blocking).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this handle is the unique producer endpoint (not Sync,
        // never cloned), and the buffer is only ever driven through the
        // SPSC methods by this module.
        unsafe { self.ring.enqueue_spsc(item) }
    }

    /// Spins until space is available, then pushes.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    #[inline]
    pub fn push_blocking(&self, mut item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if let Some(dl) = deadline {
                        if Instant::now() > dl {
                            return Err(item);
                        }
                    }
                    hint::spin_loop();
                }
            }
        }
    }

    /// Slot count of the underlying ring.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item (non-blocking).
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this handle is the unique consumer endpoint (not Sync,
        // never cloned), and the buffer is only ever driven through the
        // SPSC methods by this module.
        unsafe { self.ring.dequeue_spsc() }
    }

    /// Spins until an item is available, then pops.
    ///
    /// Returns `None` on timeout.
    #[inline]
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline {
                if Instant::now() > dl {
                    return None;
                }
            }
            hint::spin_loop();
        }
    }

    /// Occupancy estimate of the underlying ring.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.ring.size()
    }
}
