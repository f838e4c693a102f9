//! Safe per-participant barrier handles.
//!
//! [`barrier(n)`](barrier) builds one shared
//! [`FlagTable`](crate::barrier::FlagTable) and hands out exactly one
//! [`Waiter`] per participant id. Each waiter owns its episode state, so
//! the core contract - one thread per id, state never shared - holds by
//! construction: duplicate ids and mismatched participant counts are
//! unrepresentable.
//!
//! # Example
//!
//! ```
//! use std::thread;
//!
//! let waiters = weft::sync::barrier::barrier(4).unwrap();
//!
//! let handles: Vec<_> = waiters
//!     .into_iter()
//!     .map(|mut waiter| {
//!         thread::spawn(move || {
//!             // ... phase of work ...
//!             waiter.wait();
//!             // all four participants have arrived
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//! ```

use std::sync::Arc;

use crate::barrier::{BarrierError, FlagTable, WaitState};

/// A participant's handle on a shared dissemination barrier.
///
/// `Send` so it can move to its worker thread; `wait` takes `&mut self`,
/// so a single handle cannot be driven from two threads at once.
pub struct Waiter {
    table: Arc<FlagTable>,
    state: WaitState,
    id: usize,
}

/// Creates a barrier for `participants` threads, returning one [`Waiter`]
/// per id in `[0, participants)`.
///
/// # Errors
///
/// Returns [`BarrierError::InvalidParticipantCount`] if `participants`
/// is zero.
pub fn barrier(participants: usize) -> Result<Vec<Waiter>, BarrierError> {
    let table = Arc::new(FlagTable::new(participants)?);

    Ok((0..participants)
        .map(|id| Waiter {
            table: Arc::clone(&table),
            state: WaitState::new(),
            id,
        })
        .collect())
}

impl Waiter {
    /// Busy-waits until all participants have called `wait` for the
    /// same episode, then returns, ready for the next episode.
    ///
    /// If a peer never arrives this spins forever; there is no timeout.
    #[inline]
    pub fn wait(&mut self) {
        self.table.wait(&mut self.state, self.id);
    }

    /// This participant's id in `[0, N)`.
    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The barrier's fixed participant count N.
    #[inline]
    #[must_use]
    pub fn participants(&self) -> usize {
        self.table.participants()
    }

    /// Communication rounds per episode, `ceil(log2(N))`.
    #[inline]
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.table.rounds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn rejects_zero_participants() {
        assert_eq!(
            barrier(0).err(),
            Some(BarrierError::InvalidParticipantCount(0))
        );
    }

    #[test]
    fn hands_out_one_waiter_per_id() {
        let waiters = barrier(4).unwrap();
        let ids: Vec<_> = waiters.iter().map(Waiter::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(waiters.iter().all(|w| w.participants() == 4));
        assert!(waiters.iter().all(|w| w.rounds() == 2));
    }

    #[test]
    fn single_waiter_never_blocks() {
        let mut waiters = barrier(1).unwrap();
        let waiter = &mut waiters[0];
        for _ in 0..1000 {
            waiter.wait();
        }
    }

    /// Each phase's work must be fully visible to every participant
    /// before any of them starts the next phase.
    #[test]
    fn phases_do_not_overlap() {
        let n = 4;
        let phases = 500usize;
        let work = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = barrier(n)
            .unwrap()
            .into_iter()
            .map(|mut waiter| {
                let work = Arc::clone(&work);
                thread::spawn(move || {
                    for phase in 1..=phases {
                        work.fetch_add(1, Ordering::SeqCst);
                        waiter.wait();
                        // The second wait fences the next phase's
                        // increments, so this sample must be exact.
                        let done = work.load(Ordering::SeqCst);
                        assert_eq!(done, phase * n, "phase {phase} overlapped a neighbor");
                        waiter.wait();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(work.load(Ordering::SeqCst), phases * n);
    }
}
