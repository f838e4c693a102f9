//! Reusable N-participant dissemination barrier.
//!
//! Instead of contending on one shared counter, each barrier episode runs
//! `ceil(log2(N))` communication rounds. In round `r`, participant `id`
//! signals partner `(id + 2^r) mod N` and waits on the flag written by
//! partner `(id - 2^r) mod N` - the standard two-sided dissemination
//! schedule. After the last round every participant has transitively
//! observed every other participant's arrival, at a cost of O(log N)
//! flags and O(log N) cross-thread observations per call.
//!
//! Every flag cell has exactly one writer (the signaling partner) and
//! exactly one reader (its owner), which is what keeps per-call memory
//! traffic at O(log N) instead of O(N).
//!
//! # Episode reuse
//!
//! The table holds two banks of flags. Successive episodes alternate
//! banks (`parity`), and the value stored in the flags (`sense`) inverts
//! every second episode, so a bank revisited at episode k+2 cannot alias
//! values left by episode k. A participant can be at most one episode
//! ahead of or behind its peers: every round of every episode requires a
//! pairwise acknowledgment before anyone advances.
//!
//! # Liveness
//!
//! There is no cancellation and no timeout. If fewer than N participants
//! ever arrive for an episode, the rest spin forever. This is a
//! documented hazard, not a handled error; liveness rests on the
//! external fairness assumption that every registered participant
//! eventually executes.

use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Construction-time contract violations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    /// Participant count must be greater than zero.
    #[error("participant count must be greater than 0, got {0}")]
    InvalidParticipantCount(usize),
}

/// One flag cell on its own cache line.
///
/// Exactly one participant writes it and exactly one reads it, so
/// padding each cell keeps the pairwise traffic from false sharing.
#[repr(align(64))]
struct Flag(AtomicU32);

/// Per-participant episode state.
///
/// `parity` selects which of the two flag banks the next episode uses;
/// `sense` is the value stored into (and awaited in) the flags, inverted
/// each time the participant leaves bank 1.
#[derive(Debug, Clone, Copy)]
pub struct WaitState {
    parity: usize,
    sense: u32,
}

impl WaitState {
    /// State for a participant that has not yet entered any episode.
    ///
    /// All participants must start from this state against a fresh
    /// [`FlagTable`]; the flags are zero-initialized and the first
    /// episode awaits the value 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { parity: 0, sense: 1 }
    }
}

impl Default for WaitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared dissemination barrier flag table for a fixed participant count.
///
/// Allocated once, read-mostly afterward: the participant count and
/// round count never change. Reinitialize (construct a new table) to
/// change N. The table is `Sync` and is shared by reference or `Arc`
/// among all participants; each participant additionally owns a
/// [`WaitState`] that must be threaded through its successive calls.
pub struct FlagTable {
    participants: usize,
    rounds: usize,
    /// Flat `[participant][bank][round]` cells, owned and index-checked,
    /// never a pointer-to-pointer table.
    flags: Box<[Flag]>,
}

impl FlagTable {
    /// Builds the flag table for `participants` threads.
    ///
    /// The round count is fixed at `ceil(log2(participants))` for the
    /// lifetime of the table. A single participant degenerates to zero
    /// rounds and [`wait`](Self::wait) returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::InvalidParticipantCount`] if
    /// `participants` is zero.
    pub fn new(participants: usize) -> Result<Self, BarrierError> {
        if participants == 0 {
            return Err(BarrierError::InvalidParticipantCount(participants));
        }

        let rounds = participants.next_power_of_two().trailing_zeros() as usize;
        let flags = (0..participants * 2 * rounds.max(1))
            .map(|_| Flag(AtomicU32::new(0)))
            .collect();

        crate::trace::debug!(participants, rounds, "dissemination flag table built");

        Ok(Self {
            participants,
            rounds,
            flags,
        })
    }

    /// The fixed participant count N.
    #[inline]
    #[must_use]
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Communication rounds per episode, `ceil(log2(N))`.
    #[inline]
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    #[inline]
    fn cell(&self, participant: usize, bank: usize, round: usize) -> &AtomicU32 {
        &self.flags[(participant * 2 + bank) * self.rounds + round].0
    }

    /// Blocks (busy-spins) until all N participants have called `wait`
    /// for the same episode.
    ///
    /// `state` must be the [`WaitState`] owned by participant `id`, and
    /// each id in `[0, N)` must be used by exactly one thread per
    /// episode. Safe to call repeatedly back-to-back; the bank/sense
    /// toggling makes the table reusable for unboundedly many episodes.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in `[0, N)`.
    pub fn wait(&self, state: &mut WaitState, id: usize) {
        let n = self.participants;
        assert!(id < n, "participant id {id} out of range for {n} participants");

        for round in 0..self.rounds {
            let peer = (id + (1 << round)) % n;

            // Signal the outbound partner; release publishes all of this
            // thread's pre-episode writes along the observation chain.
            self.cell(peer, state.parity, round)
                .store(state.sense, Ordering::Release);

            // Wait for the inbound partner (id - 2^round mod N), the
            // unique writer of this cell in this bank.
            let own = self.cell(id, state.parity, round);
            while own.load(Ordering::Acquire) != state.sense {
                hint::spin_loop();
            }
        }

        // Invert the awaited value each time we leave bank 1, so the
        // next visit to each bank awaits a value its stale flags cannot
        // already hold.
        if state.parity == 1 {
            state.sense ^= 1;
        }
        state.parity ^= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_zero_participants() {
        assert_eq!(
            FlagTable::new(0).err(),
            Some(BarrierError::InvalidParticipantCount(0))
        );
    }

    #[test]
    fn round_count_is_ceil_log2() {
        for (n, rounds) in [(1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            assert_eq!(FlagTable::new(n).unwrap().rounds(), rounds, "N = {n}");
        }
    }

    /// N=4: round 0 signals (0->1, 1->2, 2->3, 3->0), round 1 signals
    /// (0->2, 1->3, 2->0, 3->1).
    #[test]
    fn partner_schedule_for_four_participants() {
        let n = 4;
        let expect = [[1, 2], [2, 3], [3, 0], [0, 1]];
        for id in 0..n {
            for round in 0..2 {
                assert_eq!((id + (1 << round)) % n, expect[id][round]);
            }
        }
    }

    #[test]
    fn single_participant_returns_immediately() {
        let table = FlagTable::new(1).unwrap();
        let mut state = WaitState::new();
        for _ in 0..100 {
            table.wait(&mut state, 0);
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_id_panics() {
        let table = FlagTable::new(2).unwrap();
        table.wait(&mut WaitState::new(), 2);
    }

    /// The episode counter sampled right after each wait must always be
    /// an exact multiple of N - never an intermediate arrival count.
    #[test]
    fn arrivals_are_multiples_of_n_across_episodes() {
        let n = 4;
        let episodes = 200usize;
        let table = Arc::new(FlagTable::new(n).unwrap());
        let arrivals = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..n)
            .map(|id| {
                let table = Arc::clone(&table);
                let arrivals = Arc::clone(&arrivals);
                thread::spawn(move || {
                    let mut state = WaitState::new();
                    for episode in 1..=episodes {
                        arrivals.fetch_add(1, Ordering::SeqCst);
                        table.wait(&mut state, id);
                        // The second wait below fences the next episode's
                        // increments, so the sample here must be exact.
                        let seen = arrivals.load(Ordering::SeqCst);
                        assert_eq!(
                            seen,
                            episode * n,
                            "participant {id} episode {episode}: \
                             sampled an intermediate arrival count"
                        );
                        table.wait(&mut state, id);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(arrivals.load(Ordering::SeqCst), episodes * n);
    }
}
