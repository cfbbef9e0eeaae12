//! N-party rendezvous primitive and the double-buffered barrier pair used
//! throughout the pipeline (syncio, start triggers, lockstep).
//!
//! A single [`Barrier`] is a reusable pthread-style barrier: `parties`
//! threads must call [`Barrier::wait`] before any of them is released,
//! and the barrier resets itself for the next round via a generation
//! counter. [`BarrierPair`] holds two such barriers addressed by a
//! caller-owned toggling index bit, so a late arriver from round N can
//! never collide with an early arriver of round N+1 — the two rounds use
//! physically distinct barriers.

use parking_lot::{Condvar, Mutex};

struct BarrierState {
    count: usize,
    generation: u64,
}

/// A reusable N-party rendezvous point.
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

impl Barrier {
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "barrier must have at least one party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                count: 0,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until `parties` calls to `wait` have been made on this
    /// barrier since the last release, then releases all of them at once.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.count += 1;
        if state.count == self.parties {
            // Last arriver: release everyone and advance to the next round.
            state.count = 0;
            state.generation = state.generation.wrapping_add(1);
            self.condvar.notify_all();
        } else {
            // Wait for the generation to change, guarding against spurious
            // wakeups and against waiting threads that arrive for the next
            // round before we've observed our own release.
            while state.generation == generation {
                self.condvar.wait(&mut state);
            }
        }
    }
}

/// Two barriers addressed by a toggling 1-bit index. Callers own the
/// index (it lives on the `Target`/`LockstepBlock` the barrier pair
/// belongs to) and flip it immediately after each `wait`.
pub struct BarrierPair {
    bars: [Barrier; 2],
}

impl BarrierPair {
    pub fn new(parties: usize) -> Self {
        Self {
            bars: [Barrier::new(parties), Barrier::new(parties)],
        }
    }

    /// Enters the barrier addressed by `index` (0 or 1).
    pub fn enter(&self, index: usize) {
        self.bars[index & 1].wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn releases_all_parties_together() {
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let b = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                b.wait();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn barrier_pair_alternates_rounds() {
        let pair = Arc::new(BarrierPair::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let p = Arc::clone(&pair);
            handles.push(thread::spawn(move || {
                let mut idx = 0usize;
                for _ in 0..5 {
                    p.enter(idx);
                    idx ^= 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn single_party_barrier_never_blocks() {
        let barrier = Barrier::new(1);
        barrier.wait();
        barrier.wait();
    }
}
