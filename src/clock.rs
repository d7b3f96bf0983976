//! Lamport logical clock.
//!
//! A single counter guarded by a mutex. `tick` advances it for a local event,
//! `observe` folds in a received timestamp. Both are serializable with
//! respect to each other and with `read`, which is all Ricart-Agrawala's
//! tie-break needs: unique, monotonically assigned local timestamps.

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct LamportClock {
    time: Mutex<u64>,
}

impl LamportClock {
    pub fn new() -> Self {
        Self {
            time: Mutex::new(0),
        }
    }

    /// Advance the clock for a local event and return the new value.
    pub fn tick(&self) -> u64 {
        let mut t = self.time.lock();
        *t += 1;
        *t
    }

    /// Fold in a timestamp observed on an inbound message.
    pub fn observe(&self, received: u64) -> u64 {
        let mut t = self.time.lock();
        *t = (*t).max(received) + 1;
        *t
    }

    pub fn read(&self) -> u64 {
        *self.time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_monotonic() {
        let clock = LamportClock::new();
        let mut prev = clock.read();
        for _ in 0..10 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn observe_takes_max_plus_one() {
        let clock = LamportClock::new();
        clock.tick(); // 1
        clock.tick(); // 2
        assert_eq!(clock.observe(10), 11);
        assert_eq!(clock.observe(3), 12);
    }

    #[test]
    fn concurrent_ticks_never_collide() {
        use std::sync::Arc;
        use std::thread;

        let clock = Arc::new(LamportClock::new());
        let mut handles = Vec::new();
        let mut seen = Vec::new();

        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(thread::spawn(move || {
                let mut local = Vec::new();
                for _ in 0..50 {
                    local.push(clock.tick());
                }
                local
            }));
        }

        for h in handles {
            seen.extend(h.join().unwrap());
        }

        seen.sort_unstable();
        let before = seen.len();
        seen.dedup();
        assert_eq!(before, seen.len(), "every tick must be unique");
    }
}
