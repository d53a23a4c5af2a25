//! Speaker liveness tracking
//!
//! A speaker counts as alive until more than [`MISSED_FRAMES_DEAD`]
//! consecutive jitter retrievals come back empty. The flip is applied at the
//! end of the pull that observed it, and each pull reports the state from
//! before the call, so callers see a talk→silence transition one pull late.

use std::sync::atomic::{AtomicU32, Ordering};

/// Consecutive missed retrievals tolerated before a speaker stops being alive
pub const MISSED_FRAMES_DEAD: u32 = 10;

/// Below this many misses an empty jitter buffer is played as plain silence
/// instead of concealment
pub const SILENCE_MISS_LIMIT: u32 = 20;

/// Consecutive missed-frame counter shared by both call paths
#[derive(Debug, Default)]
pub struct MissCounter {
    missed: AtomicU32,
}

impl MissCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a miss and return the new count
    pub fn miss(&self) -> u32 {
        self.missed.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn reset(&self) {
        self.missed.store(0, Ordering::Release);
    }

    pub fn get(&self) -> u32 {
        self.missed.load(Ordering::Acquire)
    }
}

/// Liveness flag owned by the pull side
#[derive(Debug)]
pub struct Liveness {
    alive: bool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self { alive: true }
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Start tracking one pull
    pub fn begin(&self) -> PullLiveness {
        PullLiveness {
            was_alive: self.alive,
            next_alive: self.alive,
        }
    }

    /// Store the outcome of a pull and return the state it started with
    pub fn finish(&mut self, pull: PullLiveness) -> bool {
        self.alive = pull.next_alive;
        pull.was_alive
    }

    /// Mark a silent speaker as talking again
    pub fn revive(&mut self) {
        self.alive = true;
    }
}

/// Liveness state carried through a single pull
#[derive(Debug, Clone, Copy)]
pub struct PullLiveness {
    was_alive: bool,
    next_alive: bool,
}

impl PullLiveness {
    /// Whether the speaker was alive when the pull started
    pub fn was_alive(&self) -> bool {
        self.was_alive
    }

    /// Feed the missed count after a failed retrieval
    pub fn record_miss(&mut self, missed: u32) {
        if missed > MISSED_FRAMES_DEAD {
            self.next_alive = false;
        }
    }
}

/// Whether a speaker with `missed` consecutive misses still counts as
/// streaming for the mixer, given its codec threshold
pub fn is_streaming(missed: u32, threshold: u32) -> bool {
    missed < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_counter() {
        let counter = MissCounter::new();
        assert_eq!(counter.miss(), 1);
        assert_eq!(counter.miss(), 2);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_flip_is_reported_one_pull_late() {
        let mut liveness = Liveness::new();

        let mut pull = liveness.begin();
        for missed in 1..=MISSED_FRAMES_DEAD {
            pull.record_miss(missed);
        }
        assert!(liveness.finish(pull));
        assert!(liveness.is_alive());

        let mut pull = liveness.begin();
        pull.record_miss(MISSED_FRAMES_DEAD + 1);
        // Still reports the state from before this pull
        assert!(liveness.finish(pull));
        assert!(!liveness.is_alive());

        let pull = liveness.begin();
        assert!(!liveness.finish(pull));
    }

    #[test]
    fn test_revive() {
        let mut liveness = Liveness::new();
        let mut pull = liveness.begin();
        pull.record_miss(MISSED_FRAMES_DEAD + 5);
        liveness.finish(pull);
        assert!(!liveness.is_alive());

        liveness.revive();
        assert!(liveness.is_alive());
    }

    #[test]
    fn test_streaming_thresholds() {
        assert!(is_streaming(9, 10));
        assert!(!is_streaming(10, 10));
        assert!(is_streaming(11, 12));
        assert!(!is_streaming(12, 12));
    }
}
