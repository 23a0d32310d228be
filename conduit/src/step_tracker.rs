//! Step Tracker: cumulative step counting for one run, clamped against the global cap.

use std::sync::Mutex;

use crate::model::limits::MAX_TOTAL_STEPS_PER_RUN;

/// `(steps, max_steps)` guarded by a mutex. `steps` is seeded from the prior run's
/// `step_count` on resume, so it accumulates across a resume chain rather than resetting
/// per attempt.
pub struct StepTracker {
    inner: Mutex<Inner>,
}

struct Inner {
    steps: u32,
    max_steps: u32,
}

impl StepTracker {
    /// `max_steps` is clamped so `initial_steps + max_steps <= MAX_TOTAL_STEPS_PER_RUN`.
    pub fn new(initial_steps: u32, max_steps: u32) -> Self {
        let clamped = max_steps.min(MAX_TOTAL_STEPS_PER_RUN.saturating_sub(initial_steps));
        Self {
            inner: Mutex::new(Inner {
                steps: initial_steps,
                max_steps: clamped,
            }),
        }
    }

    /// Increments the step count and returns the new value.
    pub fn increment(&self) -> u32 {
        let mut inner = self.inner.lock().expect("step tracker mutex poisoned");
        inner.steps += 1;
        inner.steps
    }

    pub fn current(&self) -> u32 {
        self.inner.lock().expect("step tracker mutex poisoned").steps
    }

    pub fn max_steps(&self) -> u32 {
        self.inner
            .lock()
            .expect("step tracker mutex poisoned")
            .max_steps
    }

    pub fn exceeded(&self) -> bool {
        let inner = self.inner.lock().expect("step tracker mutex poisoned");
        inner.steps >= inner.max_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_returns_new_value_and_accumulates() {
        let tracker = StepTracker::new(0, 10);
        assert_eq!(tracker.increment(), 1);
        assert_eq!(tracker.increment(), 2);
        assert_eq!(tracker.current(), 2);
    }

    #[test]
    fn exceeded_once_steps_reach_max() {
        let tracker = StepTracker::new(0, 2);
        assert!(!tracker.exceeded());
        tracker.increment();
        assert!(!tracker.exceeded());
        tracker.increment();
        assert!(tracker.exceeded());
    }

    #[test]
    fn resumed_run_seeds_cumulative_steps() {
        let tracker = StepTracker::new(498, 10);
        // Clamped so 498 + max_steps <= 500.
        assert_eq!(tracker.max_steps(), 2);
        tracker.increment();
        tracker.increment();
        assert!(tracker.exceeded());
    }

    #[test]
    fn max_steps_never_exceeds_global_cap_from_zero() {
        let tracker = StepTracker::new(0, 10_000);
        assert_eq!(tracker.max_steps(), MAX_TOTAL_STEPS_PER_RUN);
    }
}
