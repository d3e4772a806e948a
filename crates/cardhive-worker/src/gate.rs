//! Progress reporting gate
//!
//! Byte-level progress events arrive far more often than anyone polls,
//! so persisting each one would hammer the database for no benefit. The
//! gate admits a percent value only when it moved at least `step` points
//! past the last admitted value, or when it reaches 100.

/// Decides which observed percent values are worth persisting.
///
/// Admitted values are monotonic; a value below the last admitted one is
/// always rejected. 100 is admitted exactly once.
#[derive(Debug)]
pub struct ProgressGate {
    step: i32,
    last_admitted: i32,
}

impl ProgressGate {
    pub fn new(step: i32) -> Self {
        Self {
            step: step.max(1),
            last_admitted: 0,
        }
    }

    /// Returns true when `percent` should be persisted, and records it as
    /// the new baseline.
    pub fn admit(&mut self, percent: i32) -> bool {
        if percent <= self.last_admitted {
            return false;
        }
        if percent - self.last_admitted >= self.step || percent == 100 {
            self.last_admitted = percent;
            return true;
        }
        false
    }

    /// Last value the gate admitted, 0 when none has been.
    pub fn last_admitted(&self) -> i32 {
        self.last_admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_every_step() {
        let mut gate = ProgressGate::new(5);
        assert!(!gate.admit(0));
        assert!(!gate.admit(3));
        assert!(gate.admit(5));
        assert!(!gate.admit(7));
        assert!(!gate.admit(9));
        assert!(gate.admit(10));
        assert!(gate.admit(42));
    }

    #[test]
    fn hundred_always_passes_the_gate() {
        let mut gate = ProgressGate::new(5);
        assert!(gate.admit(98));
        // 100 - 98 < step, completion still goes through
        assert!(gate.admit(100));
    }

    #[test]
    fn hundred_is_admitted_once() {
        let mut gate = ProgressGate::new(5);
        assert!(gate.admit(100));
        assert!(!gate.admit(100));
    }

    #[test]
    fn regressions_are_rejected() {
        let mut gate = ProgressGate::new(5);
        assert!(gate.admit(50));
        assert!(!gate.admit(40));
        assert!(!gate.admit(50));
        assert!(gate.admit(55));
    }

    #[test]
    fn zero_step_behaves_as_one() {
        let mut gate = ProgressGate::new(0);
        assert!(gate.admit(1));
        assert!(gate.admit(2));
    }
}
