// Deadzone compensation and slew-rate limiting
//
// The ramp law is counted in ticks, not wall time: every tick moves the
// applied speed at most one step toward the (normalized) target.

use crate::config::{DEADZONE_MIN, RAMP_STEP};

/// Lifts small nonzero speeds to the minimum drive that actually moves the motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadzone {
    min: i16,
}

impl Deadzone {
    pub fn new(min: i16) -> Self {
        Self { min }
    }

    pub fn normalize(&self, raw: i16) -> i16 {
        if raw == 0 {
            0
        } else if raw.abs() < self.min {
            raw.signum() * self.min
        } else {
            raw
        }
    }
}

impl Default for Deadzone {
    fn default() -> Self {
        Self::new(DEADZONE_MIN)
    }
}

/// Per-actuator slew-rate limiter holding the applied speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampController {
    applied: i16,
    step: i16,
}

impl RampController {
    /// Starts at rest
    pub fn new(step: i16) -> Self {
        debug_assert!(step > 0, "ramp step must be positive");
        Self { applied: 0, step }
    }

    pub fn applied(&self) -> i16 {
        self.applied
    }

    /// Move one step toward `target` without overshooting, returning the new
    /// applied speed
    pub fn advance(&mut self, target: i16) -> i16 {
        if self.applied < target {
            self.applied = self.applied.saturating_add(self.step).min(target);
        } else if self.applied > target {
            self.applied = self.applied.saturating_sub(self.step).max(target);
        }
        self.applied
    }
}

impl Default for RampController {
    fn default() -> Self {
        Self::new(RAMP_STEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_zero_and_large_speeds() {
        let deadzone = Deadzone::default();
        for r in (-255..=-60).chain(60..=255).chain(std::iter::once(0)) {
            assert_eq!(deadzone.normalize(r), r);
        }
    }

    #[test]
    fn test_normalize_lifts_small_speeds() {
        let deadzone = Deadzone::default();
        for r in 1..60 {
            assert_eq!(deadzone.normalize(r), 60);
            assert_eq!(deadzone.normalize(-r), -60);
        }
    }

    #[test]
    fn test_zero_deadzone_is_identity() {
        let deadzone = Deadzone::new(0);
        assert_eq!(deadzone.normalize(1), 1);
        assert_eq!(deadzone.normalize(-1), -1);
    }

    #[test]
    fn test_advance_converges_monotonically() {
        for start in [-255i16, -200, -61, -1, 0, 2, 59, 180, 255] {
            for target in [-255i16, -100, -60, 0, 60, 100, 254, 255] {
                let mut ramp = RampController::new(3);
                ramp.applied = start;
                let mut ticks = 0;
                while ramp.applied() != target {
                    let before = ramp.applied();
                    let after = ramp.advance(target);
                    assert!((after - target).abs() < (before - target).abs());
                    assert!((after - before).abs() <= 3);
                    ticks += 1;
                }
                let expected = ((start - target).abs() as u32).div_ceil(3);
                assert_eq!(ticks, expected, "from {} to {}", start, target);
            }
        }
    }

    #[test]
    fn test_advance_is_idempotent_at_target() {
        let mut ramp = RampController::new(3);
        ramp.applied = 100;
        for _ in 0..10 {
            assert_eq!(ramp.advance(100), 100);
        }
    }

    #[test]
    fn test_advance_clamps_last_step() {
        let mut ramp = RampController::new(3);
        assert_eq!(ramp.advance(2), 2);
        assert_eq!(ramp.advance(-1), -1);
        assert_eq!(ramp.advance(-1), -1);
    }

    #[test]
    fn test_custom_step() {
        let mut ramp = RampController::new(10);
        assert_eq!(ramp.advance(25), 10);
        assert_eq!(ramp.advance(25), 20);
        assert_eq!(ramp.advance(25), 25);
    }
}
