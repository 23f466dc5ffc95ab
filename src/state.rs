// Shared target-speed state
//
// Written by the command path (zenoh task), read by the control loop every tick.
// One atomic per actuator: loads and stores are never torn and never block,
// so neither side can stall the other.

use std::sync::atomic::{AtomicI16, AtomicU8, Ordering};

use crate::config::{BASE_WIRING, BridgeWiring, LEFT_TRACK_WIRING, MAX_SPEED, RIGHT_TRACK_WIRING};
use crate::messages::RuntimeHealth;

/// The three physical degrees of freedom of the rover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    LeftTrack,
    RightTrack,
    Base,
}

impl Actuator {
    /// Control loop visiting order
    pub const ALL: [Actuator; 3] = [Actuator::LeftTrack, Actuator::RightTrack, Actuator::Base];

    pub const fn index(self) -> usize {
        match self {
            Actuator::LeftTrack => 0,
            Actuator::RightTrack => 1,
            Actuator::Base => 2,
        }
    }

    /// H-bridge pins and PWM channels driving this actuator
    pub const fn wiring(self) -> BridgeWiring {
        match self {
            Actuator::LeftTrack => LEFT_TRACK_WIRING,
            Actuator::RightTrack => RIGHT_TRACK_WIRING,
            Actuator::Base => BASE_WIRING,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Actuator::LeftTrack => "Left Track",
            Actuator::RightTrack => "Right Track",
            Actuator::Base => "Base",
        }
    }
}

/// Operator-requested speed per actuator, in [-MAX_SPEED, MAX_SPEED]
#[derive(Debug, Default)]
pub struct TargetSpeeds {
    speeds: [AtomicI16; 3],
}

impl TargetSpeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actuator: Actuator) -> i16 {
        self.speeds[actuator.index()].load(Ordering::Relaxed)
    }

    /// Only the command interpreter calls this, after range validation
    pub fn set(&self, actuator: Actuator, speed: i16) {
        debug_assert!(
            (-MAX_SPEED..=MAX_SPEED).contains(&speed),
            "target speed {} out of range",
            speed
        );
        self.speeds[actuator.index()].store(speed, Ordering::Relaxed);
    }

    /// Store without the range check, to exercise readers against bad values
    #[cfg(test)]
    pub(crate) fn force(&self, actuator: Actuator, speed: i16) {
        self.speeds[actuator.index()].store(speed, Ordering::Relaxed);
    }

    /// Fail-safe stop
    pub fn zero_all(&self) {
        for actuator in Actuator::ALL {
            self.set(actuator, 0);
        }
    }

    pub fn snapshot(&self) -> [i16; 3] {
        Actuator::ALL.map(|a| self.get(a))
    }
}

/// Command channel health, set by the command task and reported by the control loop
#[derive(Debug)]
pub struct HealthCell(AtomicU8);

impl HealthCell {
    pub fn new(health: RuntimeHealth) -> Self {
        Self(AtomicU8::new(health as u8))
    }

    pub fn get(&self) -> RuntimeHealth {
        RuntimeHealth::from_u8(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, health: RuntimeHealth) {
        self.0.store(health as u8, Ordering::Relaxed);
    }
}
