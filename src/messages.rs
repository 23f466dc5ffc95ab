// Define message types published by the runtime

use serde::{Deserialize, Serialize};

/// Per-actuator speeds in the order the control loop visits them
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SpeedSet {
    pub left_track: i16,
    pub right_track: i16,
    pub base: i16,
}

impl From<[i16; 3]> for SpeedSet {
    fn from(speeds: [i16; 3]) -> Self {
        Self {
            left_track: speeds[0],
            right_track: speeds[1],
            base: speeds[2],
        }
    }
}

/// Health status published by runtime
#[repr(u8)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok = 0,
    /// No command client holds a liveliness token
    NoClient = 1,
    /// A client is connected but went silent past the command timeout
    CmdStale = 2,
}

impl RuntimeHealth {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Ok,
            2 => Self::CmdStale,
            _ => Self::NoClient,
        }
    }
}

/// Snapshot published on the health topic every tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub health: RuntimeHealth,
    pub target: SpeedSet,
    pub applied: SpeedSet,
    pub output_fault: bool,
}
