// Topics, wiring, tuning constants and the runtime configuration file
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Speed domain shared by targets and applied speeds. Duty cycles scale this
// to the configured PWM resolution.
pub const MAX_SPEED: i16 = 255;

// Minimum drive that overcomes static friction of the tracks/base (measured)
pub const DEADZONE_MIN: i16 = 60;

// Largest change of applied speed per control tick
pub const RAMP_STEP: i16 = 3;

// PWM config
pub const PWM_FREQ_HZ: u32 = 20_000; // 20 kHz, above audible range
pub const PWM_RESOLUTION_BITS: u8 = 8; // 0-255
pub const PWM_RESOLUTION_RANGE: std::ops::RangeInclusive<u8> = 8..=16;

// Zenoh topics
pub const TOPIC_CMD: &str = "rover/cmd"; // text commands
pub const TOPIC_CMD_REPLY: &str = "rover/cmd/reply"; // acks, rejections, greetings
pub const TOPIC_CLIENTS: &str = "rover/clients/**"; // liveliness tokens of command clients
pub const TOPIC_CLIENT_PREFIX: &str = "rover/clients"; // clients append their own id
pub const TOPIC_ALIVE: &str = "rover/alive"; // liveness check queryable
pub const TOPIC_HEALTH: &str = "rover/state/health"; // health status

pub const GREETING: &str = "Hello from rover runtime!";
pub const ALIVE_RESPONSE: &str = "Rover runtime is alive";

// Serial port for the PWM bridge board
pub const BRIDGE_PORT: &str = "/dev/ttyUSB0";
pub const BRIDGE_BAUDRATE: u32 = 115_200;

// Boot self-test drive
pub const SELF_TEST_SPEED: i16 = 150;
pub const SELF_TEST_DURATION: Duration = Duration::from_secs(3);

/// Pins and PWM channels of one BTS7960 H-bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeWiring {
    pub forward_pin: u8,
    pub reverse_pin: u8,
    pub forward_channel: u8,
    pub reverse_channel: u8,
    pub forward_enable_pin: u8,
    pub reverse_enable_pin: u8,
}

pub const LEFT_TRACK_WIRING: BridgeWiring = BridgeWiring {
    forward_pin: 22,
    reverse_pin: 23,
    forward_channel: 0,
    reverse_channel: 1,
    forward_enable_pin: 14,
    reverse_enable_pin: 13,
};

pub const RIGHT_TRACK_WIRING: BridgeWiring = BridgeWiring {
    forward_pin: 33,
    reverse_pin: 32,
    forward_channel: 2,
    reverse_channel: 3,
    forward_enable_pin: 19,
    reverse_enable_pin: 18,
};

pub const BASE_WIRING: BridgeWiring = BridgeWiring {
    forward_pin: 26,
    reverse_pin: 25,
    forward_channel: 4,
    reverse_channel: 5,
    forward_enable_pin: 16,
    reverse_enable_pin: 17,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime tunables. Every field has a default, so a config file only needs
/// the values it wants to change.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub loop_hz: u64,
    pub ramp_step: i16,
    pub deadzone_min: i16,
    pub pwm_frequency_hz: u32,
    pub pwm_resolution_bits: u8,
    /// Serial port of the PWM bridge board. `None` runs the simulated backend.
    pub bridge_port: Option<String>,
    pub bridge_baudrate: u32,
    /// Treat a connected client as lost after this long without a command.
    pub command_timeout_ms: Option<u64>,
    pub self_test: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            ramp_step: RAMP_STEP,
            deadzone_min: DEADZONE_MIN,
            pwm_frequency_hz: PWM_FREQ_HZ,
            pwm_resolution_bits: PWM_RESOLUTION_BITS,
            bridge_port: Some(BRIDGE_PORT.to_string()),
            bridge_baudrate: BRIDGE_BAUDRATE,
            command_timeout_ms: None,
            self_test: false,
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON config file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_hz == 0 || self.loop_hz > 1000 {
            return Err(ConfigError::Invalid {
                field: "loop_hz",
                reason: format!("{} is outside 1..=1000", self.loop_hz),
            });
        }
        if !(1..=MAX_SPEED).contains(&self.ramp_step) {
            return Err(ConfigError::Invalid {
                field: "ramp_step",
                reason: format!("{} is outside 1..={}", self.ramp_step, MAX_SPEED),
            });
        }
        if !(0..=MAX_SPEED).contains(&self.deadzone_min) {
            return Err(ConfigError::Invalid {
                field: "deadzone_min",
                reason: format!("{} is outside 0..={}", self.deadzone_min, MAX_SPEED),
            });
        }
        // Below 8 bits the speed domain no longer maps onto distinct duties
        if !PWM_RESOLUTION_RANGE.contains(&self.pwm_resolution_bits) {
            return Err(ConfigError::Invalid {
                field: "pwm_resolution_bits",
                reason: format!("{} is outside 8..=16", self.pwm_resolution_bits),
            });
        }
        if self.command_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "command_timeout_ms",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.loop_hz)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}
