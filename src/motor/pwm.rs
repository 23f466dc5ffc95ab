// PWM output abstraction and the H-bridge drive convention
//
// A BTS7960 H-bridge has one PWM input per current direction. Driving forward
// puts the duty on the forward channel and holds reverse at 0, and vice versa.

use crate::config::{BridgeWiring, MAX_SPEED};

/// Number of PWM channels on the output device (two per actuator)
pub const CHANNEL_COUNT: usize = 6;

/// Error types for PWM output devices
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PWM channel {channel} does not exist")]
    InvalidChannel { channel: u8 },

    #[error("Invalid response from PWM bridge: {reason}")]
    InvalidResponse { reason: String },

    #[error("Checksum mismatch in PWM bridge response")]
    ChecksumMismatch,

    #[error("PWM bridge returned error status: 0x{status:02X}")]
    BridgeError { status: u8 },

    #[error("Timeout waiting for response from PWM bridge")]
    Timeout,
}

/// A device with independently settable PWM channels and digital output pins
pub trait PwmOutput: Send {
    /// Set frequency and resolution of a channel
    fn configure_channel(&mut self, channel: u8, frequency_hz: u32, resolution_bits: u8) -> Result<(), PwmError>;

    /// Route a channel to a physical output pin
    fn attach_pin(&mut self, channel: u8, pin: u8) -> Result<(), PwmError>;

    /// Drive a plain digital output (driver-enable lines)
    fn set_level(&mut self, pin: u8, high: bool) -> Result<(), PwmError>;

    /// Set the duty cycle of a channel. Called every control tick, must not block
    /// or allocate.
    fn write_duty(&mut self, channel: u8, duty: u16) -> Result<(), PwmError>;
}

impl<P: PwmOutput + ?Sized> PwmOutput for Box<P> {
    fn configure_channel(&mut self, channel: u8, frequency_hz: u32, resolution_bits: u8) -> Result<(), PwmError> {
        (**self).configure_channel(channel, frequency_hz, resolution_bits)
    }

    fn attach_pin(&mut self, channel: u8, pin: u8) -> Result<(), PwmError> {
        (**self).attach_pin(channel, pin)
    }

    fn set_level(&mut self, pin: u8, high: bool) -> Result<(), PwmError> {
        (**self).set_level(pin, high)
    }

    fn write_duty(&mut self, channel: u8, duty: u16) -> Result<(), PwmError> {
        (**self).write_duty(channel, duty)
    }
}

/// Largest duty value of a channel with the given resolution
pub const fn max_duty(resolution_bits: u8) -> u16 {
    ((1u32 << resolution_bits) - 1) as u16
}

/// Duty cycles (forward, reverse) for a signed speed, scaled so that
/// MAX_SPEED maps to `full_duty`. Out-of-range speeds are clamped.
pub fn bridge_duties(speed: i16, full_duty: u16) -> (u16, u16) {
    let speed = speed.clamp(-MAX_SPEED, MAX_SPEED);
    let duty = (speed.unsigned_abs() as u32 * full_duty as u32 / MAX_SPEED as u32) as u16;
    if speed > 0 {
        (duty, 0)
    } else if speed < 0 {
        (0, duty)
    } else {
        (0, 0)
    }
}

/// Write a signed speed to both channels of one H-bridge
pub fn drive_bridge<P: PwmOutput + ?Sized>(
    pwm: &mut P,
    wiring: &BridgeWiring,
    speed: i16,
    full_duty: u16,
) -> Result<(), PwmError> {
    let (forward, reverse) = bridge_duties(speed, full_duty);
    pwm.write_duty(wiring.forward_channel, forward)?;
    pwm.write_duty(wiring.reverse_channel, reverse)
}
