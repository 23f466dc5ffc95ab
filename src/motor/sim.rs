// In-memory PWM device, used with --simulate and by the tests

use std::collections::HashMap;

use tracing::debug;

use super::pwm::{CHANNEL_COUNT, PwmError, PwmOutput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub frequency_hz: u32,
    pub resolution_bits: u8,
    pub pin: Option<u8>,
    pub duty: u16,
}

#[derive(Debug, Default)]
pub struct SimulatedPwm {
    channels: [ChannelState; CHANNEL_COUNT],
    levels: HashMap<u8, bool>,
    duty_writes: usize,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a channel, `None` if the device has no such channel
    pub fn channel(&self, channel: u8) -> Option<ChannelState> {
        self.channels.get(channel as usize).copied()
    }

    pub fn duty(&self, channel: u8) -> Option<u16> {
        self.channel(channel).map(|ch| ch.duty)
    }

    /// Level of a digital pin, `None` if it was never driven
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.levels.get(&pin).copied()
    }

    /// Total duty writes since creation
    pub fn duty_writes(&self) -> usize {
        self.duty_writes
    }

    fn slot(&mut self, channel: u8) -> Result<&mut ChannelState, PwmError> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(PwmError::InvalidChannel { channel })
    }
}

impl PwmOutput for SimulatedPwm {
    fn configure_channel(&mut self, channel: u8, frequency_hz: u32, resolution_bits: u8) -> Result<(), PwmError> {
        let slot = self.slot(channel)?;
        slot.frequency_hz = frequency_hz;
        slot.resolution_bits = resolution_bits;
        debug!("sim: channel {} at {} Hz / {} bit", channel, frequency_hz, resolution_bits);
        Ok(())
    }

    fn attach_pin(&mut self, channel: u8, pin: u8) -> Result<(), PwmError> {
        self.slot(channel)?.pin = Some(pin);
        Ok(())
    }

    fn set_level(&mut self, pin: u8, high: bool) -> Result<(), PwmError> {
        self.levels.insert(pin, high);
        Ok(())
    }

    fn write_duty(&mut self, channel: u8, duty: u16) -> Result<(), PwmError> {
        self.slot(channel)?.duty = duty;
        self.duty_writes += 1;
        Ok(())
    }
}
