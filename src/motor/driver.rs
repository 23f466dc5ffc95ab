// High-level motor driver for the rover
//
// Owns the PWM output device and maps each actuator to its H-bridge through
// the wiring table. Bring-up, drive and shutdown all go through here.

use tracing::{debug, info, warn};

use super::pwm::{PwmError, PwmOutput, drive_bridge, max_duty};
use crate::config::PWM_RESOLUTION_BITS;
use crate::state::Actuator;

pub struct MotorDriver<P: PwmOutput> {
    pwm: P,
    // Duty written for MAX_SPEED at the configured resolution
    full_duty: u16,
}

impl<P: PwmOutput> MotorDriver<P> {
    pub fn new(pwm: P) -> Self {
        Self {
            pwm,
            full_duty: max_duty(PWM_RESOLUTION_BITS),
        }
    }

    /// Prepare every H-bridge for driving
    ///
    /// Configures all six channels, binds them to their pins, raises the
    /// driver-enable lines and leaves every actuator at zero.
    pub fn initialize(&mut self, frequency_hz: u32, resolution_bits: u8) -> Result<(), PwmError> {
        info!(
            "Initializing PWM channels at {} Hz / {} bit",
            frequency_hz, resolution_bits
        );
        self.full_duty = max_duty(resolution_bits);

        for actuator in Actuator::ALL {
            let w = actuator.wiring();
            self.pwm.configure_channel(w.forward_channel, frequency_hz, resolution_bits)?;
            self.pwm.configure_channel(w.reverse_channel, frequency_hz, resolution_bits)?;
        }

        for actuator in Actuator::ALL {
            let w = actuator.wiring();
            self.pwm.attach_pin(w.forward_channel, w.forward_pin)?;
            self.pwm.attach_pin(w.reverse_channel, w.reverse_pin)?;
        }

        self.set_enabled(true)?;
        self.stop()?;

        info!("Motors initialized successfully");
        Ok(())
    }

    /// Drive one actuator at a signed speed
    pub fn drive(&mut self, actuator: Actuator, speed: i16) -> Result<(), PwmError> {
        drive_bridge(&mut self.pwm, &actuator.wiring(), speed, self.full_duty)
    }

    /// Drive all actuators to zero
    pub fn stop(&mut self) -> Result<(), PwmError> {
        for actuator in Actuator::ALL {
            self.drive(actuator, 0)?;
        }
        Ok(())
    }

    /// Stop and pull the driver-enable lines low
    pub fn disable(&mut self) -> Result<(), PwmError> {
        info!("Disabling motor drivers");
        self.stop()?;
        self.set_enabled(false)
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), PwmError> {
        for actuator in Actuator::ALL {
            let w = actuator.wiring();
            debug!("{} enable lines -> {}", actuator.label(), enabled);
            self.pwm.set_level(w.forward_enable_pin, enabled)?;
            self.pwm.set_level(w.reverse_enable_pin, enabled)?;
        }
        Ok(())
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }
}

impl<P: PwmOutput> Drop for MotorDriver<P> {
    fn drop(&mut self) {
        // Never leave a bridge energized
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}
