// Motor control module for the tracked rover
//
// Provides:
// - H-bridge PWM drive convention and the PwmOutput device trait
// - Serial PWM bridge board protocol, plus a simulated device
// - Deadzone compensation and ramp (slew-rate) control
// - High-level motor driver API

pub mod bridge;
mod driver;
pub mod pwm;
pub mod ramp;
pub mod sim;

pub use bridge::SerialBridge;
pub use driver::MotorDriver;
pub use pwm::{PwmError, PwmOutput, bridge_duties, max_duty};
pub use ramp::{Deadzone, RampController};
pub use sim::SimulatedPwm;
