// Periodic control loop
//
// Each tick visits left track, right track, base in that order:
//   target -> deadzone -> ramp -> drive
// The PWM output is re-asserted every tick, even when the applied speed did
// not change. The loop runs on its own OS thread since PWM writes may block
// on the serial port.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{MAX_SPEED, RuntimeConfig};
use crate::fault::FaultLatch;
use crate::motor::{Deadzone, MotorDriver, PwmError, PwmOutput, RampController};
use crate::state::{Actuator, TargetSpeeds};

/// First failed write of a tick
struct DriveFault {
    actuator: Actuator,
    error: PwmError,
}

impl fmt::Display for DriveFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.actuator.label(), self.error)
    }
}

pub struct ControlLoop<P: PwmOutput> {
    driver: MotorDriver<P>,
    targets: Arc<TargetSpeeds>,
    deadzone: Deadzone,
    ramps: [RampController; 3],
    output: FaultLatch,
}

impl<P: PwmOutput> ControlLoop<P> {
    pub fn new(driver: MotorDriver<P>, targets: Arc<TargetSpeeds>, config: &RuntimeConfig) -> Self {
        Self {
            driver,
            targets,
            deadzone: Deadzone::new(config.deadzone_min),
            ramps: [RampController::new(config.ramp_step); 3],
            output: FaultLatch::new("PWM output"),
        }
    }

    /// Run one control tick, returning the applied speeds
    pub fn tick(&mut self) -> [i16; 3] {
        let mut fault = None;

        for actuator in Actuator::ALL {
            let raw = self.targets.get(actuator);
            debug_assert!(
                (-MAX_SPEED..=MAX_SPEED).contains(&raw),
                "{} target {} out of range",
                actuator.label(),
                raw
            );
            let target = self.deadzone.normalize(raw);
            let applied = self.ramps[actuator.index()].advance(target);

            if let Err(error) = self.driver.drive(actuator, applied) {
                fault.get_or_insert(DriveFault { actuator, error });
            }
        }

        self.output.record(fault.map_or(Ok(()), Err));
        self.applied()
    }

    /// Tick every `period` until `stop` is raised, then shut down.
    ///
    /// `on_tick` sees the loop and the applied speeds after every tick. A late
    /// tick pushes the schedule back instead of bursting to catch up, since
    /// ramp steps are counted in ticks. Returns the number of ticks run.
    pub fn run<F>(mut self, period: Duration, stop: &AtomicBool, mut on_tick: F) -> u64
    where
        F: FnMut(&Self, [i16; 3]),
    {
        let mut ticks = 0;
        let mut deadline = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let applied = self.tick();
            on_tick(&self, applied);
            ticks += 1;

            deadline += period;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }

        info!("Control loop stopped after {} ticks", ticks);
        self.shutdown();
        ticks
    }

    pub fn applied(&self) -> [i16; 3] {
        self.ramps.map(|r| r.applied())
    }

    pub fn output_fault(&self) -> bool {
        self.output.is_faulted()
    }

    pub fn driver(&self) -> &MotorDriver<P> {
        &self.driver
    }

    /// Stop everything and release the bridges
    pub fn shutdown(mut self) {
        if let Err(e) = self.driver.disable() {
            warn!("Failed to disable motors on shutdown: {}", e);
        }
    }
}
