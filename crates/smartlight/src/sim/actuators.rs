//! Simulated positioners. Smooth moves advance one degree per step
//! interval; the position is computed lazily from the elapsed time.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use smartlight_core::hal::{ACTUATOR_IDS, MAX_ANGLE};
use smartlight_core::{ActuatorDriver, ActuatorStatus, HalError};

pub const STEP_INTERVAL: Duration = Duration::from_millis(15);
const HOME_ANGLE: u8 = 90;

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: u8,
    to: u8,
    started: Instant,
}

impl Motion {
    fn resting(angle: u8) -> Self {
        Self {
            from: angle,
            to: angle,
            started: Instant::now(),
        }
    }

    fn position_at(&self, now: Instant) -> u8 {
        let elapsed = now.saturating_duration_since(self.started);
        let steps = elapsed.as_millis() / STEP_INTERVAL.as_millis();
        let distance = self.from.abs_diff(self.to);
        let travelled = u8::try_from(steps.min(u128::from(distance))).unwrap_or(distance);
        if self.to >= self.from {
            self.from + travelled
        } else {
            self.from - travelled
        }
    }
}

pub struct SimActuators {
    motions: [Mutex<Motion>; 2],
}

impl SimActuators {
    pub fn new() -> Self {
        Self {
            motions: [
                Mutex::new(Motion::resting(HOME_ANGLE)),
                Mutex::new(Motion::resting(HOME_ANGLE)),
            ],
        }
    }

    fn slot(&self, id: u8) -> Option<&Mutex<Motion>> {
        if !ACTUATOR_IDS.contains(&id) {
            return None;
        }
        self.motions.get(usize::from(id - 1))
    }
}

impl Default for SimActuators {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorDriver for SimActuators {
    fn move_to(&self, id: u8, angle: u8, smooth: bool) -> Result<(), HalError> {
        let slot = self.slot(id).ok_or_else(|| HalError::Failed {
            device: "actuator",
            reason: format!("no actuator {id}"),
        })?;
        let target = angle.min(MAX_ANGLE);
        let now = Instant::now();

        let mut motion = slot.lock();
        let from = if smooth { motion.position_at(now) } else { target };
        *motion = Motion {
            from,
            to: target,
            started: now,
        };
        Ok(())
    }

    fn status(&self, id: u8) -> Option<ActuatorStatus> {
        let motion = *self.slot(id)?.lock();
        let angle = motion.position_at(Instant::now());
        Some(ActuatorStatus {
            angle,
            moving: angle != motion.to,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn motion_steps_one_degree_per_interval() {
        let start = Instant::now();
        let motion = Motion {
            from: 90,
            to: 100,
            started: start,
        };
        assert_eq!(motion.position_at(start), 90);
        assert_eq!(motion.position_at(start + STEP_INTERVAL * 4), 94);
        assert_eq!(motion.position_at(start + STEP_INTERVAL * 50), 100);
    }

    #[test]
    fn motion_downwards() {
        let start = Instant::now();
        let motion = Motion {
            from: 20,
            to: 0,
            started: start,
        };
        assert_eq!(motion.position_at(start + STEP_INTERVAL * 5), 15);
        assert_eq!(motion.position_at(start + Duration::from_secs(10)), 0);
    }

    #[test]
    fn direct_move_is_immediate() {
        let actuators = SimActuators::new();
        actuators.move_to(2, 10, false).unwrap();
        assert_eq!(
            actuators.status(2),
            Some(ActuatorStatus {
                angle: 10,
                moving: false
            })
        );
    }

    #[test]
    fn smooth_move_reports_moving() {
        let actuators = SimActuators::new();
        actuators.move_to(1, 180, true).unwrap();
        let status = actuators.status(1).unwrap();
        assert!(status.moving);
        assert!(status.angle < 180);
    }

    #[test]
    fn unknown_actuator() {
        let actuators = SimActuators::new();
        assert!(actuators.move_to(3, 10, true).is_err());
        assert_eq!(actuators.status(0), None);
    }
}
