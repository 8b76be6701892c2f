//! Routing of controller commands to the actuator and lighting drivers.

use std::sync::Arc;

use smartlight_api::Inbound;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::hal::{ACTUATOR_IDS, ActuatorDriver, ActuatorStatus, LightingDriver, MAX_ANGLE, Rgb};

/// Outcome of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Actuator { id: u8, angle: u8 },
    Lighting,
    Acknowledged,
    ControllerError(Option<String>),
    Ignored(String),
}

#[derive(Clone)]
pub struct CommandDispatcher {
    actuators: Arc<dyn ActuatorDriver>,
    lighting: Arc<dyn LightingDriver>,
}

impl CommandDispatcher {
    pub fn new(actuators: Arc<dyn ActuatorDriver>, lighting: Arc<dyn LightingDriver>) -> Self {
        Self {
            actuators,
            lighting,
        }
    }

    pub fn dispatch(&self, message: &Inbound) -> Result<Handled, CoreError> {
        match message {
            Inbound::SetServo { id, angle, smooth } => {
                let (id, angle) = self.move_actuator(*id, *angle, *smooth)?;
                Ok(Handled::Actuator { id, angle })
            }
            Inbound::SetLedColor { r, g, b } => {
                self.lighting.set_color(Rgb {
                    r: *r,
                    g: *g,
                    b: *b,
                })?;
                self.lighting.flush()?;
                Ok(Handled::Lighting)
            }
            Inbound::SetLedBrightness { brightness } => {
                self.lighting.set_brightness(*brightness)?;
                self.lighting.flush()?;
                Ok(Handled::Lighting)
            }
            Inbound::ClearLeds => {
                self.lighting.clear()?;
                self.lighting.flush()?;
                Ok(Handled::Lighting)
            }
            Inbound::Ack => Ok(Handled::Acknowledged),
            Inbound::Error { error } => {
                warn!(
                    error = error.as_deref().unwrap_or("<unspecified>"),
                    "Controller reported an error"
                );
                Ok(Handled::ControllerError(error.clone()))
            }
            Inbound::Unknown { kind } => {
                debug!(kind, "ignoring unknown controller command");
                Ok(Handled::Ignored(kind.clone()))
            }
        }
    }

    /// Validate and forward an actuator move. Returns the narrowed id and angle.
    pub fn move_actuator(&self, id: i64, angle: i64, smooth: bool) -> Result<(u8, u8), CoreError> {
        let (id, angle) = validate_actuator(id, angle)?;
        self.actuators.move_to(id, angle, smooth)?;
        debug!(id, angle, smooth, "actuator move");
        Ok((id, angle))
    }

    pub fn actuator_status(&self, id: u8) -> ActuatorStatus {
        self.actuators.status(id).unwrap_or_default()
    }
}

/// Check `id` against [`ACTUATOR_IDS`] and `angle` against `0..=MAX_ANGLE`.
pub fn validate_actuator(id: i64, angle: i64) -> Result<(u8, u8), CoreError> {
    let id = u8::try_from(id)
        .ok()
        .filter(|id| ACTUATOR_IDS.contains(id))
        .ok_or_else(|| CoreError::ValidationFailed {
            message: format!(
                "actuator id {id} out of range {}..={}",
                ACTUATOR_IDS.start(),
                ACTUATOR_IDS.end()
            ),
        })?;
    let angle = u8::try_from(angle)
        .ok()
        .filter(|a| *a <= MAX_ANGLE)
        .ok_or_else(|| CoreError::ValidationFailed {
            message: format!("angle {angle} out of range 0..={MAX_ANGLE}"),
        })?;
    Ok((id, angle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::HalError;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ActuatorDriver for Recorder {
        fn move_to(&self, id: u8, angle: u8, smooth: bool) -> Result<(), HalError> {
            self.calls.lock().push(format!("move {id} {angle} {smooth}"));
            Ok(())
        }

        fn status(&self, id: u8) -> Option<ActuatorStatus> {
            (id == 1).then_some(ActuatorStatus {
                angle: 45,
                moving: true,
            })
        }
    }

    impl LightingDriver for Recorder {
        fn set_color(&self, color: Rgb) -> Result<(), HalError> {
            self.calls
                .lock()
                .push(format!("color {} {} {}", color.r, color.g, color.b));
            Ok(())
        }

        fn set_brightness(&self, level: u8) -> Result<(), HalError> {
            self.calls.lock().push(format!("brightness {level}"));
            Ok(())
        }

        fn clear(&self) -> Result<(), HalError> {
            self.calls.lock().push("clear".into());
            Ok(())
        }

        fn flush(&self) -> Result<(), HalError> {
            self.calls.lock().push("flush".into());
            Ok(())
        }
    }

    fn dispatcher() -> (CommandDispatcher, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&recorder) as Arc<dyn ActuatorDriver>,
            Arc::clone(&recorder) as Arc<dyn LightingDriver>,
        );
        (dispatcher, recorder)
    }

    #[test]
    fn servo_command_moves_actuator() {
        let (d, rec) = dispatcher();
        let handled = d
            .dispatch(&Inbound::SetServo {
                id: 2,
                angle: 180,
                smooth: false,
            })
            .unwrap();
        assert_eq!(handled, Handled::Actuator { id: 2, angle: 180 });
        assert_eq!(*rec.calls.lock(), vec!["move 2 180 false"]);
    }

    #[test]
    fn out_of_range_servo_commands_are_rejected() {
        let (d, rec) = dispatcher();
        for (id, angle) in [(0, 90), (3, 90), (1, 181), (1, -1), (-1, 0)] {
            let err = d
                .dispatch(&Inbound::SetServo {
                    id,
                    angle,
                    smooth: true,
                })
                .unwrap_err();
            assert!(matches!(err, CoreError::ValidationFailed { .. }));
        }
        assert!(rec.calls.lock().is_empty());
    }

    #[test]
    fn lighting_commands_flush() {
        let (d, rec) = dispatcher();
        d.dispatch(&Inbound::SetLedColor { r: 1, g: 2, b: 3 })
            .unwrap();
        d.dispatch(&Inbound::SetLedBrightness { brightness: 10 })
            .unwrap();
        d.dispatch(&Inbound::ClearLeds).unwrap();
        assert_eq!(
            *rec.calls.lock(),
            vec![
                "color 1 2 3",
                "flush",
                "brightness 10",
                "flush",
                "clear",
                "flush"
            ]
        );
    }

    #[test]
    fn unknown_and_ack_touch_no_driver() {
        let (d, rec) = dispatcher();
        assert_eq!(
            d.dispatch(&Inbound::Unknown {
                kind: "reboot".into()
            })
            .unwrap(),
            Handled::Ignored("reboot".into())
        );
        assert_eq!(d.dispatch(&Inbound::Ack).unwrap(), Handled::Acknowledged);
        assert!(rec.calls.lock().is_empty());
    }

    #[test]
    fn missing_actuator_reports_default_status() {
        let (d, _) = dispatcher();
        assert_eq!(d.actuator_status(1).angle, 45);
        assert_eq!(d.actuator_status(2), ActuatorStatus::default());
    }
}
