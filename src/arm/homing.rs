// Homing procedures for joints with unknown position at power-up
//
// - single-ended: drive into one hard stop and call it zero (multi-turn joints)
// - absolute: pick the turn matching a stored calibration (sub-turn joints)
// - auto-calibrate: find both hard stops and center between them
//
// Stops and stored calibrations are raw encoder positions, so re-homing an
// already homed joint lands on the same offset.
//
// Any protocol failure aborts the procedure; the joint is left un-homed and
// the error names the motor.

use std::f64::consts::TAU;
use std::thread;

use tracing::{debug, info};

use super::calibration::JointCalibration;
use super::error::{ArmError, Result};
use crate::config::HomingTiming;
use crate::motor::{ControlMode, Motor, MotorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    /// Commanded toward the stop, waiting for it to get moving
    Driving,
    /// Moving; polled until velocity drops under the threshold
    Settling,
    Homed,
}

/// Drive `motor` at `voltage` in torque mode until it stalls and return the
/// stall position. When `active`, that position becomes the motor's zero and
/// the joint moves to `center_offset`; otherwise the motor is disabled.
pub fn single_ended_home(
    motor: &Motor,
    center_offset: f64,
    voltage: f64,
    zero_speed: f64,
    active: bool,
    timing: &HomingTiming,
) -> Result<f64> {
    info!("Single-ended homing motor {} at {} V", motor.id(), voltage);
    let run = || -> std::result::Result<f64, MotorError> {
        let mut phase = HomingPhase::Driving;
        let mut angle = 0.0;
        while phase != HomingPhase::Homed {
            phase = match phase {
                HomingPhase::Driving => {
                    motor.set_control_mode(ControlMode::Torque)?;
                    motor.move_to(voltage)?;
                    motor.enable()?;
                    thread::sleep(timing.spin_up);
                    HomingPhase::Settling
                }
                HomingPhase::Settling if motor.velocity()?.abs() > zero_speed => {
                    thread::sleep(timing.poll);
                    HomingPhase::Settling
                }
                HomingPhase::Settling => {
                    motor.move_to(0.0)?;
                    angle = motor.raw_position()?;
                    HomingPhase::Homed
                }
                HomingPhase::Homed => HomingPhase::Homed,
            };
        }
        debug!("Motor {} stalled at {}", motor.id(), angle);

        if active {
            motor.set_offset(angle);
            motor.set_control_mode(ControlMode::Angle)?;
            motor.move_to(center_offset)?;
        } else {
            motor.disable()?;
        }
        Ok(angle)
    };
    run().map_err(|source| homing_error(motor, source))
}

/// Choose the offset for a joint with less than one turn of travel from a
/// stored calibration, then hold it at zero.
pub fn absolute_home(motor: &Motor, calibration: &JointCalibration) -> Result<()> {
    let run = || -> std::result::Result<(), MotorError> {
        let JointCalibration { low, high, center } = *calibration;
        let p = motor.raw_position()?;
        let offset = if p < low {
            center - TAU
        } else if p > high {
            center + TAU
        } else {
            center
        };
        info!(
            "Absolute homing motor {}: position {} in [{}, {}], offset {}",
            motor.id(),
            p,
            low,
            high,
            offset
        );

        motor.set_offset(offset);
        motor.set_control_mode(ControlMode::Angle)?;
        motor.move_to(0.0)?;
        motor.enable()
    };
    run().map_err(|source| homing_error(motor, source))
}

/// Find both hard stops at constant `speed`, center the joint between them,
/// and return the measured calibration.
pub fn auto_calibrate(
    motor: &Motor,
    voltage: f64,
    speed: f64,
    zero_speed: f64,
    timing: &HomingTiming,
) -> Result<JointCalibration> {
    info!("Auto-calibrating motor {}", motor.id());
    let run = || -> std::result::Result<JointCalibration, MotorError> {
        motor.set_voltage_limit(voltage)?;
        motor.set_control_mode(ControlMode::Velocity)?;
        motor.move_to(-speed)?;
        motor.enable()?;
        let low = stall_position(motor, zero_speed, timing)?;

        motor.move_to(speed)?;
        let high = stall_position(motor, zero_speed, timing)?;

        let calibration = JointCalibration::centered(low, high);
        motor.set_offset(calibration.center);
        motor.set_control_mode(ControlMode::Angle)?;
        motor.move_to(0.0)?;
        debug!("Motor {} calibrated: {:?}", motor.id(), calibration);
        Ok(calibration)
    };
    run().map_err(|source| homing_error(motor, source))
}

/// Wait for the motor to stop against something, stop driving, and read where
fn stall_position(
    motor: &Motor,
    zero_speed: f64,
    timing: &HomingTiming,
) -> std::result::Result<f64, MotorError> {
    thread::sleep(timing.spin_up);
    while motor.velocity()?.abs() > zero_speed {
        thread::sleep(timing.poll);
    }
    motor.move_to(0.0)?;
    motor.raw_position()
}

fn homing_error(motor: &Motor, source: MotorError) -> ArmError {
    ArmError::Homing {
        motor_id: motor.id(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::{SimConnector, SimMotor};
    use std::sync::Arc;
    use std::time::Duration;

    const FAST: HomingTiming = HomingTiming {
        spin_up: Duration::ZERO,
        poll: Duration::ZERO,
    };

    fn motor(sim: &SimMotor) -> Motor {
        let connector = SimConnector::new().with_motor("sim0", sim.clone());
        Motor::open(Arc::new(connector), "sim0").unwrap()
    }

    #[test]
    fn test_single_ended_active() {
        let sim = SimMotor::new(1).with_stops(-7.0, 100.0).with_position(3.0);
        let m = motor(&sim);
        let angle = single_ended_home(&m, 70.0, -4.0, 0.1, true, &FAST).unwrap();
        assert_eq!(angle, -7.0);
        assert_eq!(m.offset(), -7.0);
        assert_eq!(m.control_mode(), ControlMode::Angle);
        // Center offset is relative to the stop
        assert_eq!(sim.position(), 63.0);
        assert!((m.position().unwrap() - 70.0).abs() < 1e-9);
        assert!(sim.enabled());
    }

    #[test]
    fn test_single_ended_passive_disables() {
        let sim = SimMotor::new(2).with_stops(-2.0, 2.0);
        let m = motor(&sim);
        let angle = single_ended_home(&m, 0.0, 12.0, 0.1, false, &FAST).unwrap();
        assert_eq!(angle, 2.0);
        assert_eq!(m.offset(), 0.0);
        assert!(!sim.enabled());
    }

    #[test]
    fn test_single_ended_failure_is_fatal() {
        let sim = SimMotor::new(1).with_stops(-1.0, 1.0);
        sim.override_reply("MMG5", "garbage");
        let m = motor(&sim);
        match single_ended_home(&m, 0.0, -4.0, 0.1, true, &FAST) {
            Err(ArmError::Homing {
                motor_id: 1,
                source: MotorError::Protocol { .. },
            }) => {}
            other => panic!("expected homing error, got {:?}", other),
        }
        assert_eq!(m.offset(), 0.0);
    }

    #[test]
    fn test_absolute_home_inside_range() {
        let sim = SimMotor::new(2).with_position(0.4);
        let m = motor(&sim);
        let cal = JointCalibration {
            low: -1.0,
            high: 1.0,
            center: 0.2,
        };
        absolute_home(&m, &cal).unwrap();
        assert_eq!(m.offset(), 0.2);
        assert_eq!(sim.position(), 0.2);
        assert!(sim.enabled());
        assert_eq!(m.control_mode(), ControlMode::Angle);
    }

    #[test]
    fn test_absolute_home_wraps_turns() {
        let cal = JointCalibration {
            low: -1.0,
            high: 1.0,
            center: 0.5,
        };

        let below = SimMotor::new(2).with_position(-5.0);
        let m = motor(&below);
        absolute_home(&m, &cal).unwrap();
        assert_eq!(m.offset(), 0.5 - TAU);

        let above = SimMotor::new(2).with_position(5.0);
        let m = motor(&above);
        absolute_home(&m, &cal).unwrap();
        assert_eq!(m.offset(), 0.5 + TAU);
    }

    #[test]
    fn test_auto_calibrate_centers_between_stops() {
        let sim = SimMotor::new(3).with_stops(-2.5, 1.5);
        let m = motor(&sim);
        let cal = auto_calibrate(&m, 6.0, 2.0, 0.1, &FAST).unwrap();
        assert_eq!(cal.low, -2.5);
        assert_eq!(cal.high, 1.5);
        assert_eq!(cal.center, -0.5);
        assert_eq!(m.offset(), -0.5);
        assert_eq!(sim.limit('U'), Some(6.0));
        assert_eq!(sim.position(), -0.5);
        assert_eq!(m.control_mode(), ControlMode::Angle);
    }

    #[test]
    fn test_rehoming_ignores_previous_offset() {
        let sim = SimMotor::new(1).with_stops(-7.0, 200.0).with_position(3.0);
        let m = motor(&sim);
        single_ended_home(&m, 70.0, -4.0, 0.1, true, &FAST).unwrap();
        let angle = single_ended_home(&m, 70.0, -4.0, 0.1, true, &FAST).unwrap();
        assert_eq!(angle, -7.0);
        assert_eq!(m.offset(), -7.0);
        assert_eq!(sim.position(), 63.0);

        let cal = JointCalibration {
            low: -1.0,
            high: 1.0,
            center: 0.9,
        };
        let sim = SimMotor::new(2).with_position(1.5);
        let m = motor(&sim);
        absolute_home(&m, &cal).unwrap();
        assert_eq!(m.offset(), 0.9 + TAU);
        // Same physical pose as the first pass
        sim.set_position(1.5);
        absolute_home(&m, &cal).unwrap();
        assert_eq!(m.offset(), 0.9 + TAU);

        let sim = SimMotor::new(5).with_stops(-25.0, 15.0);
        let m = motor(&sim);
        auto_calibrate(&m, 2.0, 15.0, 10.0, &FAST).unwrap();
        let again = auto_calibrate(&m, 2.0, 15.0, 10.0, &FAST).unwrap();
        assert_eq!((again.low, again.high, again.center), (-25.0, 15.0, -5.0));
        assert_eq!(m.offset(), -5.0);
    }

    #[test]
    fn test_auto_calibrate_failure_is_fatal() {
        let sim = SimMotor::new(3).with_stops(-1.0, 1.0);
        sim.override_reply("MC1", "angle");
        let m = motor(&sim);
        assert!(matches!(
            auto_calibrate(&m, 6.0, 2.0, 0.1, &FAST),
            Err(ArmError::Homing { motor_id: 3, .. })
        ));
    }
}
