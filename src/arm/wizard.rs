// Manual calibration of the rotation joints
//
// Inner and end rotation have no hard stops the arm can find on its own, so
// an operator stops or positions them by hand. Outer rotation calibrates
// itself. Each `advance` performs the current step and moves to the next;
// `instructions` says what the operator should do before advancing.

use tracing::info;

use super::calibration::{CalibrationStore, JointCalibration};
use super::error::{ArmError, Result};
use super::homing::{auto_calibrate, single_ended_home};
use super::system::System;
use crate::config::{END_ROT_FILE, INNER_ROT_FILE, OUTER_ROT_FILE};
use crate::motor::{ControlMode, Motor, MotorError};

// Inner rotation is driven by hand-stopped torque in both directions
const INNER_VOLTAGE: f64 = 12.0;
const INNER_ZERO_SPEED: f64 = 0.1;

const OUTER_VOLTAGE: f64 = 6.0;
const OUTER_SPEED: f64 = 2.0;
const OUTER_ZERO_SPEED: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    InnerLow,
    InnerHigh,
    InnerCenter,
    EndLeft,
    EndRight,
    EndCenter,
    OuterAuto,
    Done,
}

impl WizardStep {
    pub fn instructions(self) -> &'static str {
        match self {
            WizardStep::InnerLow => {
                "The inner rotational motor will start slowly rotating left. Let it spin as \
                 far as you are comfortable and stop it with your hand."
            }
            WizardStep::InnerHigh => {
                "The inner rotational motor will now rotate right. Let it spin as far as you \
                 are comfortable and stop it with your hand."
            }
            WizardStep::InnerCenter => {
                "Position the inner rotational motor where you would like its center to be."
            }
            WizardStep::EndLeft => {
                "Position the end effector rotational motor at its left extreme."
            }
            WizardStep::EndRight => {
                "Position the end effector rotational motor at its right extreme."
            }
            WizardStep::EndCenter => {
                "Position the end effector rotational motor where you would like its center to be."
            }
            WizardStep::OuterAuto => "The outer rotational motor will calibrate itself.",
            WizardStep::Done => "Calibration complete.",
        }
    }

    fn next(self) -> Self {
        match self {
            WizardStep::InnerLow => WizardStep::InnerHigh,
            WizardStep::InnerHigh => WizardStep::InnerCenter,
            WizardStep::InnerCenter => WizardStep::EndLeft,
            WizardStep::EndLeft => WizardStep::EndRight,
            WizardStep::EndRight => WizardStep::EndCenter,
            WizardStep::EndCenter => WizardStep::OuterAuto,
            WizardStep::OuterAuto | WizardStep::Done => WizardStep::Done,
        }
    }
}

pub struct CalibrationWizard<'a> {
    system: &'a System,
    store: &'a CalibrationStore,
    step: WizardStep,
    // Bounds recorded so far for the joint in progress
    low: f64,
    high: f64,
}

impl<'a> CalibrationWizard<'a> {
    /// Disable every joint and clear the rotation offsets so raw positions
    /// are recorded.
    pub fn start(system: &'a System, store: &'a CalibrationStore) -> Result<Self> {
        system.ensure_running()?;
        system.motors_enabled(false)?;
        let joints = system.joints();
        for motor in [&joints.t1, &joints.t2, &joints.r] {
            motor.set_offset(0.0);
        }
        info!("Calibration wizard started, writing to {}", store.dir().display());

        Ok(Self {
            system,
            store,
            step: WizardStep::InnerLow,
            low: 0.0,
            high: 0.0,
        })
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn is_done(&self) -> bool {
        self.step == WizardStep::Done
    }

    /// Perform the current step and return the one now waiting
    pub fn advance(&mut self) -> Result<WizardStep> {
        self.system.ensure_running()?;
        let joints = self.system.joints();
        let timing = &self.system.config().homing;

        match self.step {
            WizardStep::InnerLow => {
                self.low =
                    single_ended_home(&joints.t1, 0.0, -INNER_VOLTAGE, INNER_ZERO_SPEED, false, timing)?;
            }
            WizardStep::InnerHigh => {
                self.high =
                    single_ended_home(&joints.t1, 0.0, INNER_VOLTAGE, INNER_ZERO_SPEED, false, timing)?;
            }
            WizardStep::InnerCenter => {
                let center = read_position(&joints.t1)?;
                self.store.save(
                    INNER_ROT_FILE,
                    &JointCalibration {
                        low: self.low,
                        high: self.high,
                        center,
                    },
                )?;
                hold_at(&joints.t1, center)?;
            }
            WizardStep::EndLeft => self.low = read_position(&joints.r)?,
            WizardStep::EndRight => self.high = read_position(&joints.r)?,
            WizardStep::EndCenter => {
                let center = read_position(&joints.r)?;
                self.store.save(
                    END_ROT_FILE,
                    &JointCalibration {
                        low: self.low,
                        high: self.high,
                        center,
                    },
                )?;
                hold_at(&joints.r, center)?;
            }
            WizardStep::OuterAuto => {
                let calibration = auto_calibrate(
                    &joints.t2,
                    OUTER_VOLTAGE,
                    OUTER_SPEED,
                    OUTER_ZERO_SPEED,
                    timing,
                )?;
                self.store.save(OUTER_ROT_FILE, &calibration)?;
                joints.z.enable().map_err(|source| homing_error(&joints.z, source))?;
                info!("Calibration complete");
            }
            WizardStep::Done => {}
        }

        self.step = self.step.next();
        Ok(self.step)
    }

    /// Re-enable every joint
    pub fn finish(self) -> Result<()> {
        self.system.motors_enabled(true)
    }
}

fn read_position(motor: &Motor) -> Result<f64> {
    motor.raw_position().map_err(|source| homing_error(motor, source))
}

/// Make `center` the joint's zero and hold it there
fn hold_at(motor: &Motor, center: f64) -> Result<()> {
    let run = || -> std::result::Result<(), MotorError> {
        motor.set_offset(center);
        motor.set_control_mode(ControlMode::Angle)?;
        motor.move_to(0.0)?;
        motor.enable()
    };
    run().map_err(|source| homing_error(motor, source))
}

fn homing_error(motor: &Motor, source: MotorError) -> ArmError {
    ArmError::Homing {
        motor_id: motor.id(),
        source,
    }
}
