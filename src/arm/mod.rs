// SCARA arm motion system
//
// Provides:
// - Forward/inverse kinematics and Bezier easing
// - Homing and calibration procedures, persisted per joint
// - Device discovery, jog and smooth moves, emergency stop

pub mod bezier;
pub mod calibration;
mod error;
pub mod homing;
pub mod kinematics;
mod motion;
pub mod system;
pub mod wizard;

pub use calibration::{CalibrationStore, JointCalibration};
pub use error::{ArmError, Result};
pub use kinematics::ArmGeometry;
pub use system::{Joint, Joints, LoadOutcome, System};
pub use wizard::{CalibrationWizard, WizardStep};
