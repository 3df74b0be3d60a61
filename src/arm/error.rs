use std::time::Duration;

use super::bezier::TrajectoryError;
use crate::end_effector::EndEffectorError;
use crate::motor::MotorError;

/// Error types for arm-level operations
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("Port discovery failed: {0}")]
    Discovery(#[source] MotorError),

    #[error(
        "A serial connection could not be established with at least one motor. \
         Detected motor(s): {detected:?}"
    )]
    MissingJoints { detected: Vec<i64> },

    #[error("A serial connection could not be established with the end effector")]
    MissingEndEffector,

    #[error("Failed to configure {joint}: {source}")]
    Configure {
        joint: &'static str,
        #[source]
        source: MotorError,
    },

    #[error("Failed to home motor {motor_id}: {source}")]
    Homing {
        motor_id: i64,
        #[source]
        source: MotorError,
    },

    #[error("Failed to move: {0}")]
    Motion(#[source] MotorError),

    #[error("Motors did not reach target position within {timeout:?} (residual {residual:?})")]
    MotionTimeout {
        timeout: Duration,
        /// Target minus measured position for t1, t2, z, r
        residual: [f64; 4],
    },

    #[error("Emergency stop is latched")]
    Stopped,

    #[error("Emergency stop could not disable: {failed:?}")]
    EmergencyStop { failed: Vec<&'static str> },

    #[error("Failed to load calibration {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Failed to save calibration {path}: {source}")]
    ConfigSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    EndEffector(#[from] EndEffectorError),

    #[error("Invalid trajectory: {0}")]
    Trajectory(#[from] TrajectoryError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ArmError>;
