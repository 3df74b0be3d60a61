// Message types exchanged with whatever drives the arm

use serde::{Deserialize, Serialize};

// Cartesian target from a job, a script, or the pose stream
// x and y are in the arm's length unit (cm), z in vertical motor radians,
// r the end effector bearing in world radians, e the end effector value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<f64>,
}

// Joint-space pose, what jog and smooth_move consume
// r is world-relative: the end rotation motor is commanded r - t1
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointPose {
    pub t1: f64,
    pub t2: f64,
    pub z: f64,
    pub r: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<f64>,
}

impl JointPose {
    /// Same joints, different end effector value
    pub fn with_end_effector(self, e: Option<f64>) -> Self {
        Self { e, ..self }
    }
}

/// Health status published by the pose stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// Emergency stop latched or a jog failed; the stream has stopped
    Faulted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_pose_without_end_effector() {
        let pose: TargetPose = serde_json::from_str(r#"{"x": 20, "y": 0, "z": 1.5, "r": 0}"#).unwrap();
        assert_eq!(pose.e, None);
        assert_eq!(pose.x, 20.0);
        assert!(!serde_json::to_string(&pose).unwrap().contains("\"e\""));
    }

    #[test]
    fn test_health_names() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(), "\"cmd_stale\"");
        assert_eq!(serde_json::to_string(&RuntimeHealth::Faulted).unwrap(), "\"faulted\"");
    }
}
