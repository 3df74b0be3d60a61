// Serial settings, calibration files, joint tuning
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Serial link settings shared by every controller on the arm
pub const BAUD_RATE: u32 = 9600;
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

// Number of command/response pairs kept per device for diagnostics
pub const AUDIT_LOG_CAPACITY: usize = 100;

// Pose stream loop frequency and watchdog
pub const LOOP_HZ: u64 = 50;
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Calibration files (one float per line)
pub const CALIBRATION_DIR: &str = "config";
pub const INNER_ROT_FILE: &str = "inner_rot";
pub const OUTER_ROT_FILE: &str = "outer_rot";
pub const END_ROT_FILE: &str = "end_rot";

// Identity protocol: joints report 1-4, the gripper reports 5
pub const VERTICAL_ID: i64 = 1;
pub const INNER_ROT_ID: i64 = 2;
pub const OUTER_ROT_ID: i64 = 3;
pub const END_ROT_ID: i64 = 4;
pub const GRIPPER_ID: i64 = 5;

// End effector output ranges
pub const GRIPPER_RANGE: (f64, f64) = (0.0, 100.0);
pub const SERVO_RANGE: (f64, f64) = (10.0, 150.0);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Gains for one PID stage. Unset terms are left as the firmware has them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub p: Option<f64>,
    pub i: Option<f64>,
    pub d: Option<f64>,
    /// Output ramp
    pub r: Option<f64>,
    /// Output limit
    pub l: Option<f64>,
    /// Low pass filter time constant
    pub f: Option<f64>,
}

impl PidGains {
    pub fn pi(p: f64, i: f64) -> Self {
        Self {
            p: Some(p),
            i: Some(i),
            ..Self::default()
        }
    }

    pub fn p(p: f64) -> Self {
        Self {
            p: Some(p),
            ..Self::default()
        }
    }

    /// Terms in the order the firmware expects them, skipping unset ones
    pub fn terms(&self) -> impl Iterator<Item = (char, f64)> {
        [
            ('P', self.p),
            ('I', self.i),
            ('D', self.d),
            ('R', self.r),
            ('L', self.l),
            ('F', self.f),
        ]
        .into_iter()
        .filter_map(|(c, v)| v.map(|v| (c, v)))
    }
}

/// Limits and gains applied to a joint right after discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointTuning {
    pub voltage_limit: Option<f64>,
    pub velocity_limit: Option<f64>,
    pub velocity_pid: PidGains,
    pub angle_pid: PidGains,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleEndedHomeParams {
    pub center_offset: f64,
    pub voltage: f64,
    pub zero_speed: f64,
}

impl Default for SingleEndedHomeParams {
    fn default() -> Self {
        // Vertical axis: drive down against the base, then rise to mid travel
        Self {
            center_offset: 140.0 / 2.0,
            voltage: -4.0,
            zero_speed: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCalibrateParams {
    pub voltage: f64,
    pub speed: f64,
    pub zero_speed: f64,
}

impl Default for AutoCalibrateParams {
    fn default() -> Self {
        Self {
            voltage: 3.0,
            speed: 1.0,
            zero_speed: 0.1,
        }
    }
}

/// Timing of the homing loops
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingTiming {
    /// Time given to the joint to start moving before stall detection begins
    #[serde(with = "millis")]
    pub spin_up: Duration,
    #[serde(with = "millis")]
    pub poll: Duration,
}

impl Default for HomingTiming {
    fn default() -> Self {
        Self {
            spin_up: Duration::from_secs(1),
            poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionDefaults {
    pub duration: f64,
    pub timeout: f64,
    pub epsilon: f64,
    #[serde(with = "millis")]
    pub tick: Duration,
    #[serde(with = "millis")]
    pub poll: Duration,
}

impl Default for MotionDefaults {
    fn default() -> Self {
        Self {
            duration: 1.0,
            timeout: 1.0,
            epsilon: 0.1,
            tick: Duration::from_millis(1000 / LOOP_HZ),
            poll: Duration::from_millis(100),
        }
    }
}

/// Which end effector discovery should bind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndEffectorPreference {
    /// Gripper if one reports its id, otherwise the first unclaimed port as a servo
    #[default]
    Auto,
    Gripper,
    Servo,
}

/// Per-arm tuning, loadable from a JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub vertical: JointTuning,
    pub inner_rot: JointTuning,
    pub outer_rot: JointTuning,
    pub end_rot: JointTuning,
    pub vertical_home: SingleEndedHomeParams,
    pub gripper_calibration: AutoCalibrateParams,
    pub gripper_voltage_limit: f64,
    pub gripper_velocity_limit: f64,
    pub homing: HomingTiming,
    pub motion: MotionDefaults,
    pub end_effector: EndEffectorPreference,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            vertical: JointTuning {
                voltage_limit: Some(12.0),
                velocity_limit: None,
                velocity_pid: PidGains::pi(0.5, 20.0),
                angle_pid: PidGains::p(10.0),
            },
            inner_rot: JointTuning {
                voltage_limit: Some(12.0),
                velocity_limit: Some(4.0),
                velocity_pid: PidGains {
                    r: Some(200.0),
                    f: Some(0.01),
                    ..PidGains::pi(2.0, 20.0)
                },
                angle_pid: PidGains {
                    d: Some(4.0),
                    r: Some(125.0),
                    f: Some(0.01),
                    ..PidGains::p(20.0)
                },
            },
            outer_rot: JointTuning {
                voltage_limit: Some(12.0),
                velocity_limit: Some(4.0),
                velocity_pid: PidGains {
                    f: Some(0.01),
                    ..PidGains::pi(0.6, 20.0)
                },
                angle_pid: PidGains {
                    d: Some(3.0),
                    r: Some(100.0),
                    f: Some(0.01),
                    ..PidGains::p(20.0)
                },
            },
            end_rot: JointTuning {
                voltage_limit: Some(12.0),
                velocity_limit: Some(12.0),
                ..JointTuning::default()
            },
            vertical_home: SingleEndedHomeParams::default(),
            gripper_calibration: AutoCalibrateParams {
                voltage: 2.0,
                speed: 15.0,
                zero_speed: 10.0,
            },
            gripper_voltage_limit: 6.0,
            gripper_velocity_limit: 999.0,
            homing: HomingTiming::default(),
            motion: MotionDefaults::default(),
            end_effector: EndEffectorPreference::default(),
        }
    }
}

impl ArmConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

// Durations are written as integer milliseconds in the tuning file
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_terms_order() {
        let gains = ArmConfig::default().inner_rot.angle_pid;
        let terms: Vec<(char, f64)> = gains.terms().collect();
        assert_eq!(
            terms,
            vec![('P', 20.0), ('D', 4.0), ('R', 125.0), ('F', 0.01)]
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ArmConfig =
            serde_json::from_str(r#"{ "motion": { "timeout": 3.0 }, "end_effector": "servo" }"#)
                .unwrap();
        assert_eq!(config.motion.timeout, 3.0);
        assert_eq!(config.motion.epsilon, 0.1);
        assert_eq!(config.end_effector, EndEffectorPreference::Servo);
        assert_eq!(config.vertical, ArmConfig::default().vertical);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arm.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ArmConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ArmConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
