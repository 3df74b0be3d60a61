// Persisted joint calibration: plain text, one float per line, no header
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::error::{ArmError, Result};
use crate::config::CALIBRATION_DIR;
use crate::motor::protocol::encode_float;

/// Measured travel of a joint and the raw position chosen as its zero
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointCalibration {
    pub low: f64,
    pub high: f64,
    pub center: f64,
}

impl JointCalibration {
    /// Calibration centered between its bounds
    pub fn centered(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            center: (low + high) / 2.0,
        }
    }

    /// Parse the file format: `low`, `high` and `center` on the first three
    /// lines. Extra lines are ignored.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut lines = text.lines();
        let mut value = |name: &str| -> std::result::Result<f64, String> {
            let line = lines
                .next()
                .ok_or_else(|| format!("missing {} line", name))?
                .trim();
            line.parse::<f64>()
                .map_err(|_| format!("{} {:?} is not a number", name, line))
        };

        let low = value("low")?;
        let high = value("high")?;
        let center = value("center")?;
        Ok(Self { low, high, center })
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            encode_float(self.low),
            encode_float(self.high),
            encode_float(self.center)
        )
    }
}

/// Directory holding one calibration file per joint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(CALIBRATION_DIR)
    }
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn load(&self, name: &str) -> Result<JointCalibration> {
        let path = self.path(name);
        let load_error = |reason: String| ArmError::ConfigLoad {
            path: path.display().to_string(),
            reason,
        };

        let text = fs::read_to_string(&path).map_err(|e| load_error(e.to_string()))?;
        let calibration = JointCalibration::parse(&text).map_err(load_error)?;
        debug!("Loaded {}: {:?}", path.display(), calibration);
        Ok(calibration)
    }

    pub fn save(&self, name: &str, calibration: &JointCalibration) -> Result<()> {
        let path = self.path(name);
        let save_error = |source| ArmError::ConfigSave {
            path: path.display().to_string(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(save_error)?;
        fs::write(&path, calibration.to_text()).map_err(save_error)?;
        info!("Saved {}: {:?}", path.display(), calibration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{END_ROT_FILE, INNER_ROT_FILE, OUTER_ROT_FILE};

    #[test]
    fn test_parse_three_lines() {
        let cal = JointCalibration::parse("-1.5\n2.25\n0.3\n").unwrap();
        assert_eq!(
            cal,
            JointCalibration {
                low: -1.5,
                high: 2.25,
                center: 0.3
            }
        );
    }

    #[test]
    fn test_parse_requires_center() {
        let err = JointCalibration::parse("-2.0\n3.0").unwrap_err();
        assert!(err.contains("center"));
        // A blank line does not stand in for a value
        assert!(JointCalibration::parse("-2.0\n\n3.0\n0.5\n").is_err());
    }

    #[test]
    fn test_truncated_file_is_config_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());
        for name in [INNER_ROT_FILE, OUTER_ROT_FILE, END_ROT_FILE] {
            fs::write(store.path(name), "-2.0\n2.5\n").unwrap();
            match store.load(name) {
                Err(ArmError::ConfigLoad { reason, .. }) => {
                    assert!(reason.contains("center"), "{}", reason)
                }
                other => panic!("expected config load error for {}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(JointCalibration::parse("").is_err());
        assert!(JointCalibration::parse("1.0\n").is_err());
        assert!(JointCalibration::parse("1.0\nabc\n2.0\n").is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("config"));
        let cal = JointCalibration {
            low: -3.14,
            high: 2.0,
            center: 0.125,
        };
        store.save("inner_rot", &cal).unwrap();
        assert_eq!(
            fs::read_to_string(store.path("inner_rot")).unwrap(),
            "-3.14\n2.0\n0.125\n"
        );
        assert_eq!(store.load("inner_rot").unwrap(), cal);
    }

    #[test]
    fn test_missing_file_is_config_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());
        assert!(matches!(
            store.load("end_rot"),
            Err(ArmError::ConfigLoad { .. })
        ));
    }

    #[test]
    fn test_corrupt_file_is_config_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());
        fs::write(store.path("outer_rot"), "not a number\n").unwrap();
        match store.load("outer_rot") {
            Err(ArmError::ConfigLoad { reason, .. }) => assert!(reason.contains("not a number")),
            other => panic!("expected config load error, got {:?}", other),
        }
    }
}
