// The arm: four joints, one end effector, and the operations over all of them
//
// Discovery binds ports to joints by the identity each controller reports.
// After that the joint map never changes. Every operation here blocks; run
// long ones off the async runtime (see `runtime::ArmRuntime`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::calibration::CalibrationStore;
use super::error::{ArmError, Result};
use super::homing::{absolute_home, auto_calibrate, single_ended_home};
use super::kinematics::ArmGeometry;
use crate::config::{
    ArmConfig, END_ROT_FILE, END_ROT_ID, EndEffectorPreference, GRIPPER_ID, INNER_ROT_FILE,
    INNER_ROT_ID, JointTuning, OUTER_ROT_FILE, OUTER_ROT_ID, VERTICAL_ID,
};
use crate::end_effector::{EndEffector, EndEffectorDevice, Gripper, Servo};
use crate::motor::{Motor, MotorError, PidStage, PortConnector};

/// Logical joints of the arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    /// Inner rotation
    T1,
    /// Outer rotation, relative to the inner link
    T2,
    /// Vertical translation
    Z,
    /// End effector rotation
    R,
}

impl Joint {
    pub const ALL: [Joint; 4] = [Joint::T1, Joint::T2, Joint::Z, Joint::R];

    pub fn name(self) -> &'static str {
        match self {
            Joint::T1 => "inner_rot",
            Joint::T2 => "outer_rot",
            Joint::Z => "vertical",
            Joint::R => "end_rot",
        }
    }

    /// Identity the joint's controller reports
    pub fn motor_id(self) -> i64 {
        match self {
            Joint::T1 => INNER_ROT_ID,
            Joint::T2 => OUTER_ROT_ID,
            Joint::Z => VERTICAL_ID,
            Joint::R => END_ROT_ID,
        }
    }

    pub fn from_motor_id(id: i64) -> Option<Joint> {
        Joint::ALL.into_iter().find(|j| j.motor_id() == id)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One motor per joint
pub struct Joints {
    pub t1: Motor,
    pub t2: Motor,
    pub z: Motor,
    pub r: Motor,
}

impl Joints {
    pub fn get(&self, joint: Joint) -> &Motor {
        match joint {
            Joint::T1 => &self.t1,
            Joint::T2 => &self.t2,
            Joint::Z => &self.z,
            Joint::R => &self.r,
        }
    }

    /// In t1, t2, z, r order
    pub fn iter(&self) -> impl Iterator<Item = (Joint, &Motor)> {
        Joint::ALL.into_iter().map(move |j| (j, self.get(j)))
    }
}

/// What `load_motors` managed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Homed,
    /// A calibration file was missing or corrupt and the recovery callback ran
    CalibrationMissing,
}

pub struct System {
    joints: Joints,
    end_effector: EndEffector,
    geometry: ArmGeometry,
    config: ArmConfig,
    stopped: AtomicBool,
}

impl System {
    pub fn new(
        joints: Joints,
        end_effector: EndEffector,
        geometry: ArmGeometry,
        config: ArmConfig,
    ) -> Self {
        Self {
            joints,
            end_effector,
            geometry,
            config,
            stopped: AtomicBool::new(false),
        }
    }

    /// Probe every port, bind joints and the end effector, and apply the
    /// configured tuning.
    pub fn discover(
        connector: Arc<dyn PortConnector>,
        geometry: ArmGeometry,
        config: ArmConfig,
    ) -> Result<Self> {
        let ports = connector.available_ports().map_err(ArmError::Discovery)?;
        info!("Probing {} port(s)", ports.len());

        let mut slots: [Option<Motor>; 4] = Default::default();
        let mut grippers = Vec::new();
        let mut unclaimed = Vec::new();

        for port in ports {
            let motor = match Motor::open(connector.clone(), &port) {
                Ok(motor) => motor,
                Err(e @ MotorError::Open { .. }) => {
                    debug!("Skipping {}: {}", port, e);
                    continue;
                }
                Err(e) => {
                    debug!("No motor identity on {}: {}", port, e);
                    unclaimed.push(port);
                    continue;
                }
            };

            match Joint::from_motor_id(motor.id()) {
                Some(joint) if slots[joint.index()].is_some() => {
                    warn!(
                        "Ignoring second {} motor (id {}) on {}",
                        joint.name(),
                        motor.id(),
                        port
                    );
                }
                Some(joint) => {
                    info!("Bound {} (id {}) on {}", joint.name(), motor.id(), port);
                    slots[joint.index()] = Some(motor);
                }
                None if motor.id() == GRIPPER_ID => grippers.push(motor),
                // Dropping disables and closes it
                None => warn!("Ignoring motor with id {} on {}", motor.id(), port),
            }
        }

        let [t1, t2, z, r] = slots;
        let joints = match (t1, t2, z, r) {
            (Some(t1), Some(t2), Some(z), Some(r)) => Joints { t1, t2, z, r },
            (t1, t2, z, r) => {
                let mut detected: Vec<i64> = [t1, t2, z, r]
                    .iter()
                    .flatten()
                    .map(Motor::id)
                    .collect();
                detected.sort_unstable();
                return Err(ArmError::MissingJoints { detected });
            }
        };

        let end_effector = Self::bind_end_effector(
            &connector,
            grippers,
            &unclaimed,
            &config,
        )?;
        info!(
            "Bound {} end effector on {}",
            end_effector.kind(),
            end_effector.port()
        );

        let system = Self::new(joints, end_effector, geometry, config);
        system.configure()?;
        Ok(system)
    }

    fn bind_end_effector(
        connector: &Arc<dyn PortConnector>,
        grippers: Vec<Motor>,
        unclaimed: &[String],
        config: &ArmConfig,
    ) -> Result<EndEffector> {
        let gripper = |grippers: Vec<Motor>| -> Result<Option<EndEffector>> {
            match grippers.into_iter().next() {
                Some(motor) => Ok(Some(EndEffector::Gripper(Gripper::new(
                    motor,
                    config.gripper_voltage_limit,
                )?))),
                None => Ok(None),
            }
        };
        // A servo cannot identify itself; take the first port nothing else answered on
        let servo = || -> Result<Option<EndEffector>> {
            match unclaimed.first() {
                Some(port) => Ok(Some(EndEffector::Servo(Servo::open(
                    connector.clone(),
                    port,
                )?))),
                None => Ok(None),
            }
        };

        let bound = match config.end_effector {
            EndEffectorPreference::Gripper => gripper(grippers)?,
            EndEffectorPreference::Servo => servo()?,
            EndEffectorPreference::Auto => match gripper(grippers)? {
                Some(effector) => Some(effector),
                None => servo()?,
            },
        };
        bound.ok_or(ArmError::MissingEndEffector)
    }

    /// Apply per-joint limits and PID gains
    pub fn configure(&self) -> Result<()> {
        for (joint, motor) in self.joints.iter() {
            let tuning = self.tuning(joint);
            apply_tuning(motor, tuning).map_err(|source| ArmError::Configure {
                joint: joint.name(),
                source,
            })?;
            debug!("Configured {}", joint.name());
        }
        Ok(())
    }

    fn tuning(&self, joint: Joint) -> &JointTuning {
        match joint {
            Joint::T1 => &self.config.inner_rot,
            Joint::T2 => &self.config.outer_rot,
            Joint::Z => &self.config.vertical,
            Joint::R => &self.config.end_rot,
        }
    }

    /// Home every joint and the gripper. Moves the arm.
    ///
    /// A missing or corrupt calibration file runs `on_fail` when given and
    /// returns `CalibrationMissing`; without a callback the load error is
    /// returned.
    pub fn load_motors(
        &self,
        store: &CalibrationStore,
        on_fail: Option<&dyn Fn(&ArmError)>,
    ) -> Result<LoadOutcome> {
        self.ensure_running()?;
        let timing = &self.config.homing;
        let home = &self.config.vertical_home;

        single_ended_home(
            &self.joints.z,
            home.center_offset,
            home.voltage,
            home.zero_speed,
            true,
            timing,
        )?;

        self.ensure_running()?;
        self.end_effector.enable()?;
        if let Some(motor) = self.end_effector.gripper_motor() {
            let cal = &self.config.gripper_calibration;
            auto_calibrate(motor, cal.voltage, cal.speed, cal.zero_speed, timing)?;
            motor
                .set_voltage_limit(self.config.gripper_voltage_limit)
                .and_then(|_| motor.set_velocity_limit(self.config.gripper_velocity_limit))
                .map_err(|source| ArmError::Homing {
                    motor_id: motor.id(),
                    source,
                })?;
        }

        for (joint, file) in [
            (Joint::T1, INNER_ROT_FILE),
            (Joint::T2, OUTER_ROT_FILE),
            (Joint::R, END_ROT_FILE),
        ] {
            self.ensure_running()?;
            let calibration = match store.load(file) {
                Ok(calibration) => calibration,
                Err(e @ ArmError::ConfigLoad { .. }) => {
                    return match on_fail {
                        Some(callback) => {
                            warn!("{}", e);
                            callback(&e);
                            Ok(LoadOutcome::CalibrationMissing)
                        }
                        None => Err(e),
                    };
                }
                Err(e) => return Err(e),
            };
            absolute_home(self.joints.get(joint), &calibration)?;
        }

        info!("All motors homed");
        Ok(LoadOutcome::Homed)
    }

    /// Enable or disable all four joints
    pub fn motors_enabled(&self, enabled: bool) -> Result<()> {
        for (_, motor) in self.joints.iter() {
            let result = if enabled {
                motor.enable()
            } else {
                motor.disable()
            };
            result.map_err(ArmError::Motion)?;
        }
        Ok(())
    }

    /// Disable every joint and the end effector, whatever else fails, and
    /// latch the stop so further motion is refused until cleared.
    ///
    /// Each disable waits for at most the one command already in flight on
    /// that device.
    pub fn emergency_stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        warn!("Emergency stop");

        let mut failed = Vec::new();
        for (joint, motor) in self.joints.iter() {
            if let Err(e) = motor.disable() {
                warn!("Failed to disable {}: {}", joint.name(), e);
                failed.push(joint.name());
            }
        }
        if let Err(e) = self.end_effector.disable() {
            warn!("Failed to disable end effector: {}", e);
            failed.push("end_effector");
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ArmError::EmergencyStop { failed })
        }
    }

    pub fn clear_emergency_stop(&self) {
        if self.stopped.swap(false, Ordering::SeqCst) {
            info!("Emergency stop cleared");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(ArmError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Joint positions in t1, t2, z, r order. `r` is the end rotation motor's
    /// own angle, not the world-relative bearing.
    pub fn positions(&self) -> Result<[f64; 4]> {
        let read = |m: &Motor| m.position().map_err(ArmError::Motion);
        Ok([
            read(&self.joints.t1)?,
            read(&self.joints.t2)?,
            read(&self.joints.z)?,
            read(&self.joints.r)?,
        ])
    }

    pub fn joints(&self) -> &Joints {
        &self.joints
    }

    pub fn end_effector(&self) -> &EndEffector {
        &self.end_effector
    }

    pub fn geometry(&self) -> &ArmGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }
}

fn apply_tuning(motor: &Motor, tuning: &JointTuning) -> std::result::Result<(), MotorError> {
    if let Some(limit) = tuning.voltage_limit {
        motor.set_voltage_limit(limit)?;
    }
    if let Some(limit) = tuning.velocity_limit {
        motor.set_velocity_limit(limit)?;
    }
    motor.set_pids(PidStage::Velocity, &tuning.velocity_pid)?;
    motor.set_pids(PidStage::Angle, &tuning.angle_pid)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::HomingTiming;
    use crate::motor::ControlMode;
    use crate::motor::sim::SimConnector;
    use std::time::Duration;

    pub fn fast_config() -> ArmConfig {
        let mut config = ArmConfig::default();
        config.homing = HomingTiming {
            spin_up: Duration::ZERO,
            poll: Duration::ZERO,
        };
        config.motion.tick = Duration::from_millis(1);
        config.motion.poll = Duration::from_millis(1);
        config
    }

    /// The simulated arm, discovered but not homed
    pub fn sim_arm() -> (System, SimConnector) {
        let connector = SimConnector::arm();
        let system = System::discover(
            Arc::new(connector.clone()),
            ArmGeometry::default(),
            fast_config(),
        )
        .unwrap();
        (system, connector)
    }

    /// The simulated arm with every joint in angle mode, as after homing
    pub fn holding_arm() -> (System, SimConnector) {
        let (system, connector) = sim_arm();
        for (_, motor) in system.joints().iter() {
            motor.set_control_mode(ControlMode::Angle).unwrap();
            motor.enable().unwrap();
        }
        (system, connector)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::arm::calibration::JointCalibration;
    use crate::motor::ControlMode;
    use crate::motor::sim::{SimConnector, SimMotor, SimServo};
    use std::cell::Cell;

    #[test]
    fn test_discover_binds_by_identity() {
        let (system, _) = sim_arm();
        assert_eq!(system.joints().t1.port(), "sim/inner_rot");
        assert_eq!(system.joints().t2.port(), "sim/outer_rot");
        assert_eq!(system.joints().z.port(), "sim/vertical");
        assert_eq!(system.joints().r.port(), "sim/end_rot");
        assert_eq!(system.end_effector().kind(), "gripper");
    }

    #[test]
    fn test_discover_applies_tuning() {
        let (_, connector) = sim_arm();
        let inner = connector.motor("sim/inner_rot").unwrap();
        assert_eq!(inner.limit('U'), Some(12.0));
        assert_eq!(inner.limit('V'), Some(4.0));
        assert_eq!(inner.pid('V', 'R'), Some(200.0));
        assert_eq!(inner.pid('A', 'D'), Some(4.0));
        let vertical = connector.motor("sim/vertical").unwrap();
        assert_eq!(vertical.limit('V'), None);
        assert_eq!(vertical.pid('A', 'P'), Some(10.0));
    }

    #[test]
    fn test_missing_joint_reports_detected_ids() {
        let connector = SimConnector::new()
            .with_motor("a", SimMotor::new(3))
            .with_motor("b", SimMotor::new(1))
            .with_motor("c", SimMotor::new(2))
            .with_motor("d", SimMotor::new(7))
            .with_motor("e", SimMotor::new(GRIPPER_ID));
        match System::discover(Arc::new(connector), ArmGeometry::default(), fast_config()) {
            Err(ArmError::MissingJoints { detected }) => assert_eq!(detected, vec![1, 2, 3]),
            other => panic!("expected missing joints, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_id_is_released() {
        let stray = SimMotor::new(9);
        let connector = SimConnector::arm().with_motor("sim/stray", stray.clone());
        System::discover(Arc::new(connector), ArmGeometry::default(), fast_config()).unwrap();
        assert_eq!(stray.received().last().map(String::as_str), Some("ME0"));
    }

    #[test]
    fn test_servo_fallback() {
        let servo = SimServo::new();
        let connector = SimConnector::new()
            .with_motor("m1", SimMotor::new(1))
            .with_motor("m2", SimMotor::new(2))
            .with_motor("m3", SimMotor::new(3))
            .with_motor("m4", SimMotor::new(4))
            .with_unopenable("busy")
            .with_servo("servo", servo.clone());
        let system =
            System::discover(Arc::new(connector), ArmGeometry::default(), fast_config()).unwrap();
        assert_eq!(system.end_effector().kind(), "servo");
        assert_eq!(system.end_effector().port(), "servo");
        system.end_effector().move_to(500.0).unwrap();
        assert_eq!(servo.lines().last().map(String::as_str), Some("150"));
    }

    #[test]
    fn test_missing_end_effector() {
        let connector = SimConnector::new()
            .with_motor("m1", SimMotor::new(1))
            .with_motor("m2", SimMotor::new(2))
            .with_motor("m3", SimMotor::new(3))
            .with_motor("m4", SimMotor::new(4));
        assert!(matches!(
            System::discover(Arc::new(connector), ArmGeometry::default(), fast_config()),
            Err(ArmError::MissingEndEffector)
        ));
    }

    #[test]
    fn test_configure_failure_names_joint() {
        let outer = SimMotor::new(3);
        outer.override_reply("MLU12.0", "0.0");
        let connector = SimConnector::arm().with_motor("sim/outer_rot", outer);
        match System::discover(Arc::new(connector), ArmGeometry::default(), fast_config()) {
            Err(ArmError::Configure { joint, .. }) => assert_eq!(joint, "outer_rot"),
            other => panic!("expected configure error, got {:?}", other.err()),
        }
    }

    fn calibrated_store(dir: &std::path::Path) -> CalibrationStore {
        let store = CalibrationStore::new(dir);
        store.save(INNER_ROT_FILE, &JointCalibration::centered(-3.0, 3.0)).unwrap();
        store
            .save(
                OUTER_ROT_FILE,
                &JointCalibration {
                    low: -2.5,
                    high: 2.5,
                    center: 0.25,
                },
            )
            .unwrap();
        store.save(END_ROT_FILE, &JointCalibration::centered(-1.0, 1.0)).unwrap();
        store
    }

    #[test]
    fn test_load_motors_homes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = calibrated_store(dir.path());
        let (system, connector) = sim_arm();

        assert_eq!(system.load_motors(&store, None).unwrap(), LoadOutcome::Homed);

        // Vertical zeroed at its lower stop, then raised to mid travel
        assert_eq!(system.joints().z.offset(), 0.0);
        assert_eq!(connector.motor("sim/vertical").unwrap().position(), 70.0);

        let gripper = connector.motor("sim/gripper").unwrap();
        assert_eq!(gripper.limit('U'), Some(6.0));
        assert_eq!(gripper.limit('V'), Some(999.0));
        assert_eq!(gripper.position(), 0.0);

        assert_eq!(system.joints().t2.offset(), 0.25);
        for (_, motor) in system.joints().iter() {
            assert_eq!(motor.control_mode(), ControlMode::Angle);
        }
        let [t1, t2, z, r] = system.positions().unwrap();
        assert!(t1.abs() < 1e-9 && t2.abs() < 1e-9 && r.abs() < 1e-9);
        assert!((z - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_motors_twice_keeps_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let store = calibrated_store(dir.path());
        let vertical = SimMotor::new(1)
            .with_stops(-7.0, 200.0)
            .with_position(30.0)
            .with_step(5.0);
        let gripper = SimMotor::new(GRIPPER_ID)
            .with_stops(-25.0, 15.0)
            .with_step(2.0);
        let connector = SimConnector::arm()
            .with_motor("sim/vertical", vertical.clone())
            .with_motor("sim/gripper", gripper.clone());
        let system =
            System::discover(Arc::new(connector), ArmGeometry::default(), fast_config()).unwrap();

        for _ in 0..2 {
            assert_eq!(system.load_motors(&store, None).unwrap(), LoadOutcome::Homed);
            assert_eq!(system.joints().z.offset(), -7.0);
            assert_eq!(vertical.position(), 63.0);
            assert_eq!(gripper.position(), -5.0);
            assert_eq!(system.joints().t2.offset(), 0.25);
        }
        let gripper_motor = system.end_effector().gripper_motor().unwrap();
        assert_eq!(gripper_motor.offset(), -5.0);
    }

    #[test]
    fn test_load_motors_missing_file_runs_callback() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path());
        store.save(INNER_ROT_FILE, &JointCalibration::centered(-3.0, 3.0)).unwrap();
        let (system, _) = sim_arm();

        let called = Cell::new(false);
        let on_fail = |e: &ArmError| {
            assert!(matches!(e, ArmError::ConfigLoad { .. }));
            called.set(true);
        };
        let outcome = system.load_motors(&store, Some(&on_fail)).unwrap();
        assert_eq!(outcome, LoadOutcome::CalibrationMissing);
        assert!(called.get());
        // Inner rotation was homed before the outer file was found missing
        assert_eq!(system.joints().t1.control_mode(), ControlMode::Angle);
    }

    #[test]
    fn test_load_motors_missing_file_without_callback() {
        let dir = tempfile::tempdir().unwrap();
        let (system, _) = sim_arm();
        assert!(matches!(
            system.load_motors(&CalibrationStore::new(dir.path()), None),
            Err(ArmError::ConfigLoad { .. })
        ));
    }

    #[test]
    fn test_emergency_stop_disables_everything() {
        let (system, connector) = holding_arm();
        system.end_effector().enable().unwrap();

        system.emergency_stop().unwrap();
        for port in ["sim/inner_rot", "sim/outer_rot", "sim/vertical", "sim/end_rot", "sim/gripper"] {
            assert!(!connector.motor(port).unwrap().enabled(), "{} still enabled", port);
        }
        assert!(system.is_stopped());
        assert!(matches!(
            system.load_motors(&CalibrationStore::default(), None),
            Err(ArmError::Stopped)
        ));

        system.clear_emergency_stop();
        assert!(!system.is_stopped());
    }

    #[test]
    fn test_emergency_stop_continues_past_failures() {
        let (system, connector) = holding_arm();
        let outer = connector.motor("sim/outer_rot").unwrap();
        outer.fail_io(true);

        match system.emergency_stop() {
            Err(ArmError::EmergencyStop { failed }) => assert_eq!(failed, vec!["outer_rot"]),
            other => panic!("expected emergency stop error, got {:?}", other),
        }
        assert!(!connector.motor("sim/end_rot").unwrap().enabled());
        outer.fail_io(false);
    }

    #[test]
    fn test_motors_enabled() {
        let (system, connector) = sim_arm();
        system.motors_enabled(true).unwrap();
        assert!(connector.motor("sim/vertical").unwrap().enabled());
        system.motors_enabled(false).unwrap();
        assert!(!connector.motor("sim/end_rot").unwrap().enabled());
        // The end effector is not a joint
        assert!(!connector.motor("sim/gripper").unwrap().enabled());
    }
}
