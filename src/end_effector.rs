// End effectors: one contract over the gripper and the hobby servo
//
// The gripper is a FOC motor controller reporting id 5, driven in angle mode.
// The servo has no identification or feedback; it takes one integer per line.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{GRIPPER_ID, GRIPPER_RANGE, SERVO_RANGE};
use crate::motor::{ControlMode, DeviceLink, Motor, MotorError, PortConnector};

#[derive(Debug, thiserror::Error)]
pub enum EndEffectorError {
    #[error("Could not connect to end effector on {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: MotorError,
    },

    #[error("Could not disconnect from end effector on {port}: {source}")]
    Disconnect {
        port: String,
        #[source]
        source: MotorError,
    },

    #[error("End effector failed to {action}: {source}")]
    Command {
        action: &'static str,
        #[source]
        source: MotorError,
    },

    #[error("Device on {port} reports id {id}, which is not a gripper")]
    Identity { port: String, id: i64 },

    #[error("End effector target {0} is not a number")]
    InvalidTarget(f64),
}

pub type Result<T> = std::result::Result<T, EndEffectorError>;

/// Capabilities every end effector offers
pub trait EndEffectorDevice {
    /// Inclusive range of meaningful `move_to` targets
    fn value_range(&self) -> (f64, f64);

    fn connect(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn enable(&self) -> Result<()>;

    fn disable(&self) -> Result<()>;

    fn move_to(&self, target: f64) -> Result<()>;
}

/// Torque-controlled rotary gripper
pub struct Gripper {
    motor: Motor,
}

impl Gripper {
    /// Claim a motor as the gripper. It must report the gripper id.
    pub fn new(motor: Motor, voltage_limit: f64) -> Result<Self> {
        if motor.id() != GRIPPER_ID {
            return Err(EndEffectorError::Identity {
                port: motor.port().to_string(),
                id: motor.id(),
            });
        }
        let configure = |m: &Motor| {
            m.set_control_mode(ControlMode::Angle)?;
            m.set_voltage_limit(voltage_limit)
        };
        configure(&motor).map_err(|source| EndEffectorError::Connect {
            port: motor.port().to_string(),
            source,
        })?;
        info!("Gripper bound on {}", motor.port());
        Ok(Self { motor })
    }

    pub fn open(connector: Arc<dyn PortConnector>, port: &str, voltage_limit: f64) -> Result<Self> {
        let motor = Motor::open(connector, port).map_err(|source| EndEffectorError::Connect {
            port: port.to_string(),
            source,
        })?;
        Self::new(motor, voltage_limit)
    }

    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    /// Logical 0..100 onto the controller's angle range
    fn to_angle(target: f64) -> f64 {
        9.0 * (target - 50.0) / 20.0
    }
}

impl EndEffectorDevice for Gripper {
    fn value_range(&self) -> (f64, f64) {
        GRIPPER_RANGE
    }

    fn connect(&self) -> Result<()> {
        self.motor
            .reconnect()
            .map_err(|source| EndEffectorError::Connect {
                port: self.motor.port().to_string(),
                source,
            })
    }

    fn disconnect(&self) -> Result<()> {
        self.motor
            .disconnect()
            .map_err(|source| EndEffectorError::Disconnect {
                port: self.motor.port().to_string(),
                source,
            })
    }

    fn enable(&self) -> Result<()> {
        self.motor
            .enable()
            .map_err(|source| EndEffectorError::Command {
                action: "enable",
                source,
            })
    }

    fn disable(&self) -> Result<()> {
        self.motor
            .disable()
            .map_err(|source| EndEffectorError::Command {
                action: "disable",
                source,
            })
    }

    fn move_to(&self, target: f64) -> Result<()> {
        if !target.is_finite() {
            return Err(EndEffectorError::InvalidTarget(target));
        }
        self.motor
            .move_to(Self::to_angle(target))
            .map_err(|source| EndEffectorError::Command {
                action: "move",
                source,
            })
    }
}

/// Open-loop hobby servo
pub struct Servo {
    link: DeviceLink,
}

impl Servo {
    pub fn open(connector: Arc<dyn PortConnector>, port: &str) -> Result<Self> {
        let link = DeviceLink::open(connector, port).map_err(|source| {
            EndEffectorError::Connect {
                port: port.to_string(),
                source,
            }
        })?;
        info!("Servo bound on {}", port);
        Ok(Self { link })
    }

    pub fn from_link(link: DeviceLink) -> Self {
        Self { link }
    }

    pub fn port(&self) -> &str {
        self.link.port()
    }
}

impl EndEffectorDevice for Servo {
    fn value_range(&self) -> (f64, f64) {
        SERVO_RANGE
    }

    fn connect(&self) -> Result<()> {
        self.link
            .reopen()
            .map_err(|source| EndEffectorError::Connect {
                port: self.link.port().to_string(),
                source,
            })
    }

    fn disconnect(&self) -> Result<()> {
        self.disable()?;
        self.link.close();
        Ok(())
    }

    // No enable line on the servo
    fn enable(&self) -> Result<()> {
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        Ok(())
    }

    fn move_to(&self, target: f64) -> Result<()> {
        // Infinities clamp fine, NaN would cast to 0
        if target.is_nan() {
            return Err(EndEffectorError::InvalidTarget(target));
        }
        let (min, max) = self.value_range();
        let value = target.clamp(min, max).round() as i64;
        debug!("Servo target {} -> {}", target, value);
        // Nothing comes back, so a successful write is all we can confirm
        self.link
            .send_unconfirmed(&value.to_string())
            .map_err(|source| EndEffectorError::Command {
                action: "move",
                source,
            })
    }
}

/// The end effector installed on this arm, chosen once at discovery
pub enum EndEffector {
    Gripper(Gripper),
    Servo(Servo),
}

impl EndEffector {
    pub fn kind(&self) -> &'static str {
        match self {
            EndEffector::Gripper(_) => "gripper",
            EndEffector::Servo(_) => "servo",
        }
    }

    pub fn port(&self) -> &str {
        match self {
            EndEffector::Gripper(g) => g.motor().port(),
            EndEffector::Servo(s) => s.port(),
        }
    }

    /// The gripper's motor, which needs its own calibration
    pub fn gripper_motor(&self) -> Option<&Motor> {
        match self {
            EndEffector::Gripper(g) => Some(g.motor()),
            EndEffector::Servo(_) => None,
        }
    }

    fn device(&self) -> &dyn EndEffectorDevice {
        match self {
            EndEffector::Gripper(g) => g,
            EndEffector::Servo(s) => s,
        }
    }
}

impl EndEffectorDevice for EndEffector {
    fn value_range(&self) -> (f64, f64) {
        self.device().value_range()
    }

    fn connect(&self) -> Result<()> {
        self.device().connect()
    }

    fn disconnect(&self) -> Result<()> {
        self.device().disconnect()
    }

    fn enable(&self) -> Result<()> {
        self.device().enable()
    }

    fn disable(&self) -> Result<()> {
        self.device().disable()
    }

    fn move_to(&self, target: f64) -> Result<()> {
        self.device().move_to(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::sim::{SimConnector, SimMotor, SimServo};

    fn servo() -> (Servo, SimServo) {
        let sim = SimServo::new();
        let connector = SimConnector::new().with_servo("servo", sim.clone());
        (Servo::open(Arc::new(connector), "servo").unwrap(), sim)
    }

    fn gripper(sim: &SimMotor) -> Result<Gripper> {
        let connector = SimConnector::new().with_motor("grip", sim.clone());
        Gripper::open(Arc::new(connector), "grip", 6.0)
    }

    #[test]
    fn test_servo_clamps_to_range() {
        let (servo, sim) = servo();
        servo.move_to(200.0).unwrap();
        servo.move_to(-5.0).unwrap();
        servo.move_to(42.4).unwrap();
        assert_eq!(sim.lines(), vec!["150", "10", "42"]);
    }

    #[test]
    fn test_servo_rejects_nan() {
        let (servo, sim) = servo();
        assert!(matches!(
            servo.move_to(f64::NAN),
            Err(EndEffectorError::InvalidTarget(_))
        ));
        servo.move_to(f64::INFINITY).unwrap();
        assert_eq!(sim.lines(), vec!["150"]);
    }

    #[test]
    fn test_servo_enable_is_noop() {
        let (servo, sim) = servo();
        servo.enable().unwrap();
        servo.disable().unwrap();
        assert!(sim.lines().is_empty());
        assert_eq!(servo.value_range(), (10.0, 150.0));
    }

    #[test]
    fn test_servo_disconnect_then_move_fails_uniformly() {
        let (servo, _sim) = servo();
        servo.disconnect().unwrap();
        assert!(matches!(
            servo.move_to(50.0),
            Err(EndEffectorError::Command { action: "move", .. })
        ));
        servo.connect().unwrap();
        servo.move_to(50.0).unwrap();
    }

    #[test]
    fn test_gripper_configures_on_bind() {
        let sim = SimMotor::new(GRIPPER_ID);
        let g = gripper(&sim).unwrap();
        assert_eq!(sim.mode(), ControlMode::Angle);
        assert_eq!(sim.limit('U'), Some(6.0));
        assert_eq!(g.value_range(), (0.0, 100.0));
    }

    #[test]
    fn test_gripper_remaps_logical_range() {
        let sim = SimMotor::new(GRIPPER_ID);
        let g = gripper(&sim).unwrap();
        g.move_to(100.0).unwrap();
        assert_eq!(sim.position(), 22.5);
        g.move_to(50.0).unwrap();
        assert_eq!(sim.position(), 0.0);
        g.move_to(0.0).unwrap();
        assert_eq!(sim.position(), -22.5);

        assert!(matches!(
            g.move_to(f64::NAN),
            Err(EndEffectorError::InvalidTarget(_))
        ));
        assert_eq!(sim.position(), -22.5);
    }

    #[test]
    fn test_gripper_rejects_wrong_identity() {
        let sim = SimMotor::new(3);
        assert!(matches!(
            gripper(&sim),
            Err(EndEffectorError::Identity { id: 3, .. })
        ));
    }

    #[test]
    fn test_gripper_failures_are_uniform() {
        let sim = SimMotor::new(GRIPPER_ID);
        let effector = EndEffector::Gripper(gripper(&sim).unwrap());
        sim.fail_io(true);
        assert!(matches!(
            effector.move_to(10.0),
            Err(EndEffectorError::Command { action: "move", .. })
        ));
        assert!(matches!(
            effector.enable(),
            Err(EndEffectorError::Command { .. })
        ));
        assert_eq!(effector.kind(), "gripper");
    }
}
