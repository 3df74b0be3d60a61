// Simulated controllers speaking the motor line protocol
//
// Used by the unit tests and by `--sim` to run the arm without hardware.
// A simulated motor moves between two hard stops while driven in torque or
// velocity mode, and jumps straight to the target in angle mode unless frozen.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::link::{LineTransport, PortConnector};
use super::protocol::{ControlMode, MotorError, Result, encode_float};
use crate::config::GRIPPER_ID;

#[derive(Debug)]
struct MotorState {
    id: i64,
    enabled: bool,
    mode: ControlMode,
    position: f64,
    drive: f64,
    stops: (f64, f64),
    step: f64,
    frozen: bool,
    precision: i64,
    limits: HashMap<char, f64>,
    pids: HashMap<(char, char), f64>,
    overrides: HashMap<String, String>,
    fail_io: bool,
    received: Vec<String>,
}

/// Shared handle to one simulated motor controller
#[derive(Debug, Clone)]
pub struct SimMotor {
    state: Arc<Mutex<MotorState>>,
}

impl SimMotor {
    pub fn new(id: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MotorState {
                id,
                enabled: false,
                mode: ControlMode::Torque,
                position: 0.0,
                drive: 0.0,
                stops: (f64::NEG_INFINITY, f64::INFINITY),
                step: 0.5,
                frozen: false,
                precision: 3,
                limits: HashMap::new(),
                pids: HashMap::new(),
                overrides: HashMap::new(),
                fail_io: false,
                received: Vec::new(),
            })),
        }
    }

    /// Raw starting position
    pub fn with_position(self, position: f64) -> Self {
        self.lock().position = position;
        self
    }

    /// Mechanical hard stops reached when driven in torque/velocity mode
    pub fn with_stops(self, low: f64, high: f64) -> Self {
        self.lock().stops = (low, high);
        self
    }

    /// Distance travelled per velocity poll while driven
    pub fn with_step(self, step: f64) -> Self {
        self.lock().step = step;
        self
    }

    /// Accept every command but never move
    pub fn frozen(self) -> Self {
        self.set_frozen(true);
        self
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.lock().frozen = frozen;
    }

    /// Answer `command` with `reply` instead of the normal response
    pub fn override_reply(&self, command: &str, reply: &str) {
        self.lock()
            .overrides
            .insert(command.to_string(), reply.to_string());
    }

    pub fn fail_io(&self, fail: bool) {
        self.lock().fail_io = fail;
    }

    pub fn position(&self) -> f64 {
        self.lock().position
    }

    pub fn set_position(&self, position: f64) {
        self.lock().position = position;
    }

    pub fn enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn mode(&self) -> ControlMode {
        self.lock().mode
    }

    pub fn limit(&self, code: char) -> Option<f64> {
        self.lock().limits.get(&code).copied()
    }

    pub fn pid(&self, stage: char, term: char) -> Option<f64> {
        self.lock().pids.get(&(stage, term)).copied()
    }

    /// Every command line received so far
    pub fn received(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MotorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, cmd: &str) -> String {
        let mut s = self.lock();
        s.received.push(cmd.to_string());
        if let Some(reply) = s.overrides.get(cmd) {
            return reply.clone();
        }

        match cmd {
            "I" => return s.id.to_string(),
            "#" => return s.precision.to_string(),
            "ME" => return if s.enabled { "1" } else { "0" }.to_string(),
            "ME1" | "ME0" => {
                s.enabled = cmd == "ME1";
                return if s.enabled { "1" } else { "0" }.to_string();
            }
            "MMG6" => return encode_float(s.position),
            "MMG5" => return encode_float(s.poll_velocity()),
            "MMG1" => return encode_float(s.drive),
            _ => {}
        }

        if let Some(n) = cmd.strip_prefix('#') {
            return match n.parse::<i64>() {
                Ok(n) => {
                    s.precision = n;
                    encode_float(n as f64)
                }
                Err(_) => "?".to_string(),
            };
        }
        if let Some(code) = cmd.strip_prefix("MC") {
            let mode = match code {
                "0" => ControlMode::Torque,
                "1" => ControlMode::Velocity,
                "2" => ControlMode::Angle,
                _ => return "?".to_string(),
            };
            s.mode = mode;
            s.drive = 0.0;
            return mode.name().to_string();
        }
        if let Some(rest) = cmd.strip_prefix("ML") {
            let mut chars = rest.chars();
            return match (chars.next(), chars.as_str().parse::<f64>()) {
                (Some(code), Ok(v)) => {
                    s.limits.insert(code, v);
                    encode_float(v)
                }
                _ => "?".to_string(),
            };
        }
        if let Some(rest) = cmd.strip_prefix("MA").or_else(|| cmd.strip_prefix("MV")) {
            let stage = if cmd.starts_with("MA") { 'A' } else { 'V' };
            let mut chars = rest.chars();
            return match (chars.next(), chars.as_str().parse::<f64>()) {
                (Some(term), Ok(v)) => {
                    s.pids.insert((stage, term), v);
                    encode_float(v)
                }
                _ => "?".to_string(),
            };
        }
        if let Some(rest) = cmd.strip_prefix('M') {
            return match rest.parse::<f64>() {
                Ok(v) => {
                    s.command(v);
                    encode_float(v)
                }
                Err(_) => "?".to_string(),
            };
        }
        "?".to_string()
    }
}

impl MotorState {
    fn command(&mut self, value: f64) {
        if self.frozen {
            return;
        }
        match self.mode {
            ControlMode::Angle => {
                self.drive = 0.0;
                self.position = value.clamp(self.stops.0, self.stops.1);
            }
            ControlMode::Torque | ControlMode::Velocity => self.drive = value,
        }
    }

    fn poll_velocity(&mut self) -> f64 {
        if self.frozen || !self.enabled || self.drive == 0.0 {
            return 0.0;
        }
        let stop = if self.drive > 0.0 {
            self.stops.1
        } else {
            self.stops.0
        };
        let remaining = stop - self.position;
        if remaining.abs() < 1e-9 {
            return 0.0;
        }
        self.position += remaining.clamp(-self.step, self.step);
        self.drive
    }
}

/// Shared handle to a simulated open-loop servo; records every line written
#[derive(Debug, Clone, Default)]
pub struct SimServo {
    lines: Arc<Mutex<Vec<String>>>,
}

impl SimServo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone)]
enum SimDevice {
    Motor(SimMotor),
    Servo(SimServo),
    Unopenable,
}

struct SimTransport {
    device: SimDevice,
    pending: Option<String>,
}

impl LineTransport for SimTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match &self.device {
            SimDevice::Motor(motor) => {
                if motor.lock().fail_io {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
                }
                self.pending = Some(motor.handle(line));
            }
            SimDevice::Servo(servo) => servo
                .lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line.to_string()),
            SimDevice::Unopenable => {}
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        if let SimDevice::Motor(motor) = &self.device
            && motor.lock().fail_io
        {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        }
        // Nothing pending behaves like a read timeout
        Ok(self.pending.take().unwrap_or_default())
    }
}

/// Port connector backed by simulated devices
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    devices: BTreeMap<String, SimDevice>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_motor(mut self, port: &str, motor: SimMotor) -> Self {
        self.devices
            .insert(port.to_string(), SimDevice::Motor(motor));
        self
    }

    pub fn with_servo(mut self, port: &str, servo: SimServo) -> Self {
        self.devices
            .insert(port.to_string(), SimDevice::Servo(servo));
        self
    }

    /// A listed port that fails to open
    pub fn with_unopenable(mut self, port: &str) -> Self {
        self.devices
            .insert(port.to_string(), SimDevice::Unopenable);
        self
    }

    /// Handle to the simulated motor on `port`
    pub fn motor(&self, port: &str) -> Option<SimMotor> {
        match self.devices.get(port) {
            Some(SimDevice::Motor(motor)) => Some(motor.clone()),
            _ => None,
        }
    }

    /// A complete arm: four joints and the gripper, with hard stops where the
    /// physical joints have them.
    pub fn arm() -> Self {
        let vertical = SimMotor::new(1)
            .with_stops(0.0, 200.0)
            .with_position(30.0)
            .with_step(5.0);
        let gripper = SimMotor::new(GRIPPER_ID)
            .with_stops(-25.0, 25.0)
            .with_step(2.0);

        Self::new()
            .with_motor("sim/vertical", vertical)
            .with_motor("sim/inner_rot", SimMotor::new(2).with_stops(-3.0, 3.0))
            .with_motor("sim/outer_rot", SimMotor::new(3).with_stops(-2.5, 2.5))
            .with_motor("sim/end_rot", SimMotor::new(4).with_stops(-3.0, 3.0))
            .with_motor("sim/gripper", gripper)
    }
}

impl PortConnector for SimConnector {
    fn available_ports(&self) -> Result<Vec<String>> {
        Ok(self.devices.keys().cloned().collect())
    }

    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>> {
        match self.devices.get(port) {
            Some(SimDevice::Unopenable) | None => Err(MotorError::Open {
                port: port.to_string(),
                reason: "no such simulated device".to_string(),
            }),
            Some(device) => Ok(Box::new(SimTransport {
                device: device.clone(),
                pending: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_until_hard_stop() {
        let motor = SimMotor::new(1).with_stops(-1.0, 1.0);
        motor.handle("ME1");
        motor.handle("M-3.0");
        let mut polls = 0;
        while motor.handle("MMG5") != "0.0" {
            polls += 1;
            assert!(polls < 10);
        }
        assert_eq!(motor.position(), -1.0);
    }

    #[test]
    fn test_angle_mode_snaps() {
        let motor = SimMotor::new(1);
        assert_eq!(motor.handle("MC2"), "angle");
        assert_eq!(motor.handle("M1.25"), "1.25");
        assert_eq!(motor.position(), 1.25);
        assert_eq!(motor.handle("MMG6"), "1.25");
    }

    #[test]
    fn test_configuration_echo() {
        let motor = SimMotor::new(1);
        assert_eq!(motor.handle("MLU12.0"), "12.0");
        assert_eq!(motor.handle("MAD4.0"), "4.0");
        assert_eq!(motor.handle("MVF0.01"), "0.01");
        assert_eq!(motor.limit('U'), Some(12.0));
        assert_eq!(motor.pid('A', 'D'), Some(4.0));
        assert_eq!(motor.pid('V', 'F'), Some(0.01));
    }
}
