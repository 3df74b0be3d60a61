// FOC motor controller: typed commands over a device link
//
// Positions are reported and commanded relative to `offset`, which homing
// establishes. Every setter checks the firmware's echo and fails with
// `MotorError::Mismatch` when it differs from what was sent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::audit::AuditLog;
use super::link::{DeviceLink, PortConnector};
use super::protocol::{
    ControlMode, Limit, MotorError, PidStage, Reply, Result, encode_float, round3,
};
use crate::config::PidGains;

#[derive(Debug, Clone, Copy, Default)]
struct MotorState {
    offset: f64,
    mode: ControlMode,
}

/// One motor controller on its own serial port
pub struct Motor {
    link: DeviceLink,
    id: i64,
    state: Mutex<MotorState>,
}

impl Motor {
    /// Open `port` and read the controller's identity
    pub fn open(connector: Arc<dyn PortConnector>, port: &str) -> Result<Self> {
        Self::connect(DeviceLink::open(connector, port)?)
    }

    /// Identify the controller behind an open link. Not retried.
    pub fn connect(link: DeviceLink) -> Result<Self> {
        let id = link.request::<i64>("I", -1)?;
        debug!("Motor {} on {}", id, link.port());
        Ok(Self {
            link,
            id,
            state: Mutex::new(MotorState::default()),
        })
    }

    /// Reopen a disconnected motor and check it is still the same device
    pub fn reconnect(&self) -> Result<()> {
        self.link.reopen()?;
        let id = self.query::<i64>("I")?;
        if id != self.id {
            return Err(self.mismatch("reconnect", self.id, id));
        }
        Ok(())
    }

    /// Disable and close the port
    pub fn disconnect(&self) -> Result<()> {
        if !self.link.is_open() {
            return Ok(());
        }
        let result = self.disable();
        self.link.close();
        info!("Disconnected motor {} on {}", self.id, self.link.port());
        result
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn port(&self) -> &str {
        self.link.port()
    }

    pub fn alive(&self) -> bool {
        self.link.is_open()
    }

    pub fn audit(&self) -> &AuditLog {
        self.link.audit()
    }

    pub fn offset(&self) -> f64 {
        self.state().offset
    }

    pub fn set_offset(&self, offset: f64) {
        debug!("Motor {} offset {}", self.id, offset);
        self.state().offset = offset;
    }

    pub fn control_mode(&self) -> ControlMode {
        self.state().mode
    }

    pub fn com_precision(&self) -> Result<i64> {
        self.query("#")
    }

    pub fn set_com_precision(&self, decimals: u8) -> Result<()> {
        if !(1..=15).contains(&decimals) {
            return Err(MotorError::InvalidPrecision(decimals));
        }
        let echo = self.query::<f64>(&format!("#{}", decimals))?;
        self.confirm("set COM precision", decimals as f64, echo)
    }

    pub fn enabled(&self) -> Result<bool> {
        self.query("ME")
    }

    /// Position relative to the homed zero
    pub fn position(&self) -> Result<f64> {
        Ok(self.raw_position()? - self.offset())
    }

    /// Encoder position as reported, ignoring the offset
    pub fn raw_position(&self) -> Result<f64> {
        self.query("MMG6")
    }

    pub fn velocity(&self) -> Result<f64> {
        self.query("MMG5")
    }

    pub fn torque(&self) -> Result<f64> {
        self.query("MMG1")
    }

    pub fn enable(&self) -> Result<()> {
        let echo = self.query::<i64>("ME1")?;
        self.confirm("enable motor", 1, echo)
    }

    pub fn disable(&self) -> Result<()> {
        let echo = self.query::<i64>("ME0")?;
        self.confirm("disable motor", 0, echo)
    }

    pub fn set_limit(&self, limit: Limit, value: f64) -> Result<()> {
        let echo = self.query::<f64>(&format!("ML{}{}", limit.code(), encode_float(value)))?;
        self.confirm(limit.step(), value, echo)
    }

    pub fn set_current_limit(&self, limit: f64) -> Result<()> {
        self.set_limit(Limit::Current, limit)
    }

    pub fn set_voltage_limit(&self, limit: f64) -> Result<()> {
        self.set_limit(Limit::Voltage, limit)
    }

    pub fn set_velocity_limit(&self, limit: f64) -> Result<()> {
        self.set_limit(Limit::Velocity, limit)
    }

    /// Send each set gain of one PID stage, stopping at the first rejection
    pub fn set_pids(&self, stage: PidStage, gains: &PidGains) -> Result<()> {
        for (term, value) in gains.terms() {
            let cmd = format!("M{}{}{}", stage.code(), term, encode_float(value));
            let echo = self.query::<f64>(&cmd)?;
            self.confirm("set PIDs", value, echo)?;
        }
        Ok(())
    }

    pub fn set_control_mode(&self, mode: ControlMode) -> Result<()> {
        let echo = self.query::<String>(&format!("MC{}", mode.code()))?;
        if !mode.matches_echo(&echo) {
            return Err(self.mismatch("set control mode", mode.name(), echo));
        }
        self.state().mode = mode;
        Ok(())
    }

    /// Command the controller's target: a position in angle mode (offset
    /// applied, rounded to 3 decimals), otherwise a velocity or voltage.
    pub fn move_to(&self, target: f64) -> Result<()> {
        let MotorState { offset, mode } = *self.state();
        let target = match mode {
            ControlMode::Angle => round3(target + offset),
            _ => target,
        };
        let echo = self.query::<f64>(&format!("M{}", encode_float(target)))?;
        self.confirm("set target position", target, echo)
    }

    fn query<T: Reply>(&self, cmd: &str) -> Result<T> {
        self.link.request(cmd, self.id)
    }

    fn confirm<T: PartialEq + std::fmt::Display>(
        &self,
        step: &'static str,
        expected: T,
        received: T,
    ) -> Result<()> {
        if expected == received {
            Ok(())
        } else {
            Err(self.mismatch(step, expected, received))
        }
    }

    fn mismatch(
        &self,
        step: &'static str,
        expected: impl std::fmt::Display,
        received: impl std::fmt::Display,
    ) -> MotorError {
        MotorError::Mismatch {
            motor_id: self.id,
            step,
            expected: expected.to_string(),
            received: received.to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MotorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Motor {
    fn drop(&mut self) {
        // Leave the joint limp rather than holding whatever it was doing
        if let Err(e) = self.disconnect() {
            warn!("Failed to disable motor {} on drop: {}", self.id, e);
        }
    }
}
