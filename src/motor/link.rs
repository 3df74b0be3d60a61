// Line-oriented serial link to one controller
//
// One command in flight per device: the transport sits behind a mutex that
// is held from the write until the reply line has been read.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serialport::SerialPort;
use tracing::{debug, warn};

use super::audit::AuditLog;
use super::protocol::{MotorError, ParsedResponse, Reply, ResponseKind, Result};
use crate::config::{AUDIT_LOG_CAPACITY, BAUD_RATE, READ_TIMEOUT};

/// Byte stream carrying newline-terminated lines
pub trait LineTransport: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Read up to and excluding the next newline. A read timeout ends the
    /// line early and returns whatever arrived, possibly nothing.
    fn read_line(&mut self) -> io::Result<String>;
}

/// Enumerates and opens ports
pub trait PortConnector: Send + Sync {
    fn available_ports(&self) -> Result<Vec<String>>;

    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>>;
}

/// Real serial ports via `serialport`
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl PortConnector for SerialConnector {
    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(|e| MotorError::Open {
            port: "*".to_string(),
            reason: e.to_string(),
        })?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, port: &str) -> Result<Box<dyn LineTransport>> {
        let serial = serialport::new(port, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| MotorError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SerialLine { port: serial }))
    }
}

struct SerialLine {
    port: Box<dyn SerialPort>,
}

impl LineTransport for SerialLine {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Exclusive request/response channel to one device
pub struct DeviceLink {
    port: String,
    connector: Arc<dyn PortConnector>,
    transport: Mutex<Option<Box<dyn LineTransport>>>,
    audit: AuditLog,
}

impl DeviceLink {
    pub fn open(connector: Arc<dyn PortConnector>, port: &str) -> Result<Self> {
        debug!("Opening {}", port);
        let transport = connector.open(port)?;
        Ok(Self {
            port: port.to_string(),
            connector,
            transport: Mutex::new(Some(transport)),
            audit: AuditLog::new(AUDIT_LOG_CAPACITY),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Reopen the port if it was closed
    pub fn reopen(&self) -> Result<()> {
        let mut transport = self.lock();
        if transport.is_none() {
            debug!("Reopening {}", self.port);
            *transport = Some(self.connector.open(&self.port)?);
        }
        Ok(())
    }

    pub fn close(&self) {
        if self.lock().take().is_some() {
            debug!("Closed {}", self.port);
        }
    }

    /// Send one command and read one reply, parsed as `expected` when given.
    /// `motor_id` only labels protocol errors.
    pub fn send_command(
        &self,
        cmd: &str,
        expected: Option<ResponseKind>,
        motor_id: i64,
    ) -> Result<ParsedResponse> {
        let raw = self.exchange(cmd)?;
        match expected {
            Some(kind) => ParsedResponse::parse(kind, &raw).ok_or(MotorError::Protocol {
                motor_id,
                command: cmd.to_string(),
                response: raw,
                expected: kind,
            }),
            None => {
                warn!(
                    "Response verification disabled for {:?} on {}",
                    cmd, self.port
                );
                Ok(ParsedResponse::Unchecked(raw))
            }
        }
    }

    /// Typed form of [`send_command`](Self::send_command)
    pub fn request<T: Reply>(&self, cmd: &str, motor_id: i64) -> Result<T> {
        let raw = self.exchange(cmd)?;
        T::parse_reply(&raw).ok_or(MotorError::Protocol {
            motor_id,
            command: cmd.to_string(),
            response: raw,
            expected: T::KIND,
        })
    }

    /// Write a line for devices that never answer
    pub fn send_unconfirmed(&self, cmd: &str) -> Result<()> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or_else(|| self.closed())?;
        transport
            .write_line(cmd)
            .map_err(|source| self.lost(source))?;
        self.audit.record(cmd, "");
        Ok(())
    }

    fn exchange(&self, cmd: &str) -> Result<String> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or_else(|| self.closed())?;

        transport
            .write_line(cmd)
            .map_err(|source| self.lost(source))?;
        let reply = transport.read_line().map_err(|source| self.lost(source))?;
        let reply = reply.trim().to_string();

        self.audit.record(cmd, &reply);
        Ok(reply)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn LineTransport>>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> MotorError {
        MotorError::Closed {
            port: self.port.clone(),
        }
    }

    fn lost(&self, source: io::Error) -> MotorError {
        warn!("Device on {} lost: {}", self.port, source);
        MotorError::Transport {
            port: self.port.clone(),
            source,
        }
    }
}
