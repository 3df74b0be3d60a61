// ASCII line protocol of the FOC motor controller
//
// Every request is one newline-terminated command, every reply one line.
// Replies are parsed into the kind the command is documented to return:
//
//   I          identity                 int
//   #          COM precision            int
//   #<n>       set COM precision        float echo
//   ME         enabled?                 bool
//   ME1 / ME0  enable / disable         int echo
//   MMG6       position                 float
//   MMG5       velocity                 float
//   MMG1       torque                   float
//   M<pos>     move                     float echo
//   MC<0|1|2>  control mode             3-char prefix echo
//   ML[CUV]<x> current/voltage/vel lim  float echo
//   M[AV][PIDRLF]<x>  PID term          float echo

use std::fmt;

/// Expected type of a reply line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Int,
    Float,
    Bool,
    Text,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseKind::Int => "int",
            ResponseKind::Float => "float",
            ResponseKind::Bool => "bool",
            ResponseKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A reply line parsed according to its expected kind
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// Sent without verification; the raw line as received
    Unchecked(String),
}

impl ParsedResponse {
    pub fn parse(kind: ResponseKind, raw: &str) -> Option<Self> {
        match kind {
            ResponseKind::Int => i64::parse_reply(raw).map(ParsedResponse::Int),
            ResponseKind::Float => f64::parse_reply(raw).map(ParsedResponse::Float),
            ResponseKind::Bool => bool::parse_reply(raw).map(ParsedResponse::Bool),
            ResponseKind::Text => String::parse_reply(raw).map(ParsedResponse::Text),
        }
    }
}

/// Types a reply line can be parsed into
pub trait Reply: Sized {
    const KIND: ResponseKind;

    fn parse_reply(raw: &str) -> Option<Self>;
}

impl Reply for i64 {
    const KIND: ResponseKind = ResponseKind::Int;

    fn parse_reply(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl Reply for f64 {
    const KIND: ResponseKind = ResponseKind::Float;

    fn parse_reply(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl Reply for bool {
    const KIND: ResponseKind = ResponseKind::Bool;

    fn parse_reply(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1" | "true" | "True" => Some(true),
            "0" | "false" | "False" => Some(false),
            _ => None,
        }
    }
}

impl Reply for String {
    const KIND: ResponseKind = ResponseKind::Text;

    fn parse_reply(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// Controller operating mode, selected with `MC<n>`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlMode {
    #[default]
    Torque,
    Velocity,
    Angle,
}

impl ControlMode {
    pub fn code(self) -> u8 {
        match self {
            ControlMode::Torque => 0,
            ControlMode::Velocity => 1,
            ControlMode::Angle => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlMode::Torque => "torque",
            ControlMode::Velocity => "velocity",
            ControlMode::Angle => "angle",
        }
    }

    /// The firmware confirms a mode switch by echoing the mode name;
    /// only the first three characters are significant.
    pub fn matches_echo(self, echo: &str) -> bool {
        echo.get(..3) == self.name().get(..3)
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which PID cascade stage a gain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStage {
    Velocity,
    Angle,
}

impl PidStage {
    pub fn code(self) -> char {
        match self {
            PidStage::Velocity => 'V',
            PidStage::Angle => 'A',
        }
    }
}

/// Limit registers set with `ML<c><value>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Current,
    Voltage,
    Velocity,
}

impl Limit {
    pub fn code(self) -> char {
        match self {
            Limit::Current => 'C',
            Limit::Voltage => 'U',
            Limit::Velocity => 'V',
        }
    }

    pub fn step(self) -> &'static str {
        match self {
            Limit::Current => "set current limit",
            Limit::Voltage => "set voltage limit",
            Limit::Velocity => "set velocity limit",
        }
    }
}

/// Format a float the way the firmware expects: shortest round-trip decimal,
/// always with a fractional part.
pub fn encode_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Round to the three decimals a position command carries
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Error types for motor controller communication
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Device on {port} lost: {source}")]
    Transport {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Device on {port} is closed")]
    Closed { port: String },

    #[error(
        "Received data could not be parsed as {expected}, COM may be out of sync \
         (motor {motor_id}, command {command:?}, response {response:?})"
    )]
    Protocol {
        motor_id: i64,
        command: String,
        response: String,
        expected: ResponseKind,
    },

    #[error("Failed to {step} on motor {motor_id}: expected {expected}, received {received}")]
    Mismatch {
        motor_id: i64,
        step: &'static str,
        expected: String,
        received: String,
    },

    #[error("COM precision must be within [1, 15], got {0}")]
    InvalidPrecision(u8),
}

impl MotorError {
    /// Transport failures mean the device is gone; everything else is per-command
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MotorError::Transport { .. } | MotorError::Closed { .. } | MotorError::Open { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MotorError>;
