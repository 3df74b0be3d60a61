// Motor controller communication for the SCARA arm
//
// Provides:
// - Line-oriented serial link with one command in flight per device
// - FOC motor controller command/confirmation protocol
// - Bounded per-device command audit log
// - Simulated controllers for tests and hardware-free runs

mod audit;
pub mod focmc;
pub mod link;
pub mod protocol;
pub mod sim;

pub use audit::{AuditEntry, AuditLog};
pub use focmc::Motor;
pub use link::{DeviceLink, LineTransport, PortConnector, SerialConnector};
pub use protocol::{ControlMode, Limit, MotorError, ParsedResponse, PidStage, ResponseKind};
