pub mod arm;
pub mod config;
pub mod end_effector;
pub mod messages;
pub mod motor;
pub mod runtime;
