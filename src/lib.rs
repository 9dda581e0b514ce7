//! Home automation control plane: a supervisor hosting a gateway, a
//! multi-zone PID floor-heating controller and an automation rule engine,
//! plus a small set of lighter domain subsystems built on the same
//! primitives.

pub mod bus;
pub mod config;
pub mod device;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod notifications;
pub mod perf;
pub mod pid;
pub mod resilience;
pub mod rules;
pub mod settings;
pub mod supervisor;
