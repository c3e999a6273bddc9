//! root-vanished library exports.
//!
//! The binary is a thin wrapper around [`controller::FailsafeController`];
//! the components are public so integration tests can drive them with fake
//! hotplug streams, displays and reboot triggers.

pub mod cli;
pub mod config;
pub mod controller;
pub mod display;
pub mod host;
pub mod hotplug;
pub mod memlock;
pub mod mounts;
pub mod reboot;
