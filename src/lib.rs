// src/lib.rs - Motion and tool control for the BrundleFab fabrication rig
pub mod cnc;
pub mod config;
pub mod gcode;
pub mod hardware;
pub mod machine;
pub mod motion;
pub mod storage;
pub mod tool;

pub use cnc::Cnc;
pub use config::{Config, ConfigError, load_config};
pub use gcode::GCode;
pub use machine::{Machine, MachineError};
