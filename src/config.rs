// src/config.rs - Machine wiring and host settings loaded from TOML
use crate::tool::TOOL_NONE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration. Every section is optional and defaults to the
/// BrundleFab wiring.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub axes: AxesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default = "default_machine_name")]
    pub name: String,
    /// Scheduler period in microseconds.
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
    /// Initial level of the optional-stop switch honoured by M1.
    #[serde(default)]
    pub optional_stop: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
            tick_us: default_tick_us(),
            optional_stop: false,
        }
    }
}

/// Where commands come from. Without a serial device the host reads stdin.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            serial: None,
            baud: default_baud(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Stepper,
    DcEncoder,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    pub kind: AxisKind,
    /// Device units per millimetre: microsteps for steppers, encoder counts
    /// for DC axes.
    pub units_per_mm: f32,
    #[serde(default)]
    pub min_mm: f32,
    pub max_mm: f32,
    /// mm/min
    #[serde(default = "default_velocity_max")]
    pub velocity_max: f32,
    #[serde(default)]
    pub min_switch: bool,
    #[serde(default)]
    pub max_switch: bool,
    #[serde(default)]
    pub homing_timeout_ms: Option<u64>,
    #[serde(default = "default_pwm_min")]
    pub pwm_min: u8,
    #[serde(default = "default_pwm_max")]
    pub pwm_max: u8,
    /// Settle ticks after a DC axis reaches its target.
    #[serde(default = "default_overshoot")]
    pub overshoot: u32,
}

impl AxisConfig {
    pub fn stepper(steps_per_rev: f32, mm_per_rev: f32, max_mm: f32) -> Self {
        Self {
            kind: AxisKind::Stepper,
            units_per_mm: steps_per_rev / mm_per_rev,
            min_mm: 0.0,
            max_mm,
            velocity_max: default_velocity_max(),
            min_switch: false,
            max_switch: false,
            homing_timeout_ms: None,
            pwm_min: default_pwm_min(),
            pwm_max: default_pwm_max(),
            overshoot: default_overshoot(),
        }
    }

    pub fn validate(&self, name: char) -> Result<(), String> {
        if !(self.units_per_mm > 0.0) {
            return Err(format!("Axis {} units_per_mm must be > 0", name));
        }
        if self.min_mm >= self.max_mm {
            return Err(format!("Axis {} min_mm must be below max_mm", name));
        }
        if !(self.velocity_max > 0.0) {
            return Err(format!("Axis {} velocity_max must be > 0", name));
        }
        if self.kind == AxisKind::DcEncoder && self.pwm_min > self.pwm_max {
            return Err(format!("Axis {} pwm_min must not exceed pwm_max", name));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxesConfig {
    #[serde(default = "default_axis_x")]
    pub x: AxisConfig,
    #[serde(default = "default_axis_y")]
    pub y: AxisConfig,
    #[serde(default = "default_axis_z")]
    pub z: AxisConfig,
    #[serde(default = "default_axis_e")]
    pub e: AxisConfig,
}

impl AxesConfig {
    /// Axes in X, Y, Z, E order.
    pub fn all(&self) -> [&AxisConfig; 4] {
        [&self.x, &self.y, &self.z, &self.e]
    }
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            x: default_axis_x(),
            y: default_axis_y(),
            z: default_axis_z(),
            e: default_axis_e(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_fuser_id")]
    pub fuser_id: u32,
    #[serde(default = "default_fuser_min")]
    pub fuser_limit_min: i16,
    #[serde(default = "default_fuser_max")]
    pub fuser_limit_max: i16,
    #[serde(default = "default_ink_id")]
    pub ink_id: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fuser_id: default_fuser_id(),
            fuser_limit_min: default_fuser_min(),
            fuser_limit_max: default_fuser_max(),
            ink_id: default_ink_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_program_dir")]
    pub program_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            program_dir: default_program_dir(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, axis) in ['X', 'Y', 'Z', 'E'].into_iter().zip(self.axes.all()) {
            axis.validate(name).map_err(ConfigError::Invalid)?;
        }
        let tools = &self.tools;
        for id in [tools.fuser_id, tools.ink_id] {
            if id == TOOL_NONE {
                return Err(ConfigError::Invalid(format!("Tool id {} is reserved for the null tool", id)));
            }
        }
        if tools.fuser_id == tools.ink_id {
            return Err(ConfigError::Invalid("Fuser and ink tools share an id".to_string()));
        }
        if tools.fuser_limit_min >= tools.fuser_limit_max {
            return Err(ConfigError::Invalid("Fuser limit_min must be below limit_max".to_string()));
        }
        if self.machine.tick_us == 0 {
            return Err(ConfigError::Invalid("tick_us must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_machine_name() -> String { "BrundleFab".to_string() }
fn default_tick_us() -> u64 { 1000 }
fn default_baud() -> u32 { 115200 }
fn default_velocity_max() -> f32 { 6000.0 }
fn default_pwm_min() -> u8 { 60 }
fn default_pwm_max() -> u8 { 255 }
fn default_overshoot() -> u32 { 10 }
fn default_fuser_id() -> u32 { 20 }
fn default_fuser_min() -> i16 { 170 }
fn default_fuser_max() -> i16 { 180 }
fn default_ink_id() -> u32 { 1 }
fn default_program_dir() -> PathBuf { PathBuf::from(".") }

fn default_axis_x() -> AxisConfig {
    AxisConfig {
        kind: AxisKind::DcEncoder,
        units_per_mm: 11500.0 / 740.0,
        min_mm: 0.0,
        max_mm: 740.0,
        velocity_max: default_velocity_max(),
        min_switch: true,
        max_switch: true,
        homing_timeout_ms: None,
        pwm_min: default_pwm_min(),
        pwm_max: default_pwm_max(),
        overshoot: default_overshoot(),
    }
}

fn default_axis_y() -> AxisConfig {
    AxisConfig {
        min_switch: true,
        ..AxisConfig::stepper(200.0 * 16.0, 8.0, 300.0)
    }
}

fn default_axis_z() -> AxisConfig {
    AxisConfig {
        max_switch: true,
        velocity_max: 600.0,
        ..AxisConfig::stepper(200.0 * 16.0, 4.0, 200.0)
    }
}

fn default_axis_e() -> AxisConfig {
    AxisConfig::stepper(200.0 * 16.0, 40.0, 1000.0)
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Rejected config file '{}': {}", path, e);
        return Err(e);
    }
    Ok(config)
}
