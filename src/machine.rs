// src/machine.rs - Top-level assembly: hardware, CNC state and the G-code front end
use crate::cnc::{Cnc, Switch};
use crate::config::{AxisConfig, AxisKind, Config, ConfigError};
use crate::gcode::GCode;
use crate::hardware::sim::{SimRail, SimSprayer, SimThermal};
use crate::hardware::{Endstop, NormallyClosed};
use crate::motion::{Axis, AxisGeometry, AxisId, DcEncoderActuator, MotionActuator, StepperActuator};
use crate::storage::{ProgramStore, StorageError};
use crate::tool::{FuserTool, InkTool, ToolHead};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Simulated rail start, measured from the minimum end of travel.
const SIM_PARK_MM: f32 = 5.0;
/// Homing stride for stepper axes.
const SEEK_MM: f32 = 0.5;

/// Handles onto the simulated hardware behind a machine built by
/// [`Machine::simulated`].
#[derive(Debug, Clone)]
pub struct SimParts {
    pub rails: [SimRail; 4],
    pub fuser: SimThermal,
    pub ink: SimSprayer,
}

impl SimParts {
    pub fn rail(&self, id: AxisId) -> &SimRail {
        &self.rails[id.index()]
    }
}

pub struct Machine {
    cnc: Cnc,
    gcode: GCode,
    console: VecDeque<u8>,
}

impl Machine {
    pub fn new(cnc: Cnc, gcode: GCode) -> Self {
        Self {
            cnc,
            gcode,
            console: VecDeque::new(),
        }
    }

    /// Build the configured machine on simulated actuators.
    pub fn simulated(config: &Config, store: Box<dyn ProgramStore>) -> Result<(Self, SimParts), MachineError> {
        config.validate()?;

        let rails: [SimRail; 4] = std::array::from_fn(|i| {
            let axis = config.axes.all()[i];
            SimRail::new(((axis.min_mm + SIM_PARK_MM) * axis.units_per_mm).round() as i32)
        });
        let axes = AxisId::ALL.map(|id| build_axis(id, config.axes.all()[id.index()], &rails[id.index()]));

        let fuser = SimThermal::new();
        let ink = SimSprayer::new();
        let mut toolhead = ToolHead::new();
        let tools = &config.tools;
        toolhead.attach(
            tools.fuser_id,
            Box::new(FuserTool::new(fuser.heater(), fuser.sensor()).with_limits(tools.fuser_limit_min, tools.fuser_limit_max)),
        );
        toolhead.attach(tools.ink_id, Box::new(InkTool::new(ink.clone())));

        let mut cnc = Cnc::new(axes, toolhead);
        cnc.latches_mut().switch_set(Switch::OptionalStop, config.machine.optional_stop);
        cnc.status_set(Some(config.machine.name.as_str()));

        tracing::info!(
            "Assembled {} with tools T{} (fuser) and T{} (ink)",
            config.machine.name,
            tools.fuser_id,
            tools.ink_id
        );
        let parts = SimParts { rails, fuser, ink };
        Ok((Self::new(cnc, GCode::new(store)), parts))
    }

    pub fn cnc(&self) -> &Cnc {
        &self.cnc
    }

    pub fn cnc_mut(&mut self) -> &mut Cnc {
        &mut self.cnc
    }

    pub fn gcode(&self) -> &GCode {
        &self.gcode
    }

    /// Queue console bytes for the scheduler to read.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.console.extend(bytes);
    }

    /// Console bytes not yet consumed.
    pub fn console_backlog(&self) -> usize {
        self.console.len()
    }

    pub fn take_output(&mut self) -> String {
        self.gcode.take_output()
    }

    /// One control tick: axes and tools first, then the scheduler.
    /// Returns whether any axis is still in motion.
    pub fn update(&mut self, now: Duration) -> bool {
        let busy = self.cnc.update(now);
        self.gcode.update(&mut self.cnc, &mut self.console);
        busy
    }

    /// Disable all motors and stop the tool.
    pub fn stop(&mut self) {
        self.cnc.stop();
    }
}

fn build_axis(id: AxisId, config: &AxisConfig, rail: &SimRail) -> Axis {
    let geometry = AxisGeometry {
        units_per_mm: config.units_per_mm,
        min_mm: config.min_mm,
        max_mm: config.max_mm,
        velocity_max: config.velocity_max,
    };
    let actuator: Box<dyn MotionActuator> = match config.kind {
        AxisKind::Stepper => {
            let seek = (SEEK_MM * config.units_per_mm).round() as i32;
            Box::new(StepperActuator::new(rail.stepper(), seek))
        }
        AxisKind::DcEncoder => Box::new(DcEncoderActuator::new(
            rail.dc_motor(),
            rail.encoder(),
            config.pwm_min,
            config.pwm_max,
            config.overshoot,
        )),
    };
    let min_stop = if config.min_switch {
        let at = (config.min_mm * config.units_per_mm).round() as i32;
        Endstop::new(NormallyClosed::new(rail.min_switch(at)))
    } else {
        Endstop::none()
    };
    let max_stop = if config.max_switch {
        let at = (config.max_mm * config.units_per_mm).round() as i32;
        Endstop::new(NormallyClosed::new(rail.max_switch(at)))
    } else {
        Endstop::none()
    };
    Axis::new(id.letter(), geometry, actuator, min_stop, max_stop)
        .with_homing_timeout(config.homing_timeout_ms.map(Duration::from_millis))
}
