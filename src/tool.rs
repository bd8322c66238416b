// src/tool.rs - Process tools (fuser, ink head) and the tool changer
use crate::hardware::thermistor::adc_to_celsius;
use crate::hardware::{HeaterOutput, InkSprayer, TemperatureInput};

/// Highest number of attachable tools, not counting the null tool.
pub const TOOL_MAX: usize = 16;
/// Id of the always-present tool that does nothing.
pub const TOOL_NONE: u32 = 0;

/// Tool parameter selected by the P/Q/R/S words of a tool change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolParm {
    P,
    Q,
    R,
    S,
}

pub trait Tool: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn active(&self) -> bool;

    fn parm(&mut self, _parm: ToolParm, _value: f32) {}

    /// Called while the machine is moving. Returns whether the tool is active.
    fn update(&mut self) -> bool {
        self.active()
    }
}

#[derive(Debug, Default)]
pub struct NullTool {
    active: bool,
}

impl Tool for NullTool {
    fn start(&mut self) {
        self.active = true;
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn active(&self) -> bool {
        self.active
    }
}

/// Minimum gap kept between the fuser's lower and upper limits.
const FUSER_BAND: i16 = 5;

/// Highest setpoint the fuser accepts. Requests above it are clamped.
const FUSER_CELSIUS_MAX: f32 = 400.0;

/// Toner fuser: a heater with bang-bang control between two limits.
pub struct FuserTool {
    heater: Box<dyn HeaterOutput>,
    sensor: Box<dyn TemperatureInput>,
    limit_min: i16,
    limit_max: i16,
    active: bool,
    celsius: Option<i16>,
}

impl FuserTool {
    pub fn new(heater: impl HeaterOutput + 'static, sensor: impl TemperatureInput + 'static) -> Self {
        let mut heater: Box<dyn HeaterOutput> = Box::new(heater);
        heater.set(false);
        Self {
            heater,
            sensor: Box::new(sensor),
            limit_min: 170,
            limit_max: 180,
            active: false,
            celsius: None,
        }
    }

    pub fn with_limits(mut self, min: i16, max: i16) -> Self {
        self.parm(ToolParm::P, f32::from(max));
        self.parm(ToolParm::Q, f32::from(min));
        self
    }

    pub fn limits(&self) -> (i16, i16) {
        (self.limit_min, self.limit_max)
    }

    /// Last temperature read by `update`.
    pub fn celsius(&self) -> Option<i16> {
        self.celsius
    }
}

impl Tool for FuserTool {
    fn start(&mut self) {
        self.heater.set(true);
        self.active = true;
    }

    fn stop(&mut self) {
        self.heater.set(false);
        self.active = false;
    }

    fn active(&self) -> bool {
        self.active
    }

    /// P sets the upper limit, Q the lower one.
    fn parm(&mut self, parm: ToolParm, value: f32) {
        let value = value.clamp(0.0, FUSER_CELSIUS_MAX) as i16;
        match parm {
            ToolParm::P => {
                self.limit_max = value;
                if self.limit_max < self.limit_min {
                    self.limit_min = self.limit_max.saturating_sub(FUSER_BAND);
                }
            }
            ToolParm::Q => {
                self.limit_min = value;
                if self.limit_min > self.limit_max {
                    self.limit_max = self.limit_min.saturating_add(FUSER_BAND);
                }
            }
            ToolParm::R | ToolParm::S => {}
        }
    }

    fn update(&mut self) -> bool {
        let adc = self.sensor.read_adc();
        self.celsius = adc_to_celsius(adc);
        if !self.active {
            return false;
        }
        match self.celsius {
            None => {
                tracing::warn!("Fuser thermistor out of range (adc {}), heater off", adc);
                self.heater.set(false);
            }
            Some(c) if c > self.limit_max => self.heater.set(false),
            Some(c) if c < self.limit_min => self.heater.set(true),
            Some(_) => {}
        }
        true
    }
}

/// Inkjet cartridge firing a fixed nozzle pattern while active.
pub struct InkTool {
    sprayer: Box<dyn InkSprayer>,
    pattern: u16,
    active: bool,
}

impl InkTool {
    pub fn new(sprayer: impl InkSprayer + 'static) -> Self {
        Self {
            sprayer: Box::new(sprayer),
            pattern: 0,
            active: false,
        }
    }

    pub fn pattern(&self) -> u16 {
        self.pattern
    }
}

impl Tool for InkTool {
    fn start(&mut self) {
        self.active = true;
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn active(&self) -> bool {
        self.active
    }

    fn parm(&mut self, parm: ToolParm, value: f32) {
        if parm == ToolParm::P {
            self.pattern = value as u16;
        }
    }

    fn update(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.sprayer.spray(self.pattern);
        true
    }
}

struct ToolSlot {
    id: u32,
    tool: Box<dyn Tool>,
    offset: [f32; 3],
}

/// Tool changer. Keeps the attached tools by id, the current selection,
/// and a per-tool XYZ offset. Tool 0 is a built-in null tool with no offset.
pub struct ToolHead {
    null: NullTool,
    slots: heapless::Vec<ToolSlot, TOOL_MAX>,
    selected: Option<usize>,
}

impl ToolHead {
    pub fn new() -> Self {
        Self {
            null: NullTool::default(),
            slots: heapless::Vec::new(),
            selected: None,
        }
    }

    /// Attach `tool` under `id`, replacing any tool already there.
    /// Returns false for id 0 or when the table is full.
    pub fn attach(&mut self, id: u32, tool: Box<dyn Tool>) -> bool {
        if id == TOOL_NONE {
            return false;
        }
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.tool = tool;
            return true;
        }
        let slot = ToolSlot {
            id,
            tool,
            offset: [0.0; 3],
        };
        match self.slots.push(slot) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("Tool table full, cannot attach tool {}", id);
                false
            }
        }
    }

    /// Switch to tool `id`. Unknown ids leave the selection unchanged.
    pub fn select(&mut self, id: u32) -> bool {
        if id == TOOL_NONE {
            self.selected = None;
            return true;
        }
        match self.slots.iter().position(|s| s.id == id) {
            Some(index) => {
                self.selected = Some(index);
                tracing::debug!("Selected tool {}", id);
                true
            }
            None => false,
        }
    }

    pub fn selected(&self) -> u32 {
        self.selected.map_or(TOOL_NONE, |i| self.slots[i].id)
    }

    pub fn start(&mut self) {
        self.current().start();
    }

    pub fn stop(&mut self) {
        self.current().stop();
    }

    pub fn active(&self) -> bool {
        match self.selected {
            Some(i) => self.slots[i].tool.active(),
            None => self.null.active(),
        }
    }

    pub fn update(&mut self) -> bool {
        self.current().update()
    }

    pub fn parm(&mut self, parm: ToolParm, value: f32) {
        self.current().parm(parm, value);
    }

    pub fn offset_set(&mut self, id: u32, offset: [f32; 3]) -> bool {
        match self.slots.iter_mut().find(|s| s.id == id) {
            Some(slot) => {
                slot.offset = offset;
                true
            }
            None => false,
        }
    }

    pub fn offset_get(&self, id: u32) -> Option<[f32; 3]> {
        if id == TOOL_NONE {
            return Some([0.0; 3]);
        }
        self.slots.iter().find(|s| s.id == id).map(|s| s.offset)
    }

    /// Offset of the selected tool.
    pub fn offset(&self) -> [f32; 3] {
        self.selected.map_or([0.0; 3], |i| self.slots[i].offset)
    }

    fn current(&mut self) -> &mut dyn Tool {
        match self.selected {
            Some(i) => self.slots[i].tool.as_mut(),
            None => &mut self.null,
        }
    }
}

impl Default for ToolHead {
    fn default() -> Self {
        Self::new()
    }
}
