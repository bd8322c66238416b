// src/cnc.rs - Machine-level aggregation of axes, tools and operator state
use crate::motion::{AXIS_COUNT, Axis, AxisId};
use crate::storage::ProgramFile;
use crate::tool::ToolHead;
use std::time::Duration;

/// Capacity of the status and message slots, in bytes.
pub const CNC_MESSAGE_MAX: usize = 32;

/// Operator switches. These hold their state until changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    OptionalStop = 0,
}

/// Operator buttons. A press is latched until it is read once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    CycleStart = 0,
}

/// Switch levels and latched button presses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latches {
    switches: u16,
    buttons: u16,
}

impl Latches {
    pub fn switch_set(&mut self, sw: Switch, on: bool) {
        let mask = 1u16 << sw as u16;
        if on {
            self.switches |= mask;
        } else {
            self.switches &= !mask;
        }
    }

    pub fn switch_get(&self, sw: Switch) -> bool {
        self.switches & (1u16 << sw as u16) != 0
    }

    pub fn button_press(&mut self, button: Button) {
        self.buttons |= 1u16 << button as u16;
    }

    /// Test and clear. A press is reported exactly once.
    pub fn button_take(&mut self, button: Button) -> bool {
        let mask = 1u16 << button as u16;
        let pressed = self.buttons & mask != 0;
        self.buttons &= !mask;
        pressed
    }
}

type Text = heapless::String<CNC_MESSAGE_MAX>;

/// Copy as much of `text` as fits, never splitting a character.
fn fill(slot: &mut Text, text: Option<&str>) {
    slot.clear();
    for c in text.unwrap_or_default().chars() {
        if slot.push(c).is_err() {
            break;
        }
    }
}

fn non_empty(slot: &Text) -> Option<&str> {
    if slot.is_empty() { None } else { Some(slot.as_str()) }
}

pub struct Cnc {
    axes: [Axis; AXIS_COUNT],
    toolhead: ToolHead,
    work_offset: [f32; AXIS_COUNT],
    status: Text,
    message: Text,
    message_updated: bool,
    latches: Latches,
    program: Option<Box<dyn ProgramFile>>,
}

impl Cnc {
    /// `axes` must be in X, Y, Z, E order.
    pub fn new(axes: [Axis; AXIS_COUNT], toolhead: ToolHead) -> Self {
        Self {
            axes,
            toolhead,
            work_offset: [0.0; AXIS_COUNT],
            status: Text::new(),
            message: Text::new(),
            message_updated: false,
            latches: Latches::default(),
            program: None,
        }
    }

    pub fn axis(&self, id: AxisId) -> &Axis {
        &self.axes[id.index()]
    }

    pub fn axis_mut(&mut self, id: AxisId) -> &mut Axis {
        &mut self.axes[id.index()]
    }

    pub fn toolhead(&self) -> &ToolHead {
        &self.toolhead
    }

    pub fn toolhead_mut(&mut self) -> &mut ToolHead {
        &mut self.toolhead
    }

    /// True while any axis is moving or homing.
    pub fn motion_active(&self) -> bool {
        self.axes.iter().any(Axis::motor_active)
    }

    pub fn motor_enable(&mut self, enabled: bool) {
        for axis in &mut self.axes {
            axis.motor_enable(enabled);
        }
    }

    pub fn motor_disable(&mut self) {
        self.motor_enable(false);
    }

    pub fn motor_halt(&mut self) {
        for axis in &mut self.axes {
            axis.motor_halt();
        }
    }

    pub fn sleep(&mut self) {
        self.motor_halt();
        self.toolhead.stop();
    }

    pub fn stop(&mut self) {
        self.motor_disable();
        self.toolhead.stop();
    }

    /// Offset from user to machine coordinates: the G92 work offset plus the
    /// selected tool's offset on X, Y and Z.
    pub fn offset(&self, id: AxisId) -> f32 {
        let tool = match id {
            AxisId::E => 0.0,
            _ => self.toolhead.offset()[id.index()],
        };
        self.work_offset[id.index()] + tool
    }

    pub fn to_machine(&self, id: AxisId, user_mm: f32) -> f32 {
        user_mm + self.offset(id)
    }

    pub fn to_user(&self, id: AxisId, machine_mm: f32) -> f32 {
        machine_mm - self.offset(id)
    }

    /// Redefine the axis' current target as `user_mm` without moving.
    pub fn position_set(&mut self, id: AxisId, user_mm: f32) {
        let tool = self.offset(id) - self.work_offset[id.index()];
        let machine = self.axis(id).target_get();
        self.work_offset[id.index()] = machine - tool - user_mm;
        tracing::debug!("Work offset {} = {:.3}", id.letter(), self.work_offset[id.index()]);
    }

    pub fn work_offset_clear(&mut self) {
        self.work_offset = [0.0; AXIS_COUNT];
    }

    /// Targets in user coordinates.
    pub fn target_get_mm(&self) -> [f32; AXIS_COUNT] {
        AxisId::ALL.map(|id| self.to_user(id, self.axis(id).target_get()))
    }

    /// Actual positions in user coordinates.
    pub fn position_get_mm(&self) -> [f32; AXIS_COUNT] {
        AxisId::ALL.map(|id| self.to_user(id, self.axis(id).position_get()))
    }

    pub fn status_set(&mut self, status: Option<&str>) {
        fill(&mut self.status, status);
    }

    pub fn status_get(&self) -> Option<&str> {
        non_empty(&self.status)
    }

    pub fn message_set(&mut self, message: Option<&str>) {
        fill(&mut self.message, message);
        self.message_updated = true;
    }

    /// Current message and whether it changed since the last call.
    pub fn message_get(&mut self) -> (Option<&str>, bool) {
        let updated = std::mem::take(&mut self.message_updated);
        (non_empty(&self.message), updated)
    }

    pub fn latches(&self) -> &Latches {
        &self.latches
    }

    pub fn latches_mut(&mut self) -> &mut Latches {
        &mut self.latches
    }

    /// Install `program` as the current job, closing any previous one.
    pub fn program_set(&mut self, program: Option<Box<dyn ProgramFile>>) -> bool {
        self.program = program;
        match &self.program {
            Some(file) => {
                let name = file.name().to_string();
                self.status_set(None);
                self.message_set(Some(&name));
                true
            }
            None => false,
        }
    }

    pub fn program(&self) -> Option<&dyn ProgramFile> {
        self.program.as_deref()
    }

    pub fn program_mut(&mut self) -> Option<&mut (dyn ProgramFile + 'static)> {
        self.program.as_deref_mut()
    }

    /// Tick every axis in X, Y, Z, E order. Returns true while any of them
    /// is busy; the selected tool is serviced only during motion.
    pub fn update(&mut self, now: Duration) -> bool {
        let mut motion = false;
        for axis in &mut self.axes {
            motion |= axis.update(now);
        }
        if motion {
            self.toolhead.update();
        }
        motion
    }
}

impl std::fmt::Debug for Cnc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cnc")
            .field("axes", &self.axes)
            .field("tool", &self.toolhead.selected())
            .field("work_offset", &self.work_offset)
            .field("latches", &self.latches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Endstop;
    use crate::hardware::sim::{SimRail, SimSprayer};
    use crate::motion::StepperActuator;
    use crate::motion::axis::AxisGeometry;
    use crate::storage::{MemoryStore, ProgramStore};
    use crate::tool::{InkTool, NullTool};

    fn axis(name: char) -> Axis {
        let rail = SimRail::new(0);
        let geometry = AxisGeometry {
            units_per_mm: 1.0,
            min_mm: 0.0,
            max_mm: 100.0,
            velocity_max: 60_000.0,
        };
        let act = StepperActuator::new(rail.stepper(), 1);
        Axis::new(name, geometry, Box::new(act), Endstop::none(), Endstop::none())
    }

    fn cnc() -> Cnc {
        Cnc::new([axis('X'), axis('Y'), axis('Z'), axis('E')], ToolHead::new())
    }

    #[test]
    fn buttons_are_one_shot_switches_are_not() {
        let mut latches = Latches::default();
        latches.button_press(Button::CycleStart);
        assert!(latches.button_take(Button::CycleStart));
        assert!(!latches.button_take(Button::CycleStart));

        latches.switch_set(Switch::OptionalStop, true);
        assert!(latches.switch_get(Switch::OptionalStop));
        assert!(latches.switch_get(Switch::OptionalStop));
        latches.switch_set(Switch::OptionalStop, false);
        assert!(!latches.switch_get(Switch::OptionalStop));
    }

    #[test]
    fn message_dirty_flag_clears_on_read() {
        let mut cnc = cnc();
        assert_eq!(cnc.message_get(), (None, false));
        cnc.message_set(Some("hello"));
        assert_eq!(cnc.message_get(), (Some("hello"), true));
        assert_eq!(cnc.message_get(), (Some("hello"), false));
    }

    #[test]
    fn long_messages_are_truncated() {
        let mut cnc = cnc();
        cnc.status_set(Some(&"x".repeat(100)));
        assert_eq!(cnc.status_get().map(str::len), Some(CNC_MESSAGE_MAX));
    }

    #[test]
    fn work_offset_shifts_user_coordinates() {
        let mut cnc = cnc();
        cnc.motor_enable(true);
        cnc.axis_mut(AxisId::X).target_set(30.0, Duration::ZERO);
        cnc.position_set(AxisId::X, 0.0);
        assert_eq!(cnc.to_machine(AxisId::X, 5.0), 35.0);
        assert_eq!(cnc.target_get_mm()[0], 0.0);
    }

    #[test]
    fn tool_offset_applies_to_xyz_only() {
        let mut cnc = cnc();
        cnc.toolhead_mut().attach(1, Box::new(NullTool::default()));
        cnc.toolhead_mut().offset_set(1, [1.0, 2.0, 3.0]);
        cnc.toolhead_mut().select(1);
        assert_eq!(cnc.to_machine(AxisId::Y, 0.0), 2.0);
        assert_eq!(cnc.to_machine(AxisId::E, 0.0), 0.0);
    }

    #[test]
    fn update_services_tool_only_during_motion() {
        let sprayer = SimSprayer::new();
        let mut cnc = cnc();
        cnc.toolhead_mut().attach(1, Box::new(InkTool::new(sprayer.clone())));
        cnc.toolhead_mut().select(1);
        cnc.toolhead_mut().start();
        cnc.motor_enable(true);

        assert!(!cnc.update(Duration::ZERO));
        assert_eq!(sprayer.shots(), 0);

        cnc.axis_mut(AxisId::X).target_set(3.0, Duration::ZERO);
        let mut now = Duration::ZERO;
        while cnc.update(now) {
            now += Duration::from_millis(1);
        }
        assert!(sprayer.shots() > 0);
        assert_eq!(cnc.position_get_mm()[0], 3.0);
    }

    #[test]
    fn stop_disables_and_stops_tool() {
        let mut cnc = cnc();
        cnc.motor_enable(true);
        cnc.toolhead_mut().start();
        cnc.stop();
        assert!(!cnc.toolhead().active());
        assert!(!cnc.axis(AxisId::Z).motor_enabled());
    }

    #[test]
    fn program_set_posts_name() {
        let store = MemoryStore::new().with("job.gco", "M115\n");
        let mut cnc = cnc();
        assert!(cnc.program_set(Some(store.open("job.gco").unwrap())));
        assert_eq!(cnc.message_get(), (Some("job.gco"), true));
        assert_eq!(cnc.program().map(|p| p.size()), Some(5));
        assert!(!cnc.program_set(None));
    }
}
