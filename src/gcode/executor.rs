// src/gcode/executor.rs - Block scheduler and command execution
use super::block::{Block, Code, UpdateMask};
use super::line::LineBuffer;
use super::parser::{ParseError, Parser, Positioning};
use super::queue::BlockQueue;
use super::{GCODE_QUEUE_MAX, InputSource};
use crate::cnc::{Button, Cnc, Switch};
use crate::motion::AxisId;
use crate::storage::ProgramStore;
use crate::tool::ToolParm;
use std::fmt::Write;
use std::time::Duration;

pub const FIRMWARE_NAME: &str = "BrundleFab";

/// Scheduler run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// M0/M1: pending blocks wait for cycle start or M24.
    Paused,
    /// M112: nothing executes until M999.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Console,
    Program,
}

/// Line assembly state for one input source. A parsed buffered block that
/// found the queue full waits in `held`, and the source is not read again
/// until it has been queued.
#[derive(Debug, Default)]
struct Reader {
    line: LineBuffer,
    held: Option<Block>,
}

impl Reader {
    fn reset(&mut self) {
        self.line.clear();
        self.held = None;
    }
}

/// The G-code front end: reads the console and the selected program,
/// parses lines into blocks, runs immediate blocks at once and feeds
/// buffered blocks to the axes one at a time.
pub struct GCode {
    parser: Parser,
    queue: BlockQueue<GCODE_QUEUE_MAX>,
    console: Reader,
    program: Reader,
    state: RunState,
    program_running: bool,
    feed: f32,
    store: Box<dyn ProgramStore>,
    output: String,
}

impl GCode {
    pub fn new(store: Box<dyn ProgramStore>) -> Self {
        Self {
            parser: Parser::new(),
            queue: BlockQueue::new(),
            console: Reader::default(),
            program: Reader::default(),
            state: RunState::Running,
            program_running: false,
            feed: 0.0,
            store,
            output: String::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == RunState::Halted
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Buffered blocks waiting behind the active one.
    pub fn pending(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn active(&self) -> Option<&Block> {
        self.queue.active()
    }

    /// Nothing queued, nothing active, no block waiting for a slot and no
    /// program streaming.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
            && self.console.held.is_none()
            && self.program.held.is_none()
            && !self.program_running
    }

    pub fn program_running(&self) -> bool {
        self.program_running
    }

    /// Feed for controlled moves, in mm/min.
    pub fn feed(&self) -> f32 {
        self.feed
    }

    /// Responses produced since the last call.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// One scheduler tick. Call after `Cnc::update` so axis busy state is
    /// current.
    pub fn update(&mut self, cnc: &mut Cnc, console: &mut dyn InputSource) {
        if self.state == RunState::Paused && cnc.latches_mut().button_take(Button::CycleStart) {
            tracing::info!("Cycle start, resuming");
            self.state = RunState::Running;
        }

        if self.state != RunState::Halted && !cnc.motion_active() {
            if self.queue.retire() {
                tracing::trace!("Active block complete");
            }
            if self.state == RunState::Running {
                if let Some(block) = self.queue.activate().cloned() {
                    tracing::debug!("Execute {}", block);
                    self.execute_buffered(&block, cnc);
                }
            }
        }

        if self.unstall(Source::Console) {
            if let Some(byte) = console.read_byte() {
                if self.console.line.push(byte) {
                    self.finish_line(Source::Console, cnc);
                }
            }
        }

        // A block parsed before M25 still gets queued; only further reads stop.
        if self.state == RunState::Running && self.unstall(Source::Program) && self.program_running {
            self.read_program(cnc);
        }
    }

    fn reader_mut(&mut self, source: Source) -> &mut Reader {
        match source {
            Source::Console => &mut self.console,
            Source::Program => &mut self.program,
        }
    }

    /// Try to queue a held block. Returns true when the source may be read.
    fn unstall(&mut self, source: Source) -> bool {
        let Some(block) = self.reader_mut(source).held.take() else {
            return true;
        };
        match self.queue.enqueue(block) {
            Ok(_) => {
                self.reply(source, "ok");
                true
            }
            Err(block) => {
                self.reader_mut(source).held = Some(block);
                false
            }
        }
    }

    fn read_program(&mut self, cnc: &mut Cnc) {
        let Some(program) = cnc.program_mut() else {
            self.program_running = false;
            return;
        };
        match program.read_byte() {
            Some(byte) => {
                if self.program.line.push(byte) {
                    self.finish_line(Source::Program, cnc);
                }
            }
            None => {
                let name = program.name().to_string();
                if self.program.line.finish() {
                    self.finish_line(Source::Program, cnc);
                }
                self.program_running = false;
                cnc.status_set(Some("Done"));
                tracing::info!("Program {} finished", name);
            }
        }
    }

    fn finish_line(&mut self, source: Source, cnc: &mut Cnc) {
        let offsets = AxisId::ALL.map(|id| cnc.offset(id));
        let line = match source {
            Source::Console => &mut self.console.line,
            Source::Program => &mut self.program.line,
        };
        let result = self.parser.parse_buffer(line, &offsets);
        line.clear();
        self.dispatch(source, result, cnc);
    }

    fn dispatch(&mut self, source: Source, result: Result<Block, ParseError>, cnc: &mut Cnc) {
        let block = match result {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("{}", e);
                self.reply(source, &format!("rs{}", e.line()));
                return;
            }
        };

        if block.code.is_none() {
            self.reply(source, "ok");
            return;
        }

        if self.state == RunState::Halted {
            if block.is(Code::M, 999) {
                self.clear_halt(cnc);
                self.reply(source, "ok");
            } else {
                self.reply(source, "!!");
            }
            return;
        }

        if block.is(Code::M, 112) {
            self.emergency_stop(cnc);
            self.reply(source, "ok");
            return;
        }

        if block.is_buffered() {
            tracing::trace!("Queue {}", block);
            match self.queue.enqueue(block) {
                Ok(_) => self.reply(source, "ok"),
                Err(block) => {
                    tracing::trace!("No free blocks, holding input");
                    self.reader_mut(source).held = Some(block);
                }
            }
        } else {
            tracing::debug!("Execute {}", block);
            let payload = self.execute_immediate(&block, cnc);
            self.reply(source, &format!("ok{}", payload));
        }
    }

    /// Replies go to the console only. Program lines are acknowledged in
    /// the log.
    fn reply(&mut self, source: Source, text: &str) {
        match source {
            Source::Console => {
                self.output.push_str(text);
                self.output.push('\n');
            }
            Source::Program => tracing::trace!("program: {}", text),
        }
    }

    fn emergency_stop(&mut self, cnc: &mut Cnc) {
        cnc.stop();
        self.state = RunState::Halted;
        self.program_running = false;
        tracing::error!("Emergency stop, {} blocks left pending", self.queue.pending_len());
    }

    fn clear_halt(&mut self, cnc: &mut Cnc) {
        self.queue.clear();
        self.console.held = None;
        self.program.reset();
        self.state = RunState::Running;
        cnc.motor_enable(true);
        tracing::info!("Halt cleared, queue flushed");
    }

    fn pause(&mut self, cnc: &mut Cnc) {
        self.state = RunState::Paused;
        cnc.toolhead_mut().stop();
        tracing::info!("Paused, waiting for cycle start");
    }

    fn execute_buffered(&mut self, block: &Block, cnc: &mut Cnc) {
        match (block.code, block.cmd) {
            (Some(Code::G), 0..=3) => self.linear_move(block, cnc),
            (Some(Code::G), 28) => home(block, cnc),
            (Some(Code::G), 29..=32) => tracing::debug!("{}: no probe fitted", block),
            (Some(Code::T), _) => tool_change(block, cnc),
            _ => {}
        }
    }

    /// G0-G3. Arcs are run as straight lines to their end point.
    fn linear_move(&mut self, block: &Block, cnc: &mut Cnc) {
        if block.has(UpdateMask::F) && block.f > 0.0 {
            self.feed = block.f;
        }

        let distance = block
            .update_mask
            .axes()
            .map(|id| {
                let value = block.axis[id.index()];
                let delta = if block.relative { value } else { value - cnc.axis(id).target_get() };
                delta * delta
            })
            .sum::<f32>()
            .sqrt();

        let time = if block.cmd == 0 || self.feed <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f32(distance / self.feed * 60.0).unwrap_or(Duration::ZERO)
        };
        tracing::debug!("Move {:.3}mm over {:?}", distance, time);

        for id in block.update_mask.axes() {
            let axis = cnc.axis_mut(id);
            if !axis.motor_enabled() {
                axis.motor_enable(true);
            }
            let value = block.axis[id.index()];
            if block.relative {
                axis.target_move(value, time);
            } else {
                axis.target_set(value, time);
            }
        }
    }

    fn execute_immediate(&mut self, block: &Block, cnc: &mut Cnc) -> String {
        let mut reply = String::new();
        let Some(code) = block.code else {
            return reply;
        };
        match (code, block.cmd) {
            (Code::G, 10) => set_tool_offset(block, cnc, &mut reply),
            (Code::G, 20) => self.parser.set_inches(true),
            (Code::G, 21) => self.parser.set_inches(false),
            (Code::G, 90) => self.parser.set_positioning(Positioning::Absolute),
            (Code::G, 91) => self.parser.set_positioning(Positioning::Relative),
            (Code::G, 92) => {
                let all = !block.update_mask.any_axis();
                for id in AxisId::ALL {
                    if all || block.update_mask.has_axis(id) {
                        let value = if all { 0.0 } else { block.axis[id.index()] };
                        cnc.position_set(id, value);
                    }
                }
            }
            (Code::M, 0) => self.pause(cnc),
            (Code::M, 1) => {
                if cnc.latches().switch_get(Switch::OptionalStop) {
                    self.pause(cnc);
                }
            }
            (Code::M, 17) => cnc.motor_enable(true),
            (Code::M, 18) => cnc.motor_disable(),
            (Code::M, 20) => self.list_files(&mut reply),
            (Code::M, 23) => self.select_file(block, cnc, &mut reply),
            (Code::M, 24) => self.start_program(cnc, &mut reply),
            (Code::M, 25) => {
                self.program_running = false;
                tracing::info!("Program paused");
            }
            (Code::M, 26) => {
                if let (true, Some(program)) = (block.has(UpdateMask::S), cnc.program_mut()) {
                    if let Err(e) = program.seek(block.s.max(0.0) as u64) {
                        let _ = write!(reply, " Error: {}", e);
                    }
                    self.program.reset();
                }
            }
            (Code::M, 27) => match cnc.program() {
                Some(program) if self.program_running => {
                    let _ = write!(reply, " SD printing byte {}/{}", program.position(), program.size());
                }
                _ => reply.push_str(" Not SD printing"),
            },
            (Code::M, 30) => self.delete_file(block, cnc, &mut reply),
            (Code::M, 32) => {
                self.select_file(block, cnc, &mut reply);
                if cnc.program().is_some() {
                    self.start_program(cnc, &mut reply);
                }
            }
            (Code::M, 36) => self.file_info(block, &mut reply),
            (Code::M, 114) => {
                let units = self.parser.units_to_mm();
                let pos = cnc.position_get_mm();
                let _ = write!(
                    reply,
                    " C: X:{:.2} Y:{:.2} Z:{:.2} E:{:.2}",
                    pos[0] / units,
                    pos[1] / units,
                    pos[2] / units,
                    pos[3] / units
                );
            }
            (Code::M, 115) => {
                let _ = write!(reply, " FIRMWARE_NAME:{}", FIRMWARE_NAME);
            }
            (Code::M, 117) => cnc.message_set(block.text()),
            (Code::M, 124) => {
                cnc.toolhead_mut().stop();
                cnc.motor_halt();
            }
            (Code::M, 999) => {}
            _ => tracing::debug!("Ignoring unsupported {}", block),
        }
        reply
    }

    fn list_files(&mut self, reply: &mut String) {
        match self.store.list() {
            Ok(files) => {
                reply.push_str("\nBegin file list");
                for file in files {
                    let _ = write!(reply, "\n{} {}", file.name, file.size);
                }
                reply.push_str("\nEnd file list");
            }
            Err(e) => {
                let _ = write!(reply, " Error: {}", e);
            }
        }
    }

    fn select_file(&mut self, block: &Block, cnc: &mut Cnc, reply: &mut String) {
        let Some(name) = block.text() else {
            reply.push_str(" Error: missing file name");
            return;
        };
        self.program_running = false;
        self.program.reset();
        match self.store.open(name) {
            Ok(file) => {
                let _ = write!(reply, " File opened: {} Size: {}\nFile selected", file.name(), file.size());
                cnc.program_set(Some(file));
            }
            Err(e) => {
                tracing::warn!("Cannot open {}: {}", name, e);
                cnc.program_set(None);
                let _ = write!(reply, " Error: {}", e);
            }
        }
    }

    /// M24 doubles as the resume command after M0/M1.
    fn start_program(&mut self, cnc: &mut Cnc, reply: &mut String) {
        let resumed = self.state == RunState::Paused;
        if resumed {
            tracing::info!("Resuming");
            self.state = RunState::Running;
        }
        match cnc.program() {
            Some(program) => {
                tracing::info!("Running program {}", program.name());
                self.program_running = true;
            }
            None if resumed => {}
            None => reply.push_str(" Error: no file selected"),
        }
    }

    fn delete_file(&mut self, block: &Block, cnc: &mut Cnc, reply: &mut String) {
        let Some(name) = block.text() else {
            reply.push_str(" Error: missing file name");
            return;
        };
        if cnc.program().is_some_and(|p| p.name() == name) {
            self.program_running = false;
            self.program.reset();
            cnc.program_set(None);
        }
        match self.store.remove(name) {
            Ok(()) => {
                let _ = write!(reply, " File deleted: {}", name);
            }
            Err(e) => {
                let _ = write!(reply, " Error: {}", e);
            }
        }
    }

    fn file_info(&mut self, block: &Block, reply: &mut String) {
        let info = block
            .text()
            .ok_or_else(|| "missing file name".to_string())
            .and_then(|name| self.store.info(name).map_err(|e| e.to_string()));
        let json = match info.and_then(|info| serde_json::to_value(info).map_err(|e| e.to_string())) {
            Ok(mut json) => {
                json["err"] = 0.into();
                json
            }
            Err(e) => {
                tracing::debug!("M36: {}", e);
                serde_json::json!({ "err": 1 })
            }
        };
        let _ = write!(reply, " {}", json);
    }
}

fn home(block: &Block, cnc: &mut Cnc) {
    let all = !block.update_mask.any_axis();
    if all {
        cnc.work_offset_clear();
    }
    for id in AxisId::ALL {
        if !(all || block.update_mask.has_axis(id)) {
            continue;
        }
        let axis = cnc.axis_mut(id);
        if !axis.motor_enabled() {
            axis.motor_enable(true);
        }
        let at = 0.0f32.clamp(axis.position_min(), axis.position_max());
        axis.home(at);
    }
}

fn tool_change(block: &Block, cnc: &mut Cnc) {
    let toolhead = cnc.toolhead_mut();
    toolhead.stop();
    match u32::try_from(block.cmd) {
        Ok(id) if toolhead.select(id) => {}
        _ => tracing::warn!("Unknown tool T{}, keeping T{}", block.cmd, toolhead.selected()),
    }
    let parms = [
        (UpdateMask::P, ToolParm::P, block.p),
        (UpdateMask::Q, ToolParm::Q, block.q),
        (UpdateMask::R, ToolParm::R, block.r),
        (UpdateMask::S, ToolParm::S, block.s),
    ];
    for (mask, parm, value) in parms {
        if block.has(mask) {
            toolhead.parm(parm, value);
        }
    }
    toolhead.start();
}

/// G10 P<tool> X Y Z
fn set_tool_offset(block: &Block, cnc: &mut Cnc, reply: &mut String) {
    let id = block.p as u32;
    let toolhead = cnc.toolhead_mut();
    let Some(mut offset) = toolhead.offset_get(id).filter(|_| block.has(UpdateMask::P) && id > 0) else {
        let _ = write!(reply, " Error: unknown tool {}", block.p);
        return;
    };
    for axis in [AxisId::X, AxisId::Y, AxisId::Z] {
        if block.update_mask.has_axis(axis) {
            offset[axis.index()] = block.axis[axis.index()];
        }
    }
    toolhead.offset_set(id, offset);
}
