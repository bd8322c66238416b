// src/gcode/mod.rs - Line assembly, parsing and block scheduling
pub mod block;
pub mod executor;
pub mod line;
pub mod parser;
pub mod queue;

pub use block::{Block, Code, UpdateMask};
pub use executor::{FIRMWARE_NAME, GCode, RunState};
pub use line::LineBuffer;
pub use parser::{ParseError, Parser, Positioning, checksum};
pub use queue::{BlockId, BlockQueue};

use std::collections::VecDeque;

/// Longest accepted line, excluding the terminator.
pub const GCODE_LINE_MAX: usize = 128;
/// Block slots shared by the pending FIFO and the active block.
pub const GCODE_QUEUE_MAX: usize = 4;

/// Non-blocking byte source for the command stream.
pub trait InputSource {
    fn read_byte(&mut self) -> Option<u8>;
}

impl InputSource for VecDeque<u8> {
    fn read_byte(&mut self) -> Option<u8> {
        self.pop_front()
    }
}
