// src/gcode/block.rs - One parsed command
use super::GCODE_LINE_MAX;
use crate::motion::{AXIS_COUNT, AxisId};

/// Command letter of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    G,
    M,
    T,
}

impl Code {
    pub fn from_letter(c: u8) -> Option<Self> {
        match c.to_ascii_uppercase() {
            b'G' => Some(Code::G),
            b'M' => Some(Code::M),
            b'T' => Some(Code::T),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Code::G => 'G',
            Code::M => 'M',
            Code::T => 'T',
        }
    }
}

/// Which optional words were present on the line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateMask(u16);

impl UpdateMask {
    pub const X: Self = Self(1 << 0);
    pub const Y: Self = Self(1 << 1);
    pub const Z: Self = Self(1 << 2);
    pub const E: Self = Self(1 << 3);
    pub const F: Self = Self(1 << 4);
    pub const I: Self = Self(1 << 5);
    pub const J: Self = Self(1 << 6);
    pub const K: Self = Self(1 << 7);
    pub const P: Self = Self(1 << 8);
    pub const Q: Self = Self(1 << 9);
    pub const R: Self = Self(1 << 10);
    pub const S: Self = Self(1 << 11);
    pub const STRING: Self = Self(1 << 12);

    const AXES: u16 = 0b1111;

    pub fn axis(id: AxisId) -> Self {
        Self(1 << id.index())
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn has_axis(self, id: AxisId) -> bool {
        self.contains(Self::axis(id))
    }

    pub fn any_axis(self) -> bool {
        self.0 & Self::AXES != 0
    }

    /// Axes present on the line, in X, Y, Z, E order.
    pub fn axes(self) -> impl Iterator<Item = AxisId> {
        AxisId::ALL.into_iter().filter(move |id| self.has_axis(*id))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub code: Option<Code>,
    pub cmd: i32,
    pub num: Option<i32>,
    pub update_mask: UpdateMask,
    /// Axis words in millimetres. Absolute moves are already in machine
    /// coordinates.
    pub axis: [f32; AXIS_COUNT],
    /// True when the axis words are deltas.
    pub relative: bool,
    pub f: f32,
    pub i: f32,
    pub j: f32,
    pub k: f32,
    pub p: f32,
    pub q: f32,
    pub r: f32,
    pub s: f32,
    pub string: heapless::String<GCODE_LINE_MAX>,
}

impl Block {
    pub fn is(&self, code: Code, cmd: i32) -> bool {
        self.code == Some(code) && self.cmd == cmd
    }

    /// Motion and tool change blocks wait for earlier motion to finish.
    /// Everything else runs as soon as it is parsed.
    pub fn is_buffered(&self) -> bool {
        match self.code {
            Some(Code::T) => true,
            Some(Code::G) => matches!(self.cmd, 0..=3 | 28..=32),
            _ => false,
        }
    }

    pub fn has(&self, mask: UpdateMask) -> bool {
        self.update_mask.contains(mask)
    }

    pub fn text(&self) -> Option<&str> {
        if self.has(UpdateMask::STRING) && !self.string.is_empty() {
            Some(self.string.as_str())
        } else {
            None
        }
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}{}", code.letter(), self.cmd)?,
            None => write!(f, "(empty)")?,
        }
        for id in self.update_mask.axes() {
            write!(f, " {}{:.3}", id.letter(), self.axis[id.index()])?;
        }
        if self.has(UpdateMask::F) {
            write!(f, " F{}", self.f)?;
        }
        if let Some(text) = self.text() {
            write!(f, " {}", text)?;
        }
        Ok(())
    }
}
