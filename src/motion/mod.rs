// src/motion/mod.rs - Per-axis motion control
pub mod actuator;
pub mod axis;

pub use actuator::{DcEncoderActuator, MotionActuator, StepperActuator};
pub use axis::{Axis, AxisGeometry, AxisMode};

/// Number of controlled axes.
pub const AXIS_COUNT: usize = 4;

/// The four degrees of freedom, in update order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    X = 0,
    Y = 1,
    Z = 2,
    E = 3,
}

impl AxisId {
    pub const ALL: [AxisId; AXIS_COUNT] = [AxisId::X, AxisId::Y, AxisId::Z, AxisId::E];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn letter(self) -> char {
        match self {
            AxisId::X => 'X',
            AxisId::Y => 'Y',
            AxisId::Z => 'Z',
            AxisId::E => 'E',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'X' => Some(AxisId::X),
            'Y' => Some(AxisId::Y),
            'Z' => Some(AxisId::Z),
            'E' => Some(AxisId::E),
            _ => None,
        }
    }
}
