// src/hardware/mod.rs - Capability interfaces the motion core drives
//
// Everything below the axis and tool layer is reached through these traits.
// Real boards provide pin, PWM and timer backed implementations; `sim`
// provides in-process stand-ins for the host binary and the test suite.
pub mod endstop;
pub mod sim;
pub mod thermistor;

use std::time::{Duration, Instant};

pub use endstop::{Endstop, EndstopSensor, NormallyClosed, PinInput};

/// Direction of travel along an axis, in device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Direction that reduces `delta` toward zero when stepping from the origin.
    pub fn toward(delta: i32) -> Self {
        if delta < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Drive command for a brushed DC motor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorRun {
    Forward,
    Backward,
    Brake,
    Release,
}

impl From<Direction> for MotorRun {
    fn from(dir: Direction) -> Self {
        match dir {
            Direction::Forward => MotorRun::Forward,
            Direction::Backward => MotorRun::Backward,
        }
    }
}

/// Pulse-driven stepper channel.
pub trait StepperDriver: Send {
    /// Issue `count` signed steps. Returns the number of steps actually taken.
    fn step(&mut self, count: i32) -> i32;
    fn enable(&mut self, enabled: bool);
}

/// PWM + direction DC motor channel.
pub trait DcMotorDriver: Send {
    fn run(&mut self, command: MotorRun);
    fn set_speed(&mut self, pwm: u8);
}

/// Quadrature encoder counter.
pub trait Encoder: Send {
    fn read(&self) -> i32;
    fn write(&mut self, value: i32);
}

/// On/off heater element.
pub trait HeaterOutput: Send {
    fn set(&mut self, on: bool);
}

/// Raw 10-bit ADC reading from a thermistor divider.
pub trait TemperatureInput: Send {
    fn read_adc(&mut self) -> u16;
}

/// Ink cartridge nozzle driver. Each set bit in `mask` fires one nozzle.
pub trait InkSprayer: Send {
    fn spray(&mut self, mask: u16);
}

/// Monotonic time source. The value is the time elapsed since boot.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Host clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { boot: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.boot.elapsed()
    }
}
