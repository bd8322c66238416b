// src/hardware/sim.rs - In-process hardware stand-ins
//
// A `SimRail` is one physical carriage. Motors move it and limit switches
// watch it, so an axis wired to simulated parts sees its endstop trip once it
// has actually driven far enough.
use super::thermistor::celsius_to_adc;
use super::{DcMotorDriver, Encoder, HeaterOutput, InkSprayer, MotorRun, PinInput, StepperDriver, TemperatureInput};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Physical carriage position in device units.
#[derive(Debug, Clone, Default)]
pub struct SimRail {
    position: Arc<AtomicI32>,
}

impl SimRail {
    pub fn new(start: i32) -> Self {
        Self {
            position: Arc::new(AtomicI32::new(start)),
        }
    }

    pub fn position(&self) -> i32 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: i32) {
        self.position.store(position, Ordering::SeqCst);
    }

    fn shift(&self, delta: i32) {
        self.position.fetch_add(delta, Ordering::SeqCst);
    }

    /// Switch that opens once the carriage is at or below `at`.
    pub fn min_switch(&self, at: i32) -> SimLimit {
        SimLimit {
            rail: self.clone(),
            at,
            side: LimitSide::Min,
        }
    }

    /// Switch that opens once the carriage is at or above `at`.
    pub fn max_switch(&self, at: i32) -> SimLimit {
        SimLimit {
            rail: self.clone(),
            at,
            side: LimitSide::Max,
        }
    }

    pub fn stepper(&self) -> SimStepper {
        SimStepper {
            rail: self.clone(),
            enabled: false,
        }
    }

    pub fn dc_motor(&self) -> SimDcMotor {
        SimDcMotor {
            rail: self.clone(),
            speed: 0,
        }
    }

    pub fn encoder(&self) -> SimEncoder {
        SimEncoder {
            rail: self.clone(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LimitSide {
    Min,
    Max,
}

/// Limit switch pin level. High means the switch is open (pressed).
#[derive(Debug, Clone)]
pub struct SimLimit {
    rail: SimRail,
    at: i32,
    side: LimitSide,
}

impl PinInput for SimLimit {
    fn is_high(&self) -> bool {
        let pos = self.rail.position();
        match self.side {
            LimitSide::Min => pos <= self.at,
            LimitSide::Max => pos >= self.at,
        }
    }
}

/// Stepper that moves the rail one unit per step while energized.
#[derive(Debug, Clone)]
pub struct SimStepper {
    rail: SimRail,
    enabled: bool,
}

impl StepperDriver for SimStepper {
    fn step(&mut self, count: i32) -> i32 {
        if !self.enabled {
            return 0;
        }
        self.rail.shift(count);
        count
    }

    fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// DC motor. Every drive command moves the rail by an amount that grows
/// with the PWM duty.
#[derive(Debug, Clone)]
pub struct SimDcMotor {
    rail: SimRail,
    speed: u8,
}

impl DcMotorDriver for SimDcMotor {
    fn run(&mut self, command: MotorRun) {
        let travel = 1 + i32::from(self.speed) / 64;
        match command {
            MotorRun::Forward => self.rail.shift(travel),
            MotorRun::Backward => self.rail.shift(-travel),
            MotorRun::Brake | MotorRun::Release => {}
        }
    }

    fn set_speed(&mut self, pwm: u8) {
        self.speed = pwm;
    }
}

/// Encoder counting rail travel, with a writable zero point.
#[derive(Debug, Clone)]
pub struct SimEncoder {
    rail: SimRail,
    offset: i32,
}

impl Encoder for SimEncoder {
    fn read(&self) -> i32 {
        self.rail.position() + self.offset
    }

    fn write(&mut self, value: i32) {
        self.offset = value - self.rail.position();
    }
}

const AMBIENT_MILLI_C: i32 = 25_000;

/// Heater block with a crude first-order thermal response. Each sensor
/// read advances the model by one step.
#[derive(Debug, Clone)]
pub struct SimThermal {
    milli_celsius: Arc<AtomicI32>,
    heating: Arc<AtomicBool>,
    rise: i32,
    fall: i32,
}

impl SimThermal {
    pub fn new() -> Self {
        Self {
            milli_celsius: Arc::new(AtomicI32::new(AMBIENT_MILLI_C)),
            heating: Arc::new(AtomicBool::new(false)),
            rise: 500,
            fall: 200,
        }
    }

    pub fn celsius(&self) -> f32 {
        self.milli_celsius.load(Ordering::SeqCst) as f32 / 1000.0
    }

    pub fn set_celsius(&self, celsius: f32) {
        self.milli_celsius.store((celsius * 1000.0) as i32, Ordering::SeqCst);
    }

    pub fn heating(&self) -> bool {
        self.heating.load(Ordering::SeqCst)
    }

    pub fn heater(&self) -> SimHeater {
        SimHeater { plant: self.clone() }
    }

    pub fn sensor(&self) -> SimThermistor {
        SimThermistor { plant: self.clone() }
    }
}

impl Default for SimThermal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SimHeater {
    plant: SimThermal,
}

impl HeaterOutput for SimHeater {
    fn set(&mut self, on: bool) {
        self.plant.heating.store(on, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct SimThermistor {
    plant: SimThermal,
}

impl TemperatureInput for SimThermistor {
    fn read_adc(&mut self) -> u16 {
        let plant = &self.plant;
        let current = plant.milli_celsius.load(Ordering::SeqCst);
        let next = if plant.heating() {
            current + plant.rise
        } else {
            (current - plant.fall).max(AMBIENT_MILLI_C)
        };
        plant.milli_celsius.store(next, Ordering::SeqCst);
        celsius_to_adc((next / 1000) as i16)
    }
}

/// Ink head that records what it was asked to fire.
#[derive(Debug, Clone, Default)]
pub struct SimSprayer {
    shots: Arc<AtomicU32>,
    last_mask: Arc<AtomicU32>,
}

impl SimSprayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shots(&self) -> u32 {
        self.shots.load(Ordering::SeqCst)
    }

    pub fn last_mask(&self) -> u16 {
        self.last_mask.load(Ordering::SeqCst) as u16
    }
}

impl InkSprayer for SimSprayer {
    fn spray(&mut self, mask: u16) {
        self.shots.fetch_add(1, Ordering::SeqCst);
        self.last_mask.store(u32::from(mask), Ordering::SeqCst);
    }
}
