// src/hardware/endstop.rs - Limit switch reporting
use std::fmt;

/// Anything that can report whether an axis limit has been reached.
pub trait EndstopSensor: Send {
    fn triggered(&self) -> bool;
}

/// Raw digital input level.
pub trait PinInput: Send {
    fn is_high(&self) -> bool;
}

/// A switch wired normally-closed to ground with a pull-up.
///
/// The pin reads low while the switch is closed. Pressing the switch opens
/// it and the pull-up drives the pin high. A broken wire or unplugged switch
/// also reads high, so a disconnected endstop reports itself as triggered.
pub struct NormallyClosed<P> {
    pin: P,
}

impl<P: PinInput> NormallyClosed<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: PinInput> EndstopSensor for NormallyClosed<P> {
    fn triggered(&self) -> bool {
        self.pin.is_high()
    }
}

/// Optional limit switch at one end of an axis.
///
/// An axis without a physical switch holds `Endstop::none()`, which is never
/// tripped.
pub struct Endstop {
    sensor: Option<Box<dyn EndstopSensor>>,
}

impl Endstop {
    pub fn new(sensor: impl EndstopSensor + 'static) -> Self {
        Self {
            sensor: Some(Box::new(sensor)),
        }
    }

    pub fn none() -> Self {
        Self { sensor: None }
    }

    pub fn is_physical(&self) -> bool {
        self.sensor.is_some()
    }

    pub fn triggered(&self) -> bool {
        self.sensor.as_ref().is_some_and(|s| s.triggered())
    }
}

impl Default for Endstop {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Endstop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endstop")
            .field("physical", &self.is_physical())
            .field("triggered", &self.triggered())
            .finish()
    }
}
