// src/motion/actuator.rs - Drive strategies behind an Axis
use crate::hardware::{DcMotorDriver, Direction, Encoder, MotorRun, StepperDriver};

/// What an `Axis` needs from the motor that moves it.
///
/// Positions are device units (microsteps or encoder counts). An actuator
/// either integrates its own moves (steppers) or reports a measured position
/// through `readback` (encoder feedback).
pub trait MotionActuator: Send {
    /// Measured position, if the hardware can report one.
    fn readback(&self) -> Option<i32> {
        None
    }

    /// Overwrite the measured position counter.
    fn preset(&mut self, _position: i32) {}

    /// Make one move from `position` toward `target`. Returns the device
    /// units moved, or 0 when the result is only visible through `readback`.
    fn advance(&mut self, position: i32, target: i32) -> i32;

    /// One homing action toward the switch on the `toward` side.
    fn seek(&mut self, toward: Direction);

    /// Called when backing off a switch begins.
    fn release_begin(&mut self) {}

    /// One backoff action away from a still-pressed switch.
    fn release(&mut self, away: Direction);

    /// Stop driving the motor.
    fn halt(&mut self);

    fn enable(&mut self, enabled: bool);

    /// Settle ticks after reaching a target.
    fn overshoot(&self) -> u32 {
        0
    }
}

/// Step/direction driver with step-integrated position.
pub struct StepperActuator {
    driver: Box<dyn StepperDriver>,
    seek_steps: i32,
}

impl StepperActuator {
    /// `seek_steps` is the size of each homing stride toward the switch.
    pub fn new(driver: impl StepperDriver + 'static, seek_steps: i32) -> Self {
        Self {
            driver: Box::new(driver),
            seek_steps: seek_steps.max(1),
        }
    }
}

impl MotionActuator for StepperActuator {
    fn advance(&mut self, position: i32, target: i32) -> i32 {
        let delta = (target - position).signum();
        if delta == 0 {
            return 0;
        }
        self.driver.step(delta)
    }

    fn seek(&mut self, toward: Direction) {
        self.driver.step(toward.sign() * self.seek_steps);
    }

    fn release(&mut self, away: Direction) {
        self.driver.step(away.sign());
    }

    fn halt(&mut self) {}

    fn enable(&mut self, enabled: bool) {
        self.driver.enable(enabled);
    }
}

/// Distance (in encoder counts) beyond which the DC motor runs flat out.
const DC_FULL_SPEED_DISTANCE: i32 = 50;

/// Brushed DC motor with quadrature encoder feedback.
pub struct DcEncoderActuator {
    motor: Box<dyn DcMotorDriver>,
    encoder: Box<dyn Encoder>,
    pwm_min: u8,
    pwm_max: u8,
    overshoot: u32,
    backoff_pwm: u8,
}

impl DcEncoderActuator {
    pub fn new(
        motor: impl DcMotorDriver + 'static,
        encoder: impl Encoder + 'static,
        pwm_min: u8,
        pwm_max: u8,
        overshoot: u32,
    ) -> Self {
        Self {
            motor: Box::new(motor),
            encoder: Box::new(encoder),
            pwm_min,
            pwm_max: pwm_max.max(pwm_min),
            overshoot,
            backoff_pwm: pwm_min,
        }
    }

    /// Duty for a move with `distance` counts left to go.
    fn pwm_for(&self, distance: i32) -> u8 {
        if distance > DC_FULL_SPEED_DISTANCE {
            self.pwm_max
        } else {
            let pwm = i32::from(self.pwm_min) + distance;
            pwm.min(i32::from(self.pwm_max)) as u8
        }
    }
}

impl MotionActuator for DcEncoderActuator {
    fn readback(&self) -> Option<i32> {
        Some(self.encoder.read())
    }

    fn preset(&mut self, position: i32) {
        self.encoder.write(position);
    }

    fn advance(&mut self, position: i32, target: i32) -> i32 {
        let delta = target - position;
        if delta == 0 {
            self.motor.run(MotorRun::Brake);
            return 0;
        }
        self.motor.set_speed(self.pwm_for(delta.abs()));
        self.motor.run(Direction::toward(delta).into());
        0
    }

    fn seek(&mut self, toward: Direction) {
        self.motor.set_speed(self.pwm_max);
        self.motor.run(toward.into());
    }

    fn release_begin(&mut self) {
        self.backoff_pwm = self.pwm_min;
    }

    fn release(&mut self, away: Direction) {
        self.motor.set_speed(self.backoff_pwm);
        self.motor.run(away.into());
        if self.backoff_pwm < self.pwm_max {
            self.backoff_pwm += 1;
        }
    }

    fn halt(&mut self) {
        self.motor.run(MotorRun::Brake);
    }

    fn enable(&mut self, enabled: bool) {
        if !enabled {
            self.motor.run(MotorRun::Release);
        }
    }

    fn overshoot(&self) -> u32 {
        self.overshoot
    }
}
