// src/motion/axis.rs - Homing and motion state machine for one degree of freedom
use super::actuator::MotionActuator;
use crate::hardware::{Direction, Endstop};
use std::time::Duration;

/// Settle time after a homing switch first reads triggered.
const HOMING_QUIESCE: Duration = Duration::from_millis(1);
/// Interval between backoff actions while the switch is still pressed.
const HOMING_BACKOFF: Duration = Duration::from_millis(10);
/// Interval between overshoot settle ticks.
const OVERSHOOT_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisMode {
    Idle,
    Homing,
    HomingQuiesce,
    HomingBackoff,
    Moving,
    MovingOvershoot,
}

/// Static description of an axis: scale, travel and speed limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisGeometry {
    /// Device units (microsteps or encoder counts) per millimetre.
    pub units_per_mm: f32,
    pub min_mm: f32,
    pub max_mm: f32,
    /// Maximum feed in mm/min.
    pub velocity_max: f32,
}

pub struct Axis {
    name: char,
    actuator: Box<dyn MotionActuator>,
    min_stop: Endstop,
    max_stop: Endstop,
    units_per_mm: f32,
    min: i32,
    max: i32,
    velocity_max: f32,
    velocity: f32,
    step_delay: Duration,
    target: i32,
    position: i32,
    mode: AxisMode,
    enabled: bool,
    valid: bool,
    timeout: Duration,
    overshoot_left: u32,
    home_toward: Direction,
    homing_started: Option<Duration>,
    homing_timeout: Option<Duration>,
}

impl Axis {
    pub fn new(
        name: char,
        geometry: AxisGeometry,
        actuator: Box<dyn MotionActuator>,
        min_stop: Endstop,
        max_stop: Endstop,
    ) -> Self {
        let units_per_mm = geometry.units_per_mm;
        let velocity_max = geometry.velocity_max.max(1.0);
        let mut axis = Self {
            name,
            actuator,
            min_stop,
            max_stop,
            units_per_mm,
            min: (geometry.min_mm * units_per_mm).round() as i32,
            max: (geometry.max_mm * units_per_mm).round() as i32,
            velocity_max,
            velocity: velocity_max,
            step_delay: Duration::ZERO,
            target: 0,
            position: 0,
            mode: AxisMode::Idle,
            enabled: false,
            valid: false,
            timeout: Duration::ZERO,
            overshoot_left: 0,
            home_toward: Direction::Backward,
            homing_started: None,
            homing_timeout: None,
        };
        axis.step_delay = axis.delay_for(velocity_max);
        axis
    }

    /// Give up on homing after `timeout` instead of waiting forever.
    pub fn with_homing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.homing_timeout = timeout;
        self
    }

    pub fn name(&self) -> char {
        self.name
    }

    pub fn mode(&self) -> AxisMode {
        self.mode
    }

    pub fn motor_active(&self) -> bool {
        self.mode != AxisMode::Idle
    }

    pub fn motor_enabled(&self) -> bool {
        self.enabled
    }

    pub fn position_valid(&self) -> bool {
        self.valid
    }

    pub fn units_per_mm(&self) -> f32 {
        self.units_per_mm
    }

    pub fn position_min(&self) -> f32 {
        self.to_mm(self.min)
    }

    pub fn position_max(&self) -> f32 {
        self.to_mm(self.max)
    }

    pub fn target_get(&self) -> f32 {
        self.to_mm(self.target)
    }

    pub fn position_get(&self) -> f32 {
        self.to_mm(self.position)
    }

    /// Current position in device units.
    pub fn position_units(&self) -> i32 {
        self.position
    }

    /// Feed the last move was planned at, in mm/min.
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn min_stop(&self) -> &Endstop {
        &self.min_stop
    }

    pub fn max_stop(&self) -> &Endstop {
        &self.max_stop
    }

    /// Set an absolute target in millimetres. A non-zero `time` plans the
    /// feed so the move takes that long.
    pub fn target_set(&mut self, mm: f32, time: Duration) {
        let target = self.to_units(mm);
        if !time.is_zero() {
            let distance = (mm - self.position_get()).abs();
            let minutes = time.as_secs_f32() / 60.0;
            self.set_velocity(distance / minutes);
        } else {
            self.set_velocity(self.velocity_max);
        }
        self.target = target;
    }

    /// Move relative to the current target.
    pub fn target_move(&mut self, delta_mm: f32, time: Duration) {
        let mm = self.target_get() + delta_mm;
        self.target_set(mm, time);
    }

    /// Declare the current position to be `mm` without moving.
    pub fn position_set(&mut self, mm: f32) {
        let units = self.to_units(mm);
        self.position = units;
        self.target = units;
        self.actuator.preset(units);
        self.valid = true;
    }

    /// Start homing. With no limit switch fitted the axis simply adopts
    /// `mm` as its position.
    pub fn home(&mut self, mm: f32) {
        self.homing_started = None;
        if self.min_stop.is_physical() {
            self.home_toward = Direction::Backward;
        } else if self.max_stop.is_physical() {
            self.home_toward = Direction::Forward;
        } else {
            self.position_set(mm);
            self.mode = AxisMode::Idle;
            tracing::debug!("Axis {} has no switch, homed in place at {:.3}mm", self.name, mm);
            return;
        }
        self.valid = false;
        self.mode = AxisMode::Homing;
        tracing::debug!("Axis {} homing toward {:?}", self.name, self.home_toward);
    }

    pub fn motor_enable(&mut self, enabled: bool) {
        if !enabled {
            self.motor_halt();
            self.valid = false;
        } else if !self.enabled {
            // Energize holding the current position.
            if let Some(pos) = self.actuator.readback() {
                self.position = pos;
            }
            self.target = self.position;
        }
        self.actuator.enable(enabled);
        self.enabled = enabled;
    }

    /// Stop where we are.
    pub fn motor_halt(&mut self) {
        self.actuator.halt();
        if let Some(pos) = self.actuator.readback() {
            self.position = pos;
        }
        self.target = self.position;
        self.homing_started = None;
        self.mode = AxisMode::Idle;
    }

    /// Advance the state machine by at most one action. Returns true while
    /// the axis is still moving or homing.
    pub fn update(&mut self, now: Duration) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(pos) = self.actuator.readback() {
            self.position = pos;
        }

        let target = self.target.clamp(self.min, self.max);

        match self.mode {
            AxisMode::Idle => {
                if target != self.position {
                    tracing::trace!("Axis {} moving {} -> {}", self.name, self.position, target);
                    self.mode = AxisMode::Moving;
                    self.timeout = now;
                }
            }
            AxisMode::Moving => self.update_moving(now, target),
            AxisMode::MovingOvershoot => {
                if now >= self.timeout {
                    self.overshoot_left = self.overshoot_left.saturating_sub(1);
                    if self.overshoot_left == 0 {
                        self.mode = AxisMode::Idle;
                    } else {
                        self.timeout = now + OVERSHOOT_TICK;
                    }
                }
            }
            AxisMode::Homing | AxisMode::HomingQuiesce | AxisMode::HomingBackoff => {
                if self.homing_expired(now) {
                    tracing::error!("Axis {} homing timed out, halting", self.name);
                    self.motor_halt();
                    self.valid = false;
                } else {
                    self.update_homing(now);
                }
            }
        }

        self.motor_active()
    }

    fn update_moving(&mut self, now: Duration, target: i32) {
        if now < self.timeout {
            return;
        }

        let tripped = (target >= self.position && self.max_stop.triggered())
            || (target <= self.position && self.min_stop.triggered());
        if tripped && target != self.position {
            tracing::debug!("Axis {} endstop tripped at {}", self.name, self.position);
            self.motor_halt();
            return;
        }

        if target == self.position {
            let settle = self.actuator.overshoot();
            if settle > 0 {
                self.actuator.halt();
                self.overshoot_left = settle;
                self.timeout = now + OVERSHOOT_TICK;
                self.mode = AxisMode::MovingOvershoot;
            } else {
                self.mode = AxisMode::Idle;
            }
            return;
        }

        let moved = self.actuator.advance(self.position, target);
        if self.actuator.readback().is_none() {
            self.position += moved;
        }
        self.timeout = now + self.step_delay * moved.unsigned_abs();
    }

    fn update_homing(&mut self, now: Duration) {
        let toward = self.home_toward;
        let pressed = match toward {
            Direction::Backward => self.min_stop.triggered(),
            Direction::Forward => self.max_stop.triggered(),
        };

        match self.mode {
            AxisMode::Homing => {
                if pressed {
                    self.actuator.halt();
                    self.timeout = now + HOMING_QUIESCE;
                    self.mode = AxisMode::HomingQuiesce;
                } else {
                    self.actuator.seek(toward);
                }
            }
            AxisMode::HomingQuiesce => {
                if now >= self.timeout {
                    self.actuator.release_begin();
                    self.timeout = now + HOMING_BACKOFF;
                    self.mode = AxisMode::HomingBackoff;
                }
            }
            AxisMode::HomingBackoff => {
                if now < self.timeout {
                    return;
                }
                if pressed {
                    self.actuator.release(toward.reverse());
                    self.timeout = now + HOMING_BACKOFF;
                } else {
                    self.actuator.halt();
                    let home = match toward {
                        Direction::Backward => self.min,
                        Direction::Forward => self.max,
                    };
                    self.position = home;
                    self.target = home;
                    self.actuator.preset(home);
                    self.valid = true;
                    self.homing_started = None;
                    self.mode = AxisMode::Idle;
                    tracing::info!("Axis {} homed at {:.3}mm", self.name, self.to_mm(home));
                }
            }
            _ => {}
        }
    }

    fn homing_expired(&mut self, now: Duration) -> bool {
        let Some(limit) = self.homing_timeout else {
            return false;
        };
        let started = *self.homing_started.get_or_insert(now);
        now.saturating_sub(started) > limit
    }

    fn set_velocity(&mut self, velocity: f32) {
        let velocity = if velocity.is_finite() {
            velocity.clamp(1.0, self.velocity_max)
        } else {
            self.velocity_max
        };
        self.velocity = velocity;
        self.step_delay = self.delay_for(velocity);
    }

    /// Time per device unit at `velocity` mm/min.
    fn delay_for(&self, velocity: f32) -> Duration {
        let micros = 60_000_000.0 / velocity / self.units_per_mm;
        Duration::from_micros(micros.max(0.0) as u64)
    }

    fn to_units(&self, mm: f32) -> i32 {
        (mm * self.units_per_mm).round() as i32
    }

    fn to_mm(&self, units: i32) -> f32 {
        units as f32 / self.units_per_mm
    }
}

impl std::fmt::Debug for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Axis")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("target", &self.target)
            .field("position", &self.position)
            .field("enabled", &self.enabled)
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::NormallyClosed;
    use crate::hardware::sim::SimRail;
    use crate::motion::actuator::{DcEncoderActuator, StepperActuator};

    fn geometry() -> AxisGeometry {
        AxisGeometry {
            units_per_mm: 10.0,
            min_mm: 0.0,
            max_mm: 10.0,
            velocity_max: 6000.0,
        }
    }

    fn stepper_axis(rail: &SimRail, min_stop: Endstop) -> Axis {
        let act = StepperActuator::new(rail.stepper(), 5);
        let mut axis = Axis::new('X', geometry(), Box::new(act), min_stop, Endstop::none());
        axis.motor_enable(true);
        axis
    }

    fn run(axis: &mut Axis, mut now: Duration, ticks: usize) -> Duration {
        for _ in 0..ticks {
            now += Duration::from_millis(1);
            if !axis.update(now) {
                break;
            }
        }
        now
    }

    #[test]
    fn idle_axis_reports_not_busy() {
        let rail = SimRail::new(0);
        let mut axis = stepper_axis(&rail, Endstop::none());
        assert!(!axis.update(Duration::ZERO));
        assert_eq!(axis.mode(), AxisMode::Idle);
    }

    #[test]
    fn moves_to_target_one_step_at_a_time() {
        let rail = SimRail::new(0);
        let mut axis = stepper_axis(&rail, Endstop::none());
        axis.target_set(2.0, Duration::ZERO);
        assert!(axis.update(Duration::from_millis(1)));
        assert_eq!(axis.mode(), AxisMode::Moving);
        run(&mut axis, Duration::from_millis(1), 100);
        assert_eq!(axis.position_get(), 2.0);
        assert_eq!(rail.position(), 20);
        assert_eq!(axis.mode(), AxisMode::Idle);
    }

    #[test]
    fn step_rate_follows_requested_time() {
        let rail = SimRail::new(0);
        let mut axis = stepper_axis(&rail, Endstop::none());
        // 1mm in 6s is 10mm/min: 100 units/min, so one unit every 600ms.
        axis.target_set(1.0, Duration::from_secs(6));
        assert!((axis.velocity() - 10.0).abs() < 1e-3);
        let mut now = Duration::ZERO;
        axis.update(now); // Idle -> Moving
        axis.update(now); // first step
        assert_eq!(axis.position_units(), 1);
        now += Duration::from_millis(599);
        axis.update(now);
        assert_eq!(axis.position_units(), 1);
        now += Duration::from_millis(1);
        axis.update(now);
        assert_eq!(axis.position_units(), 2);
    }

    #[test]
    fn out_of_range_target_is_clamped_at_consumption() {
        let rail = SimRail::new(0);
        let mut axis = stepper_axis(&rail, Endstop::none());
        axis.target_set(25.0, Duration::ZERO);
        assert_eq!(axis.target_get(), 25.0);
        run(&mut axis, Duration::ZERO, 1000);
        assert_eq!(axis.position_get(), 10.0);
        assert_eq!(axis.mode(), AxisMode::Idle);
    }

    #[test]
    fn endstop_halts_motion_early() {
        let rail = SimRail::new(0);
        let stop = Endstop::new(NormallyClosed::new(rail.min_switch(-5)));
        let mut axis = stepper_axis(&rail, stop);
        // Pretend the axis believes it is at 5mm while it is really near the switch.
        axis.position_set(5.0);
        axis.target_set(0.0, Duration::ZERO);
        run(&mut axis, Duration::ZERO, 1000);
        assert_eq!(axis.mode(), AxisMode::Idle);
        assert_eq!(rail.position(), -5);
        assert_eq!(axis.target_get(), axis.position_get());
    }

    #[test]
    fn homing_without_switch_is_a_brake() {
        let rail = SimRail::new(0);
        let mut axis = stepper_axis(&rail, Endstop::none());
        axis.home(3.0);
        assert_eq!(axis.mode(), AxisMode::Idle);
        assert_eq!(axis.position_get(), 3.0);
        assert!(axis.position_valid());
    }

    #[test]
    fn homing_runs_quiesce_and_backoff() {
        let rail = SimRail::new(23);
        let stop = Endstop::new(NormallyClosed::new(rail.min_switch(0)));
        let mut axis = stepper_axis(&rail, stop);
        axis.home(0.0);
        assert!(!axis.position_valid());

        let mut now = Duration::ZERO;
        let mut seen = vec![axis.mode()];
        while axis.update(now) {
            if seen.last() != Some(&axis.mode()) {
                seen.push(axis.mode());
            }
            now += Duration::from_millis(1);
            assert!(now < Duration::from_secs(5));
        }
        assert_eq!(
            seen,
            vec![AxisMode::Homing, AxisMode::HomingQuiesce, AxisMode::HomingBackoff]
        );
        assert_eq!(axis.mode(), AxisMode::Idle);
        assert_eq!(axis.position_get(), 0.0);
        assert!(axis.position_valid());
        assert!(!axis.min_stop().triggered());
    }

    #[test]
    fn homing_watchdog_gives_up() {
        let rail = SimRail::new(0);
        // Switch sits past the far end of the rail, it never trips.
        let stop = Endstop::new(NormallyClosed::new(rail.min_switch(i32::MIN)));
        let mut axis = stepper_axis(&rail, stop).with_homing_timeout(Some(Duration::from_millis(50)));
        axis.home(0.0);
        let now = run(&mut axis, Duration::ZERO, 1000);
        assert_eq!(axis.mode(), AxisMode::Idle);
        assert!(!axis.position_valid());
        assert!(now < Duration::from_millis(100));
    }

    #[test]
    fn disable_invalidates_position() {
        let rail = SimRail::new(0);
        let mut axis = stepper_axis(&rail, Endstop::none());
        axis.position_set(1.0);
        axis.target_set(5.0, Duration::ZERO);
        axis.motor_enable(false);
        assert!(!axis.position_valid());
        assert_eq!(axis.target_get(), 1.0);
        assert!(!axis.update(Duration::from_millis(1)));
    }

    #[test]
    fn dc_axis_settles_with_overshoot() {
        let rail = SimRail::new(0);
        let act = DcEncoderActuator::new(rail.dc_motor(), rail.encoder(), 60, 255, 3);
        let mut axis = Axis::new('X', geometry(), Box::new(act), Endstop::none(), Endstop::none());
        axis.motor_enable(true);
        axis.target_set(8.0, Duration::ZERO);

        let mut now = Duration::ZERO;
        let mut overshoot_seen = false;
        while axis.update(now) {
            overshoot_seen |= axis.mode() == AxisMode::MovingOvershoot;
            now += Duration::from_millis(1);
            assert!(now < Duration::from_secs(5));
        }
        assert!(overshoot_seen);
        assert_eq!(axis.position_units(), 80);
    }
}
