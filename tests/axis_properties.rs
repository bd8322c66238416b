// Property-style checks of the axis state machine against simulated rails

use brundle_rs::hardware::sim::SimRail;
use brundle_rs::hardware::{Endstop, NormallyClosed};
use brundle_rs::motion::{Axis, AxisGeometry, AxisMode, DcEncoderActuator, StepperActuator};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(1);

fn geometry(units_per_mm: f32, max_mm: f32) -> AxisGeometry {
    AxisGeometry {
        units_per_mm,
        min_mm: 0.0,
        max_mm,
        velocity_max: 60_000.0,
    }
}

fn stepper(rail: &SimRail, units_per_mm: f32, max_mm: f32, min_switch: bool) -> Axis {
    let min_stop = if min_switch {
        Endstop::new(NormallyClosed::new(rail.min_switch(0)))
    } else {
        Endstop::none()
    };
    let seek = (units_per_mm / 2.0).max(1.0) as i32;
    let mut axis = Axis::new(
        'Y',
        geometry(units_per_mm, max_mm),
        Box::new(StepperActuator::new(rail.stepper(), seek)),
        min_stop,
        Endstop::none(),
    );
    axis.motor_enable(true);
    axis
}

/// Tick until the axis goes idle. Returns the number of ticks used.
fn settle(axis: &mut Axis, now: &mut Duration, limit: usize) -> usize {
    for ticks in 0..limit {
        *now += TICK;
        if !axis.update(*now) {
            return ticks;
        }
    }
    panic!("axis still busy after {} ticks: {:?}", limit, axis);
}

#[test]
fn any_target_converges_to_its_clamped_value() {
    let targets = [-50.0f32, -0.1, 0.0, 0.05, 3.3, 9.99, 10.0, 12.5, 1e6];
    for &mm in &targets {
        let rail = SimRail::new(50);
        let mut axis = stepper(&rail, 10.0, 10.0, false);
        axis.position_set(5.0);
        let mut now = Duration::ZERO;
        axis.target_set(mm, Duration::ZERO);
        settle(&mut axis, &mut now, 10_000);

        let expected = (mm.clamp(0.0, 10.0) * 10.0).round() as i32;
        assert_eq!(axis.position_units(), expected, "target {}", mm);
        assert!(axis.position_get() >= axis.position_min());
        assert!(axis.position_get() <= axis.position_max());
        assert_eq!(axis.mode(), AxisMode::Idle);
    }
}

#[test]
fn relative_moves_accumulate_on_target() {
    let rail = SimRail::new(0);
    let mut axis = stepper(&rail, 10.0, 100.0, false);
    axis.position_set(0.0);
    let mut now = Duration::ZERO;
    for _ in 0..4 {
        axis.target_move(2.5, Duration::ZERO);
    }
    assert!((axis.target_get() - 10.0).abs() < 1e-4);
    settle(&mut axis, &mut now, 1_000);
    assert_eq!(axis.position_units(), 100);
    assert_eq!(rail.position(), 100);
}

#[test]
fn homing_completes_in_bounded_ticks() {
    // 20mm from the switch at 0.5mm per seek, then quiesce and one backoff.
    let rail = SimRail::new(800);
    let mut axis = stepper(&rail, 40.0, 300.0, true);
    let mut now = Duration::ZERO;
    axis.home(0.0);
    assert!(!axis.position_valid());
    let ticks = settle(&mut axis, &mut now, 200);
    assert!(ticks >= 40, "homed after only {} ticks", ticks);
    assert!(axis.position_valid());
    assert_eq!(axis.position_units(), 0);
    assert_eq!(axis.target_get(), 0.0);
}

#[test]
fn homing_from_switch_backs_off_first() {
    let rail = SimRail::new(-3);
    let mut axis = stepper(&rail, 10.0, 100.0, true);
    let mut now = Duration::ZERO;
    axis.home(0.0);
    settle(&mut axis, &mut now, 1_000);
    // Backoff is one step per 10ms until the switch releases at 1.
    assert!(now >= Duration::from_millis(40));
    assert_eq!(rail.position(), 1);
    assert_eq!(axis.position_units(), 0);
}

#[test]
fn busy_flag_matches_mode() {
    let rail = SimRail::new(0);
    let mut axis = stepper(&rail, 10.0, 100.0, false);
    axis.position_set(0.0);
    axis.target_set(1.0, Duration::ZERO);
    let mut now = Duration::ZERO;
    loop {
        now += TICK;
        let busy = axis.update(now);
        assert_eq!(busy, axis.mode() != AxisMode::Idle);
        if !busy {
            break;
        }
    }
}

#[test]
fn disabled_axis_never_moves() {
    let rail = SimRail::new(0);
    let mut axis = stepper(&rail, 10.0, 100.0, false);
    axis.position_set(0.0);
    axis.motor_enable(false);
    axis.target_set(5.0, Duration::ZERO);
    let mut now = Duration::ZERO;
    for _ in 0..100 {
        now += TICK;
        assert!(!axis.update(now));
    }
    assert_eq!(rail.position(), 0);
    assert!(!axis.position_valid());
}

#[test]
fn dc_axis_reaches_target_and_settles() {
    let rail = SimRail::new(0);
    let act = DcEncoderActuator::new(rail.dc_motor(), rail.encoder(), 60, 255, 10);
    let min_stop = Endstop::new(NormallyClosed::new(rail.min_switch(-1_000)));
    let mut axis = Axis::new('X', geometry(10.0, 100.0), Box::new(act), min_stop, Endstop::none());
    axis.motor_enable(true);
    axis.position_set(0.0);
    axis.target_set(50.0, Duration::ZERO);

    let mut now = Duration::ZERO;
    let mut saw_overshoot = false;
    for _ in 0..5_000 {
        now += TICK;
        let busy = axis.update(now);
        saw_overshoot |= axis.mode() == AxisMode::MovingOvershoot;
        if !busy {
            break;
        }
    }
    assert!(saw_overshoot);
    assert_eq!(axis.mode(), AxisMode::Idle);
    assert_eq!(axis.position_units(), 500);
}
