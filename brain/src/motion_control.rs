//! Motion control: waypoint following with a reactive override.
//!
//! The controller wakes on every pose update (or after `MAX_WAIT` at the
//! latest), picks the current waypoint off the planned path and converts the
//! pose error into wheel targets. While `reactive_control` is set the
//! proximity distances override the wheel targets instead.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use arena_types::{wrap_angle, Vec2};

use crate::config::MAX_WAIT;
use crate::context::Context;
use crate::driver::{DriverError, NodeId, VariableMap, VAR_MOTOR_LEFT_TARGET, VAR_MOTOR_RIGHT_TARGET};
use crate::local_nav::NO_DETECTION;
use crate::module::ModuleGuard;

/// Waypoint considered reached inside this radius; the follower advances.
const WAYPOINT_RADIUS_CM: f64 = 6.0;

/// Final stop radius at the last waypoint.
const ARRIVAL_RADIUS_CM: f64 = 1.0;

/// Pose error is capped so the forward gain saturates.
const MAX_DIST_CM: f64 = 8.0;

/// Reactive wheel commands are scaled by this before truncation.
const REACTIVE_FACTOR: f64 = 2.0;

// ── Pure control laws ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ControlSnapshot {
    pub position: Option<Vec2>,
    pub orientation: Option<f64>,
    pub waypoint: Option<Vec2>,
    pub at_last_waypoint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionControl {
    /// Close enough to advance to the next waypoint.
    pub arrived: bool,
    /// Standing on the final waypoint: report arrival and stop.
    pub final_stop: bool,
    pub left: f64,
    pub right: f64,
    /// Distance to the waypoint (capped), mirrored to the state for the UI.
    pub dist: f64,
}

/// Fuzzy-gain waypoint follower.
///
/// Angle bands: under 10° drive at full gain, 10–45° creep forward, beyond
/// 45° turn in place. Angular speed is proportional and clamped.
pub fn control_position(snapshot: &ControlSnapshot) -> Option<PositionControl> {
    let position = snapshot.position?;
    let theta = snapshot.orientation?;
    let waypoint = snapshot.waypoint?;

    let error = waypoint.sub(&position);
    let d_angle = wrap_angle(error.y.atan2(error.x) - theta);
    let d_dist = error.norm().min(MAX_DIST_CM);

    let mut v_forward = 0.0;
    if d_angle.abs() < 45.0 * PI / 180.0 {
        if d_angle.abs() < 10.0 * PI / 180.0 {
            v_forward = d_dist.max(4.0) * 5.0;
        } else {
            v_forward = d_dist.max(4.0) * 1.0;
        }
    }
    let v_angle = (d_angle * 80.0).clamp(-50.0, 50.0);

    if d_dist < WAYPOINT_RADIUS_CM {
        if d_dist < ARRIVAL_RADIUS_CM && snapshot.at_last_waypoint {
            return Some(PositionControl {
                arrived: true,
                final_stop: true,
                left: 0.0,
                right: 0.0,
                dist: d_dist,
            });
        }
        return Some(PositionControl {
            arrived: true,
            final_stop: false,
            left: v_forward - v_angle,
            right: v_forward + v_angle,
            dist: d_dist,
        });
    }

    Some(PositionControl {
        arrived: false,
        final_stop: false,
        left: v_forward - v_angle,
        right: v_forward + v_angle,
        dist: d_dist,
    })
}

/// Reactive controller state: the corner ramp counter survives across
/// invocations.
#[derive(Debug, Default)]
pub struct ReactiveController {
    times: i64,
}

impl ReactiveController {
    /// Sensor-driven override. Priorities, highest last so later writes win:
    /// corner ramp when the centre-front sensor is out of range, then the
    /// remaining front sensors, then the left sensor, then centre-front.
    pub fn control(&mut self, distances: &[f64]) -> (f64, f64) {
        if distances.len() < 5 {
            return (0.0, 0.0);
        }

        let mut v_forward = 30.0;
        let mut v_angle = -3.0;

        // Corner ramp: steer right harder the longer the front stays blind,
        // which walks the robot around a convex corner.
        if distances[2] == NO_DETECTION {
            self.times += REACTIVE_FACTOR as i64;
            v_angle = match self.times {
                t if t < 40 => 0.0,
                t if t < 80 => -4.0,
                t if t < 150 => -8.0,
                _ => -15.0,
            };
        }

        // Remaining front sensors.
        let d_min = [distances[1], distances[3], distances[4]]
            .into_iter()
            .filter(|&d| d != NO_DETECTION)
            .fold(f64::INFINITY, f64::min);
        if d_min < 5.0 {
            self.times = 0;
            v_angle = -(d_min - 5.0) * 10.0;
            if d_min < 4.0 {
                v_forward = (d_min - 4.0) * 10.0;
            }
        }

        // Left sensor.
        if distances[0] != NO_DETECTION {
            self.times = 0;
            if distances[0] < 5.0 {
                v_angle = -(distances[0] - 5.0) * 8.0;
                if distances[0] < 4.0 {
                    v_forward = (distances[0] - 4.0) * 10.0;
                }
            }
        }

        // Centre-front sensor wins outright.
        if distances[2] != NO_DETECTION && distances[2] < 5.0 {
            self.times = 0;
            v_angle = -(distances[2] - 5.0) * 10.0;
            if distances[2] < 4.0 {
                v_forward = (distances[2] - 4.0) * 10.0;
            }
        }

        (
            ((v_forward + v_angle) * REACTIVE_FACTOR).trunc(),
            ((v_forward - v_angle) * REACTIVE_FACTOR).trunc(),
        )
    }
}

// ── Module ────────────────────────────────────────────────────────────────────

pub fn start(ctx: &Arc<Context>) -> ModuleGuard {
    let mut guard = ModuleGuard::new("motion_control");
    let ctx = ctx.clone();
    guard.add_task(tokio::spawn(run(ctx)));
    guard
}

async fn run(ctx: Arc<Context>) {
    let mut reactive = ReactiveController::default();
    loop {
        ctx.pose_update.wait_timeout(Duration::from_secs_f64(MAX_WAIT)).await;
        update_motor_control(&ctx, &mut reactive);
    }
}

fn update_motor_control(ctx: &Arc<Context>, reactive: &mut ReactiveController) {
    let (snapshot, reactive_mode, distances) = ctx.store.with(|state| {
        // Make sure a fresh path has a targeted waypoint.
        if state.next_waypoint_index.is_none() {
            if let Some(path) = &state.path {
                if !path.is_empty() {
                    state.set_next_waypoint_index(Some(0));
                }
            }
        }

        let waypoint = match (&state.path, state.next_waypoint_index) {
            (Some(path), Some(index)) => path.get(index).copied(),
            _ => None,
        };
        let at_last = match (&state.path, state.next_waypoint_index) {
            (Some(path), Some(index)) => !path.is_empty() && index == path.len() - 1,
            _ => false,
        };

        (
            ControlSnapshot {
                position: state.position,
                orientation: state.orientation,
                waypoint,
                at_last_waypoint: at_last,
            },
            state.reactive_control,
            state.relative_distances.clone(),
        )
    });

    let (left, right) = if reactive_mode {
        // The follower still runs so waypoint bookkeeping keeps advancing.
        if let Some(control) = control_position(&snapshot) {
            if control.arrived && !control.final_stop {
                advance_waypoint(ctx);
            }
        }
        reactive.control(&distances)
    } else {
        let Some(control) = control_position(&snapshot) else {
            return;
        };

        ctx.store.with(|state| state.set_dist(Some(control.dist)));

        if control.final_stop {
            let newly_arrived = ctx.store.with(|state| {
                let first = !state.arrived;
                state.set_arrived(true);
                first
            });
            if newly_arrived {
                info!("final waypoint reached");
            }
            ctx.store.changed();
            write_motors(ctx, 0, 0);
            return;
        }

        if control.arrived {
            advance_waypoint(ctx);
        }
        ctx.store.changed();
        (control.left.trunc(), control.right.trunc())
    };

    write_motors(ctx, left as i32, right as i32);
}

fn advance_waypoint(ctx: &Arc<Context>) {
    ctx.store.with(|state| {
        if let (Some(index), Some(path)) = (state.next_waypoint_index, &state.path) {
            if !path.is_empty() {
                state.set_next_waypoint_index(Some((index + 1).min(path.len() - 1)));
            }
        }
    });
}

fn write_motors(ctx: &Arc<Context>, left: i32, right: i32) {
    let mut vars = VariableMap::new();
    vars.insert(VAR_MOTOR_LEFT_TARGET.to_string(), vec![left]);
    vars.insert(VAR_MOTOR_RIGHT_TARGET.to_string(), vec![right]);

    match ctx.transport.set_variables(NodeId::Drive, vars) {
        Ok(()) => {}
        Err(DriverError::ConnectionClosed) => {
            warn!("driver connection lost, shutting down");
            ctx.request_shutdown();
        }
        Err(error) => warn!("motor write failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn snapshot(position: (f64, f64), theta: f64, waypoint: (f64, f64)) -> ControlSnapshot {
        ControlSnapshot {
            position: Some(Vec2::new(position.0, position.1)),
            orientation: Some(theta),
            waypoint: Some(Vec2::new(waypoint.0, waypoint.1)),
            at_last_waypoint: false,
        }
    }

    #[test]
    fn missing_pose_or_waypoint_yields_no_control() {
        assert!(control_position(&ControlSnapshot::default()).is_none());
    }

    #[test]
    fn aligned_goal_drives_at_full_gain() {
        let control = control_position(&snapshot((0.0, 0.0), 0.0, (20.0, 0.0))).unwrap();
        assert!(!control.arrived);
        // Distance caps at 8: forward speed 8 * 5, no angular component.
        assert_relative_eq!(control.left, 40.0, epsilon = 1e-9);
        assert_relative_eq!(control.right, 40.0, epsilon = 1e-9);
        assert_relative_eq!(control.dist, 8.0);
    }

    #[test]
    fn side_goal_turns_in_place() {
        let control = control_position(&snapshot((0.0, 0.0), 0.0, (0.0, 20.0))).unwrap();
        // 90° off: no forward drive, clamped turn.
        assert_relative_eq!(control.left, -50.0, epsilon = 1e-9);
        assert_relative_eq!(control.right, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn shallow_angle_creeps_forward() {
        // ~20° off the heading: slow gain, turning toward the goal.
        let control = control_position(&snapshot((0.0, 0.0), 0.0, (20.0, 7.0))).unwrap();
        assert!(control.left < control.right);
        assert!(control.right - control.left < 100.0);
        assert!(control.left + control.right > 0.0);
    }

    #[test]
    fn waypoint_radius_flags_advancement() {
        let control = control_position(&snapshot((0.0, 0.0), 0.0, (4.0, 0.0))).unwrap();
        assert!(control.arrived);
        assert!(!control.final_stop);
    }

    #[test]
    fn final_waypoint_stops_the_robot() {
        let mut snap = snapshot((10.0, 10.0), 0.0, (10.4, 10.0));
        snap.at_last_waypoint = true;
        let control = control_position(&snap).unwrap();
        assert!(control.final_stop);
        assert_relative_eq!(control.left, 0.0);
        assert_relative_eq!(control.right, 0.0);
    }

    #[test]
    fn near_final_waypoint_without_flag_keeps_driving() {
        let control = control_position(&snapshot((10.0, 10.0), 0.0, (10.4, 10.0))).unwrap();
        assert!(control.arrived);
        assert!(!control.final_stop);
    }

    #[test]
    fn reactive_centre_front_wins_over_everything() {
        let mut controller = ReactiveController::default();
        // Centre-front at 2 cm, left even closer: centre still decides.
        let mut distances = vec![NO_DETECTION; 7];
        distances[0] = 1.0;
        distances[2] = 2.0;
        let (left, right) = controller.control(&distances);
        // v_angle = 30, v_forward = -20 → hard turn while backing off.
        assert_relative_eq!(left, ((-20.0 + 30.0) * REACTIVE_FACTOR).trunc());
        assert_relative_eq!(right, ((-20.0 - 30.0) * REACTIVE_FACTOR).trunc());
    }

    #[test]
    fn reactive_left_sensor_steers_away() {
        let mut controller = ReactiveController::default();
        let mut distances = vec![NO_DETECTION; 7];
        distances[0] = 3.0;
        let (left, right) = controller.control(&distances);
        // v_angle = 16, v_forward = -10.
        assert_relative_eq!(left, ((-10.0 + 16.0) * REACTIVE_FACTOR).trunc());
        assert_relative_eq!(right, ((-10.0 - 16.0) * REACTIVE_FACTOR).trunc());
    }

    #[test]
    fn corner_ramp_escalates_while_the_front_is_blind() {
        let mut controller = ReactiveController::default();
        let distances = vec![NO_DETECTION; 7];

        // First calls: counter below 40, drive straight.
        let (left, right) = controller.control(&distances);
        assert_relative_eq!(left, 60.0);
        assert_relative_eq!(right, 60.0);

        let mut last_bias = 0.0;
        for _ in 0..100 {
            let (left, right) = controller.control(&distances);
            let bias = left - right;
            assert!(bias <= last_bias + 1e-9 || bias == last_bias, "ramp must not relax");
            last_bias = bias;
        }
        // Fully ramped: v_angle = -15 → bias of -60 between wheels.
        let (left, right) = controller.control(&distances);
        assert_relative_eq!(left - right, -60.0);
    }

    #[test]
    fn any_contact_resets_the_corner_ramp() {
        let mut controller = ReactiveController::default();
        let blind = vec![NO_DETECTION; 7];
        for _ in 0..100 {
            controller.control(&blind);
        }
        let mut seen = vec![NO_DETECTION; 7];
        seen[2] = 4.5;
        controller.control(&seen);
        // Counter reset: the next blind call starts the ramp from zero.
        let (left, right) = controller.control(&blind);
        assert_relative_eq!(left - right, 0.0);
    }
}
