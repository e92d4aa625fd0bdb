//! Local obstacle avoidance.
//!
//! Converts raw proximity readings to centimetre distances through the
//! per-sensor calibration tables and owns the `reactive_control` flag: close
//! obstacles flip the motion controller into its sensor-driven mode, and a
//! timed exit hands control back to the planner once the robot has worked
//! itself clear.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::config::{LOOP_PERIOD, REACTIVE_ENTRY_CM, REACTIVE_EXIT_SECS, REACTIVE_REPLAN_SECS};
use crate::context::Context;
use crate::driver::{self, variable, VAR_PROX_HORIZONTAL};
use crate::module::ModuleGuard;

/// Sensor reading with no detection (outside the calibrated range).
pub const NO_DETECTION: f64 = -1.0;

/// Calibration tables: `(distance_cm, raw)` pairs, raw falling with
/// distance. Measured on the physical sensors.
const FRONT_TABLE: [(f64, f64); 11] = [
    (1.0, 4771.0), (2.0, 4684.0), (3.0, 4542.0), (4.0, 4150.0), (5.0, 3720.0),
    (6.0, 3383.0), (7.0, 3100.0), (8.0, 2827.0), (9.0, 2600.0), (10.0, 2400.0),
    (11.0, 2116.0),
];
const DIAG_TABLE: [(f64, f64); 11] = [
    (1.0, 4759.0), (2.0, 4702.0), (3.0, 4600.0), (4.0, 4314.0), (5.0, 3909.0),
    (6.0, 3547.0), (7.0, 3254.0), (8.0, 3008.0), (9.0, 2745.0), (10.0, 2500.0),
    (11.0, 2250.0),
];
const BACK_TABLE: [(f64, f64); 11] = [
    (1.0, 4992.0), (2.0, 4929.0), (3.0, 4762.0), (4.0, 4276.0), (5.0, 3744.0),
    (6.0, 3319.0), (7.0, 2977.0), (8.0, 2716.0), (9.0, 2489.0), (10.0, 2279.0),
    (11.0, 2072.0),
];

/// Raw reading → centimetres by linear interpolation in the table.
/// Readings weaker than the far end of the table return [`NO_DETECTION`];
/// readings stronger than the near end clamp to the first calibrated
/// distance (the sensor saturates).
pub fn distance_from_raw(raw: i32, table: &[(f64, f64)]) -> f64 {
    let raw = raw as f64;
    let (near_cm, near_raw) = table[0];
    let (_, far_raw) = table[table.len() - 1];

    if raw < far_raw {
        return NO_DETECTION;
    }
    if raw >= near_raw {
        return near_cm;
    }

    for window in table.windows(2) {
        let (cm_a, raw_a) = window[0];
        let (cm_b, raw_b) = window[1];
        if raw <= raw_a && raw >= raw_b {
            let fraction = (raw_a - raw) / (raw_a - raw_b);
            return cm_a + fraction * (cm_b - cm_a);
        }
    }

    NO_DETECTION
}

/// Convert the seven horizontal readings: five front-row sensors
/// (front/diagonal alternating) and two back sensors.
pub fn distances_from_readings(readings: &[i32]) -> Vec<f64> {
    const TABLES: [&[(f64, f64)]; 7] = [
        &FRONT_TABLE, &DIAG_TABLE, &FRONT_TABLE, &DIAG_TABLE, &FRONT_TABLE,
        &BACK_TABLE, &BACK_TABLE,
    ];
    readings
        .iter()
        .zip(TABLES.iter())
        .map(|(&raw, table)| distance_from_raw(raw, table))
        .collect()
}

/// Any front-facing sensor (back row excluded) inside the entry distance?
fn obstacle_ahead(distances: &[f64]) -> bool {
    distances
        .iter()
        .take(5)
        .any(|&d| d != NO_DETECTION && d < REACTIVE_ENTRY_CM)
}

#[derive(Default)]
struct ReactiveTimer {
    entered: Option<Instant>,
    replan_requested: bool,
}

pub fn start(ctx: &Arc<Context>) -> ModuleGuard {
    let mut guard = ModuleGuard::new("local_nav");
    let timer = Arc::new(Mutex::new(ReactiveTimer::default()));

    // Driver event processor: raw proximity → distances + reactive entry.
    let event_ctx = ctx.clone();
    let event_timer = timer.clone();
    guard.add_watch(driver::watch_events(&ctx.transport, "local_nav", move |vars| {
        let readings = variable(vars, VAR_PROX_HORIZONTAL)?;
        let distances = distances_from_readings(readings);
        let ahead = obstacle_ahead(&distances);

        event_ctx.store.with(|state| {
            state.set_prox_sensors(readings.to_vec());
            state.set_relative_distances(distances);
            if ahead && !state.reactive_control {
                info!("obstacle ahead, switching to reactive control");
                state.set_reactive_control(true);
            }
        });
        event_ctx.store.changed();

        if ahead {
            // Refreshed while the obstacle stays close: the exit countdown
            // starts from the last close reading.
            let mut timer = event_timer.lock().expect("reactive timer poisoned");
            timer.entered = Some(Instant::now());
            timer.replan_requested = false;
        }
        Ok(())
    }));

    let ctx = ctx.clone();
    guard.add_task(tokio::spawn(run(ctx, timer)));
    guard
}

async fn run(ctx: Arc<Context>, timer: Arc<Mutex<ReactiveTimer>>) {
    loop {
        tokio::time::sleep(Duration::from_secs_f64(LOOP_PERIOD)).await;

        if !ctx.store.with(|state| state.reactive_control) {
            continue;
        }

        let entered = {
            let timer = timer.lock().expect("reactive timer poisoned");
            timer.entered
        };
        let Some(entered) = entered else {
            continue;
        };
        let elapsed = entered.elapsed().as_secs_f64();

        // Ask for a replan from the displaced pose first; the grace period
        // before re-engaging lets the planner observe the new position.
        if elapsed > REACTIVE_REPLAN_SECS {
            let mut timer = timer.lock().expect("reactive timer poisoned");
            if !timer.replan_requested {
                timer.replan_requested = true;
                info!("reactive mode settling, requesting replan");
                ctx.scene_update.trigger();
            }
        }

        if elapsed > REACTIVE_EXIT_SECS {
            {
                let mut timer = timer.lock().expect("reactive timer poisoned");
                timer.entered = None;
                timer.replan_requested = false;
            }
            ctx.store.with(|state| {
                state.set_reactive_control(false);
                if let (Some(index), Some(path)) = (state.next_waypoint_index, &state.path) {
                    let next = (index + 1).min(path.len().saturating_sub(1));
                    state.set_next_waypoint_index(Some(next));
                }
            });
            ctx.store.changed();
            info!("reactive mode cleared, resuming waypoint following");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{LoopbackTransport, VariableMap};
    use crate::pool::Pool;
    use approx::assert_relative_eq;
    use arena_types::Vec2;

    #[test]
    fn table_interpolates_between_calibration_points() {
        // Halfway between the 1 cm and 2 cm raw values.
        let raw = ((4771.0 + 4684.0) / 2.0) as i32;
        assert_relative_eq!(distance_from_raw(raw, &FRONT_TABLE), 1.5, epsilon = 0.01);
        assert_relative_eq!(distance_from_raw(4150, &FRONT_TABLE), 4.0);
    }

    #[test]
    fn weak_readings_mean_no_detection() {
        assert_eq!(distance_from_raw(0, &FRONT_TABLE), NO_DETECTION);
        assert_eq!(distance_from_raw(2000, &BACK_TABLE), NO_DETECTION);
    }

    #[test]
    fn saturated_readings_clamp_to_the_nearest_calibrated_distance() {
        assert_eq!(distance_from_raw(5000, &FRONT_TABLE), 1.0);
    }

    #[test]
    fn back_sensors_do_not_trigger_reactive_entry() {
        // 2 cm on a back sensor only.
        let mut distances = vec![NO_DETECTION; 7];
        distances[5] = 2.0;
        assert!(!obstacle_ahead(&distances));

        distances[2] = 2.0;
        assert!(obstacle_ahead(&distances));
    }

    fn prox_event(readings: [i32; 7]) -> VariableMap {
        let mut vars = VariableMap::new();
        vars.insert(VAR_PROX_HORIZONTAL.to_string(), readings.to_vec());
        vars
    }

    #[tokio::test(start_paused = true)]
    async fn reactive_mode_enters_then_clears_after_the_grace_period() {
        let transport = Arc::new(LoopbackTransport::new());
        let (shutdown_tx, _shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = Arc::new(Context::new(transport.clone(), Pool::new(1), shutdown_tx));

        ctx.store.with(|state| {
            state.set_path(Some(vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(10.0, 0.0),
                Vec2::new(20.0, 0.0),
            ]));
            state.set_next_waypoint_index(Some(0));
        });

        let _guard = start(&ctx);
        tokio::task::yield_now().await;

        // Watch for the replan request fired during the settle window.
        let scene = ctx.scene_update.clone();
        let replanned = tokio::spawn(async move { scene.wait().await });
        tokio::task::yield_now().await;

        // Sensor 2 reads ~2 cm once.
        transport.inject(prox_event([0, 0, 4684, 0, 0, 0, 0]));
        assert!(ctx.store.with(|state| state.reactive_control));

        // Then nothing but out-of-range readings for the whole window.
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            transport.inject(prox_event([0, 0, 0, 0, 0, 0, 0]));
        }
        assert!(ctx.store.with(|state| state.reactive_control));

        tokio::time::advance(Duration::from_secs_f64(4.5)).await;
        tokio::task::yield_now().await;

        assert!(!ctx.store.with(|state| state.reactive_control));
        assert_eq!(ctx.store.with(|state| state.next_waypoint_index), Some(1));
        replanned.await.unwrap();
    }
}
