//! Global navigation module.
//!
//! Waits for `scene_update`, snapshots the planner inputs off the state,
//! compiles and searches the map on the worker pool, and writes the
//! resulting path back. A result that no longer matches the current goal
//! (the operator moved it while the worker was busy) is discarded.

use std::sync::Arc;

use tracing::{debug, info, warn};

use arena_types::{Cell, GridFrame, Rect, Vec2};
use grid_nav::{compile_map, plan_route, Map, PlanOutcome, PlanRequest};

use crate::config::SAFE_DISTANCE_CM;
use crate::context::Context;
use crate::module::ModuleGuard;

pub fn start(ctx: &Arc<Context>) -> ModuleGuard {
    let mut guard = ModuleGuard::new("global_nav");
    let ctx = ctx.clone();
    guard.add_task(tokio::spawn(run(ctx)));
    guard
}

async fn run(ctx: Arc<Context>) {
    loop {
        ctx.scene_update.wait().await;
        recompute_path(&ctx).await;
    }
}

struct PlannerInputs {
    start: Vec2,
    end: Vec2,
    obstacles: Map,
    extra_obstacles: Vec<Rect>,
    frame: GridFrame,
    optimise: bool,
}

async fn recompute_path(ctx: &Arc<Context>) {
    let Some(inputs) = snapshot_inputs(ctx) else {
        debug!("replan skipped: pose or goal not set");
        return;
    };
    let goal = inputs.end;
    let frame = inputs.frame;

    let Some((boundary_map, outcome)) = ctx.pool.run(move || plan(inputs)).await else {
        warn!("planner job was dropped by the pool");
        return;
    };

    // The goal may have moved while the worker was busy; a stale path would
    // steer the robot toward the old goal.
    let current_goal = ctx.store.with(|state| state.end);
    if current_goal != Some(goal) {
        debug!("discarding stale plan for goal {goal:?}");
        return;
    }

    let path = outcome
        .path
        .map(|cells| cells.into_iter().map(|c| frame.to_physical(c)).collect::<Vec<_>>());

    match &path {
        Some(path) => info!(
            "path found: {} waypoints in {:.1} ms",
            path.len(),
            outcome.elapsed * 1e3
        ),
        None => warn!("no path to {goal:?}"),
    }

    ctx.store.with(|state| {
        state.set_boundary_map(Some(boundary_map));
        state.set_next_waypoint_index(path.as_ref().map(|_| 0));
        state.set_path(path);
        state.set_computation_time(Some(outcome.elapsed));
    });
    ctx.store.changed();
}

fn snapshot_inputs(ctx: &Arc<Context>) -> Option<PlannerInputs> {
    ctx.store.with(|state| {
        let start = state.position?;
        let end = state.end?;
        Some(PlannerInputs {
            start,
            end,
            obstacles: state.obstacles.clone(),
            extra_obstacles: state.extra_obstacles.clone(),
            frame: GridFrame::new(state.subdivisions, state.physical_size),
            optimise: state.optimise,
        })
    })
}

/// Compile the map and search it. Runs on a pool worker.
fn plan(inputs: PlannerInputs) -> (Map, PlanOutcome) {
    let frame = inputs.frame;
    let extras: Vec<(Cell, Cell)> = inputs
        .extra_obstacles
        .iter()
        .map(|rect| rect_to_cells(rect, &frame))
        .collect();

    let radius = frame.subdivisions as f64 * SAFE_DISTANCE_CM / frame.physical_size;
    let map = compile_map(&inputs.obstacles, &extras, radius);

    let request = PlanRequest {
        start: frame.to_cell(inputs.start),
        end: frame.to_cell(inputs.end),
        map: map.clone(),
        optimise: inputs.optimise,
    };
    (map, plan_route(&request))
}

/// Rectangle corners → cell-space span. The upper corner is exclusive, so
/// it is rounded outward rather than clamped into the grid.
fn rect_to_cells(rect: &Rect, frame: &GridFrame) -> (Cell, Cell) {
    let rect = rect.normalised();
    let factor = frame.subdivisions as f64 / frame.physical_size;
    (
        Cell::new((rect.a.x * factor) as i32, (rect.a.y * factor) as i32),
        Cell::new((rect.b.x * factor).ceil() as i32, (rect.b.y * factor).ceil() as i32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackTransport;
    use crate::pool::Pool;
    use std::time::Duration;

    async fn wait_for_path(ctx: &Arc<Context>) -> Option<Vec<Vec2>> {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(path) = ctx.store.with(|s| s.path.clone()) {
                return Some(path);
            }
            if ctx.store.with(|s| s.computation_time.is_some()) {
                return ctx.store.with(|s| s.path.clone());
            }
        }
        None
    }

    fn test_ctx() -> Arc<Context> {
        let (shutdown_tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Context::new(Arc::new(LoopbackTransport::new()), Pool::new(2), shutdown_tx))
    }

    #[tokio::test]
    async fn scene_update_produces_a_path_to_the_goal() {
        let ctx = test_ctx();
        ctx.store.with(|state| {
            state.set_position(Some(Vec2::new(20.0, 20.0)));
            state.set_end(Some(Vec2::new(90.0, 90.0)));
        });

        let _guard = start(&ctx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.scene_update.trigger();

        let path = wait_for_path(&ctx).await.expect("path written to state");
        assert!(path.len() >= 2);

        // First point near the pose, last at the goal cell centre.
        assert!(path[0].dist(&Vec2::new(20.0, 20.0)) < 2.0);
        assert!(path[path.len() - 1].dist(&Vec2::new(90.0, 90.0)) < 2.0);
        assert_eq!(ctx.store.with(|s| s.next_waypoint_index), Some(0));
        assert!(ctx.store.with(|s| s.computation_time).unwrap() > 0.0);
        assert!(ctx.store.with(|s| s.boundary_map.is_some()));
    }

    #[tokio::test]
    async fn extra_obstacle_walls_off_the_goal() {
        let ctx = test_ctx();
        ctx.store.with(|state| {
            state.set_position(Some(Vec2::new(10.0, 55.0)));
            state.set_end(Some(Vec2::new(100.0, 55.0)));
            // Full-height wall through the middle of the arena.
            state.push_extra_obstacle(Rect::new(
                Vec2::new(52.0, 0.0),
                Vec2::new(58.0, 110.0),
            ));
        });

        let _guard = start(&ctx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.scene_update.trigger();

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if ctx.store.with(|s| s.computation_time.is_some()) {
                break;
            }
        }
        assert_eq!(ctx.store.with(|s| s.path.clone()), None);
        assert_eq!(ctx.store.with(|s| s.next_waypoint_index), None);
    }

    #[test]
    fn rect_span_covers_the_whole_rectangle() {
        let frame = GridFrame::new(64, 110.0);
        let rect = Rect::new(Vec2::new(10.0, 10.0), Vec2::new(20.0, 15.0));
        let (a, b) = rect_to_cells(&rect, &frame);
        assert!(a.x <= (10.0 * 64.0 / 110.0) as i32);
        assert!(b.x as f64 >= 20.0 * 64.0 / 110.0);
        assert!(b.y > a.y);
    }
}
