//! Pose estimation module.
//!
//! Owns the EKF in a single task fed by one channel, so wheel-odometry
//! predictions can never race camera updates. Wheel speeds arrive from the
//! driver event processor; pose observations come from the vision
//! coordinator and from the operator's `set_position` command.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use arena_types::Pose;

use crate::config::SPEED_UNIT_TO_CM;
use crate::context::Context;
use crate::driver::{
    self, variable, VAR_MOTOR_LEFT_SPEED, VAR_MOTOR_RIGHT_SPEED,
};
use crate::ekf::Ekf;
use crate::module::ModuleGuard;

/// Serialised estimator input.
#[derive(Debug, Clone, Copy)]
pub enum PoseEvent {
    /// Wheel speeds in cm/s.
    Wheels { v_left: f64, v_right: f64 },
    /// Camera or operator pose observation.
    Observation { x: f64, y: f64, theta: f64 },
}

pub fn start(ctx: &Arc<Context>) -> ModuleGuard {
    let mut guard = ModuleGuard::new("filtering");

    // Driver event processor: motor speeds → estimator channel.
    let events = ctx.pose_events.clone();
    guard.add_watch(driver::watch_events(&ctx.transport, "filtering", move |vars| {
        let &[left] = variable(vars, VAR_MOTOR_LEFT_SPEED)? else {
            return Err(driver::ProcessError::Failed("left speed shape".into()));
        };
        let &[right] = variable(vars, VAR_MOTOR_RIGHT_SPEED)? else {
            return Err(driver::ProcessError::Failed("right speed shape".into()));
        };
        events.send(PoseEvent::Wheels {
            v_left: left as f64 * SPEED_UNIT_TO_CM,
            v_right: right as f64 * SPEED_UNIT_TO_CM,
        });
        Ok(())
    }));

    let ctx = ctx.clone();
    guard.add_task(tokio::spawn(run(ctx)));
    guard
}

async fn run(ctx: Arc<Context>) {
    let mut filter = Filter::new();
    loop {
        let event = ctx.pose_events.recv().await;
        let Some(pose) = filter.step(event) else {
            continue;
        };

        ctx.store.with(|state| {
            state.set_position(Some(pose.position()));
            state.set_orientation(Some(pose.theta));
        });
        ctx.store.changed();
        ctx.pose_update.trigger();
    }
}

/// The EKF plus the clock bookkeeping around it.
struct Filter {
    ekf: Ekf,
    last_predict: Option<Instant>,
}

impl Filter {
    fn new() -> Self {
        Self { ekf: Ekf::new(Pose::new(0.0, 0.0, 0.0)), last_predict: None }
    }

    fn step(&mut self, event: PoseEvent) -> Option<Pose> {
        match event {
            PoseEvent::Wheels { v_left, v_right } => {
                let now = Instant::now();
                // First sample only establishes the clock: dt is unknown.
                let Some(last) = self.last_predict.replace(now) else {
                    debug!("first wheel sample, establishing dt baseline");
                    return None;
                };
                let dt = (now - last).as_secs_f64();
                Some(self.ekf.predict(v_left, v_right, dt))
            }
            PoseEvent::Observation { x, y, theta } => Some(self.ekf.update([x, y, theta])),
        }
    }
}
