//! The top-level coordination loop.
//!
//! Runs at ~10 Hz: pull a vision observation, gate it through the outlier
//! rejecters, feed the estimator, swap the obstacle grid in when the scene
//! changed enough to matter, and fire the celebration once the goal is
//! reached.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use arena_types::Vec2;
use grid_nav::{l1_distance, Map};

use crate::celebration::Celebration;
use crate::config::{
    LOOP_PERIOD, OUTLIER_ANGLE_THRESHOLD, OUTLIER_MAX_MISSES, OUTLIER_POINT_THRESHOLD,
    SCENE_THRESHOLD,
};
use crate::context::Context;
use crate::filtering::PoseEvent;
use crate::outlier::OutlierRejecter;
use crate::vision::Vision;

pub struct Coordinator {
    ctx: Arc<Context>,
    vision: Vision,
    celebration: Celebration,
    /// Keep feeding camera fixes into the estimator after the first one.
    live_camera: bool,
    back_rejecter: OutlierRejecter<Vec2>,
    front_rejecter: OutlierRejecter<Vec2>,
    orientation_rejecter: OutlierRejecter<f64>,
}

impl Coordinator {
    pub fn new(ctx: Arc<Context>, vision: Vision, live_camera: bool) -> Self {
        let celebration = Celebration::new(ctx.transport.clone());
        Self {
            ctx,
            vision,
            celebration,
            live_camera,
            back_rejecter: OutlierRejecter::new(OUTLIER_POINT_THRESHOLD, OUTLIER_MAX_MISSES),
            front_rejecter: OutlierRejecter::new(OUTLIER_POINT_THRESHOLD, OUTLIER_MAX_MISSES),
            orientation_rejecter: OutlierRejecter::new(
                OUTLIER_ANGLE_THRESHOLD,
                OUTLIER_MAX_MISSES,
            ),
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(LOOP_PERIOD));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.step().await;
        }
    }

    async fn step(&mut self) {
        if let Some(observation) = self.vision.next(&self.ctx.pool).await {
            let (back, _) = self.back_rejecter.next(observation.back);
            let (front, _) = self.front_rejecter.next(observation.front);
            let (orientation, _) =
                self.orientation_rejecter.next(observation.back.angle_to(&observation.front));

            // Only update the filter from the camera in live mode or while
            // the pose is still unknown; dead reckoning covers the rest.
            let pose_known = self.ctx.store.with(|state| state.position.is_some());
            if self.live_camera || !pose_known {
                self.ctx.pose_events.send(PoseEvent::Observation {
                    x: back.x,
                    y: back.y,
                    theta: orientation,
                });
            }

            self.ctx.store.with(|state| {
                state.set_last_detection(Some(back));
                state.set_last_detection_front(Some(front));
                state.set_last_orientation(Some(orientation));
            });
            self.ctx.store.changed();

            if self.significant_change(&observation.obstacles) {
                debug!("scene changed, swapping obstacle grid");
                self.ctx.store.with(|state| state.set_obstacles(observation.obstacles));
                self.ctx.scene_update.trigger();
            }
        }

        if self.ctx.store.with(|state| state.arrived) {
            self.celebration.run().await;
            self.ctx.store.with(|state| {
                state.set_end(None);
                state.set_path(None);
                state.set_next_waypoint_index(None);
                state.set_arrived(false);
            });
            self.ctx.store.changed();
        }
    }

    /// True when the camera grid differs from the current one by more than
    /// the scene threshold (L1 distance over all cells).
    fn significant_change(&self, obstacles: &Map) -> bool {
        self.ctx.store.with(|state| l1_distance(&state.obstacles, obstacles) > SCENE_THRESHOLD)
    }
}
