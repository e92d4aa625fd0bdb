//! Arrival routine: a half turn on the spot, then the auxiliary arm drops
//! its payload and returns. Everything here is plain "set motor targets on
//! node X" with timed sleeps.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{
    CELEBRATE_ON_AUX, DROP_HOLD_SECS, DROP_SECS, DROP_SPEED, HALF_TURN_SECS, HALF_TURN_SPEED,
};
use crate::driver::{NodeId, Transport, VariableMap, VAR_MOTOR_LEFT_TARGET, VAR_MOTOR_RIGHT_TARGET};

pub struct Celebration {
    transport: Arc<dyn Transport>,
}

impl Celebration {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The full routine, run once the goal is reached.
    pub async fn run(&self) {
        info!("goal reached, celebrating");
        self.stop_robot();

        let turn_node = if CELEBRATE_ON_AUX && self.transport.has_aux() {
            NodeId::Aux
        } else {
            NodeId::Drive
        };
        self.half_turn(turn_node).await;

        if self.transport.has_aux() {
            self.drop_bauble().await;
        }
    }

    pub fn stop_robot(&self) {
        self.set_motors(NodeId::Drive, 0, 0);
    }

    /// 180° in-place rotation.
    async fn half_turn(&self, node: NodeId) {
        self.set_motors(node, HALF_TURN_SPEED, -HALF_TURN_SPEED);
        tokio::time::sleep(Duration::from_secs_f64(HALF_TURN_SECS)).await;
        self.set_motors(node, 0, 0);
    }

    /// Lower the arm, hold, and raise it back.
    async fn drop_bauble(&self) {
        self.set_motors(NodeId::Aux, DROP_SPEED, DROP_SPEED);
        tokio::time::sleep(Duration::from_secs_f64(DROP_SECS)).await;

        self.set_motors(NodeId::Aux, 0, 0);
        tokio::time::sleep(Duration::from_secs_f64(DROP_HOLD_SECS)).await;

        self.set_motors(NodeId::Aux, -DROP_SPEED, -DROP_SPEED);
        tokio::time::sleep(Duration::from_secs_f64(DROP_SECS)).await;

        self.set_motors(NodeId::Aux, 0, 0);
    }

    fn set_motors(&self, node: NodeId, left: i32, right: i32) {
        let mut vars = VariableMap::new();
        vars.insert(VAR_MOTOR_LEFT_TARGET.to_string(), vec![left]);
        vars.insert(VAR_MOTOR_RIGHT_TARGET.to_string(), vec![right]);
        if let Err(error) = self.transport.set_variables(node, vars) {
            warn!("celebration motor write failed: {error}");
        }
    }
}
