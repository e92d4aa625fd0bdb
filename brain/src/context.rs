//! The capabilities shared by every module.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::driver::Transport;
use crate::filtering::PoseEvent;
use crate::pool::Pool;
use crate::state::Store;
use crate::sync::{Channel, Signal};

/// Wiring hub handed to the modules. Each module only touches the pieces it
/// needs; ownership of the tasks stays with the coordinator at the root.
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    /// Fired when the obstacle map or goal changed enough to replan.
    pub scene_update: Signal,
    /// Fired after every estimator step.
    pub pose_update: Signal,
    /// Serialised estimator inputs: wheel odometry and pose observations.
    pub pose_events: Channel<PoseEvent>,
    pub pool: Pool,
    pub transport: Arc<dyn Transport>,
    /// Requests a clean process shutdown (operator `stop`, driver loss).
    pub shutdown: mpsc::UnboundedSender<()>,
}

impl Context {
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: Pool,
        shutdown: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            store: Store::new(),
            scene_update: Signal::new(),
            pose_update: Signal::new(),
            pose_events: Channel::new(),
            pool,
            transport,
            shutdown,
        }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
