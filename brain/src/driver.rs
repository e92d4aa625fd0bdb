//! Robot driver transport contract.
//!
//! The real robot speaks a variable-watching RPC protocol: subscribers get a
//! callback with every changed variable map, and writes go through
//! `set_variables`. That endpoint is an external collaborator; this module
//! pins down the contract and provides an in-memory loopback used by the
//! default run mode and the tests.
//!
//! Callbacks are dispatched with the error isolation the driver requires:
//! a failing event processor is logged and the event dropped, never
//! propagated back into the driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

/// One driver event: every variable that changed, by name.
pub type VariableMap = HashMap<String, Vec<i32>>;

pub type VariableListener = Arc<dyn Fn(&VariableMap) + Send + Sync>;

pub const VAR_MOTOR_LEFT_SPEED: &str = "motor.left.speed";
pub const VAR_MOTOR_RIGHT_SPEED: &str = "motor.right.speed";
pub const VAR_MOTOR_LEFT_TARGET: &str = "motor.left.target";
pub const VAR_MOTOR_RIGHT_TARGET: &str = "motor.right.target";
pub const VAR_PROX_HORIZONTAL: &str = "prox.horizontal";

/// Robot nodes reachable over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// The differential-drive robot itself.
    Drive,
    /// Optional auxiliary actuator (the arm node).
    Aux,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver connection closed")]
    ConnectionClosed,
    #[error("node {0:?} is not connected")]
    UnknownNode(NodeId),
}

// ── Transport contract ────────────────────────────────────────────────────────

pub type WatchId = u64;

pub trait Transport: Send + Sync + 'static {
    /// Subscribe to drive-node variable changes.
    fn watch(&self, listener: VariableListener) -> WatchId;

    fn unwatch(&self, id: WatchId);

    /// Write driver-native variable values to a node.
    fn set_variables(&self, node: NodeId, variables: VariableMap) -> Result<(), DriverError>;

    /// Whether the auxiliary actuator node is present.
    fn has_aux(&self) -> bool;
}

/// Subscription handle; deregisters the callback on drop.
pub struct WatchGuard {
    transport: Arc<dyn Transport>,
    id: WatchId,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.transport.unwatch(self.id);
    }
}

// ── Event processing ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The event did not carry a variable this processor needs. Routine:
    /// the driver only sends what changed.
    #[error("variable {0} absent from event")]
    MissingVariable(&'static str),
    #[error("{0}")]
    Failed(String),
}

/// Fetch a required variable from an event.
pub fn variable<'a>(
    variables: &'a VariableMap,
    key: &'static str,
) -> Result<&'a [i32], ProcessError> {
    variables
        .get(key)
        .map(Vec::as_slice)
        .ok_or(ProcessError::MissingVariable(key))
}

/// Register an event processor on the transport. The handler runs to
/// completion inside the driver callback; errors are caught and logged so
/// they never reach the driver.
pub fn watch_events<F>(
    transport: &Arc<dyn Transport>,
    name: &'static str,
    handler: F,
) -> WatchGuard
where
    F: FnMut(&VariableMap) -> Result<(), ProcessError> + Send + 'static,
{
    let handler = Mutex::new(handler);
    let listener: VariableListener = Arc::new(move |variables: &VariableMap| {
        let mut handler = handler.lock().expect("event handler poisoned");
        match (*handler)(variables) {
            Ok(()) => {}
            Err(ProcessError::MissingVariable(_)) => {}
            Err(error) => warn!("[{name}] process_event failed: {error}"),
        }
    });

    let id = transport.watch(listener);
    debug!("[{name}] watching driver events");
    WatchGuard { transport: transport.clone(), id }
}

// ── Loopback transport ────────────────────────────────────────────────────────

/// In-memory transport: written variables are stored per node, and motor
/// targets written to the drive node echo back as speed readings, closing
/// the odometry loop without hardware.
pub struct LoopbackTransport {
    listeners: Mutex<HashMap<WatchId, VariableListener>>,
    nodes: Mutex<HashMap<NodeId, VariableMap>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    aux: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::with_aux(false)
    }

    pub fn with_aux(aux: bool) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            aux,
        }
    }

    /// Deliver a variable event to every subscriber, as the driver would.
    pub fn inject(&self, variables: VariableMap) {
        let listeners: Vec<VariableListener> = {
            let registered = self.listeners.lock().expect("listeners poisoned");
            registered.values().cloned().collect()
        };
        for listener in listeners {
            (*listener)(&variables);
        }
    }

    /// Simulate the driver connection dropping.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Last written variables of a node (for tests and the loopback echo).
    pub fn node_variables(&self, node: NodeId) -> VariableMap {
        self.nodes.lock().expect("nodes poisoned").get(&node).cloned().unwrap_or_default()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn watch(&self, listener: VariableListener) -> WatchId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().expect("listeners poisoned").insert(id, listener);
        id
    }

    fn unwatch(&self, id: WatchId) {
        self.listeners.lock().expect("listeners poisoned").remove(&id);
    }

    fn set_variables(&self, node: NodeId, variables: VariableMap) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionClosed);
        }
        if node == NodeId::Aux && !self.aux {
            return Err(DriverError::UnknownNode(node));
        }

        // Echo changed drive motor targets back as speed readings. Only
        // changes produce events, matching the variable-watch semantics of
        // the real driver.
        let mut event = VariableMap::new();
        {
            let mut nodes = self.nodes.lock().expect("nodes poisoned");
            let stored = nodes.entry(node).or_default();
            for (key, value) in variables {
                let changed = stored.get(&key) != Some(&value);
                if changed && node == NodeId::Drive {
                    if key == VAR_MOTOR_LEFT_TARGET {
                        event.insert(VAR_MOTOR_LEFT_SPEED.to_string(), value.clone());
                    } else if key == VAR_MOTOR_RIGHT_TARGET {
                        event.insert(VAR_MOTOR_RIGHT_SPEED.to_string(), value.clone());
                    }
                }
                stored.insert(key, value);
            }
        }
        if !event.is_empty() {
            self.inject(event);
        }

        Ok(())
    }

    fn has_aux(&self) -> bool {
        self.aux
    }
}
