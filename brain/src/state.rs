//! The combined state of the application.
//!
//! Centralising the shared world model lets every module read it directly
//! and the WebSocket server mirror it to operator clients. Mutation goes
//! through typed setters that record `(field, value)` into every registered
//! listener's pending patch; `changed()` is a separate, explicit wake so a
//! burst of mutations coalesces into one notification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arena_types::{Rect, Vec2};
use grid_nav::Map;
use serde_json::{json, Value};

use crate::config::{PHYSICAL_SIZE_CM, SUBDIVISIONS};
use crate::sync::Signal;

pub type Patch = serde_json::Map<String, Value>;

// ── State record ──────────────────────────────────────────────────────────────

pub struct State {
    // == Filtering == //
    pub position: Option<Vec2>,
    pub orientation: Option<f64>,

    // == Navigation == //
    pub end: Option<Vec2>,
    pub arrived: bool,

    // == Global navigation == //
    pub path: Option<Vec<Vec2>>,
    pub next_waypoint_index: Option<usize>,
    pub obstacles: Map,
    pub extra_obstacles: Vec<Rect>,
    pub boundary_map: Option<Map>,
    pub computation_time: Option<f64>,
    pub optimise: bool,

    // == Vision == //
    pub subdivisions: usize,
    pub physical_size: f64,
    pub last_detection: Option<Vec2>,
    pub last_detection_front: Option<Vec2>,
    pub last_orientation: Option<f64>,

    // == Local navigation == //
    pub prox_sensors: Vec<i32>,
    pub relative_distances: Vec<f64>,
    pub reactive_control: bool,
    pub dist: Option<f64>,

    listeners: HashMap<u64, Arc<ListenerSlot>>,
    next_listener_id: u64,
}

impl State {
    fn new() -> Self {
        Self {
            position: None,
            orientation: None,
            end: None,
            arrived: false,
            path: None,
            next_waypoint_index: None,
            obstacles: Map::zeros((SUBDIVISIONS, SUBDIVISIONS)),
            extra_obstacles: Vec::new(),
            boundary_map: None,
            computation_time: None,
            optimise: false,
            subdivisions: SUBDIVISIONS,
            physical_size: PHYSICAL_SIZE_CM,
            last_detection: None,
            last_detection_front: None,
            last_orientation: None,
            prox_sensors: Vec::new(),
            relative_distances: Vec::new(),
            reactive_control: false,
            dist: None,
            listeners: HashMap::new(),
            next_listener_id: 0,
        }
    }

    fn record(&mut self, field: &str, value: Value) {
        for slot in self.listeners.values() {
            slot.pending
                .lock()
                .expect("listener patch poisoned")
                .insert(field.to_string(), value.clone());
        }
    }

    // == Typed setters == //

    pub fn set_position(&mut self, position: Option<Vec2>) {
        self.position = position;
        self.record("position", json!(position));
    }

    pub fn set_orientation(&mut self, orientation: Option<f64>) {
        self.orientation = orientation;
        self.record("orientation", json!(orientation));
    }

    pub fn set_end(&mut self, end: Option<Vec2>) {
        self.end = end;
        self.record("end", json!(end));
    }

    pub fn set_arrived(&mut self, arrived: bool) {
        self.arrived = arrived;
        self.record("arrived", json!(arrived));
    }

    pub fn set_path(&mut self, path: Option<Vec<Vec2>>) {
        self.path = path;
        self.record("path", json!(self.path));
    }

    pub fn set_next_waypoint_index(&mut self, index: Option<usize>) {
        self.next_waypoint_index = index;
        self.record("next_waypoint_index", json!(index));
    }

    pub fn set_obstacles(&mut self, obstacles: Map) {
        self.obstacles = obstacles;
        self.record("obstacles", grid_json(&self.obstacles));
    }

    pub fn push_extra_obstacle(&mut self, rect: Rect) {
        self.extra_obstacles.push(rect.normalised());
        self.record("extra_obstacles", json!(self.extra_obstacles));
    }

    pub fn clear_extra_obstacles(&mut self) {
        self.extra_obstacles.clear();
        self.record("extra_obstacles", json!(self.extra_obstacles));
    }

    pub fn set_boundary_map(&mut self, map: Option<Map>) {
        self.boundary_map = map;
        let value = match &self.boundary_map {
            Some(m) => grid_json(m),
            None => Value::Null,
        };
        self.record("boundary_map", value);
    }

    pub fn set_computation_time(&mut self, secs: Option<f64>) {
        self.computation_time = secs;
        self.record("computation_time", json!(secs));
    }

    pub fn set_optimise(&mut self, optimise: bool) {
        self.optimise = optimise;
        self.record("optimise", json!(optimise));
    }

    pub fn set_last_detection(&mut self, detection: Option<Vec2>) {
        self.last_detection = detection;
        self.record("last_detection", json!(detection));
    }

    pub fn set_last_detection_front(&mut self, detection: Option<Vec2>) {
        self.last_detection_front = detection;
        self.record("last_detection_front", json!(detection));
    }

    pub fn set_last_orientation(&mut self, orientation: Option<f64>) {
        self.last_orientation = orientation;
        self.record("last_orientation", json!(orientation));
    }

    pub fn set_prox_sensors(&mut self, readings: Vec<i32>) {
        self.prox_sensors = readings;
        self.record("prox_sensors", json!(self.prox_sensors));
    }

    pub fn set_relative_distances(&mut self, distances: Vec<f64>) {
        self.relative_distances = distances;
        self.record("relative_distances", json!(self.relative_distances));
    }

    pub fn set_reactive_control(&mut self, reactive: bool) {
        self.reactive_control = reactive;
        self.record("reactive_control", json!(reactive));
    }

    pub fn set_dist(&mut self, dist: Option<f64>) {
        self.dist = dist;
        self.record("dist", json!(dist));
    }

    /// Full snapshot for the `state` hello message.
    pub fn to_json(&self) -> Value {
        json!({
            "position": self.position,
            "orientation": self.orientation,
            "end": self.end,
            "arrived": self.arrived,
            "path": self.path,
            "next_waypoint_index": self.next_waypoint_index,
            "obstacles": grid_json(&self.obstacles),
            "extra_obstacles": self.extra_obstacles,
            "boundary_map": self.boundary_map.as_ref().map(grid_json),
            "computation_time": self.computation_time,
            "optimise": self.optimise,
            "subdivisions": self.subdivisions,
            "physical_size": self.physical_size,
            "last_detection": self.last_detection,
            "last_detection_front": self.last_detection_front,
            "last_orientation": self.last_orientation,
            "prox_sensors": self.prox_sensors,
            "relative_distances": self.relative_distances,
            "reactive_control": self.reactive_control,
            "dist": self.dist,
        })
    }
}

fn grid_json(map: &Map) -> Value {
    let rows: Vec<Vec<i8>> = map.rows().into_iter().map(|r| r.to_vec()).collect();
    json!(rows)
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Handle to the process-wide state. Mutations are synchronous and must not
/// be held across an await; the dirty signal is fired separately through
/// [`Store::changed`].
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<State>>,
    dirty: Signal,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(State::new())), dirty: Signal::new() }
    }

    /// Run a closure against the locked state.
    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.inner.lock().expect("state poisoned");
        f(&mut state)
    }

    /// Wake every task waiting for the state to change.
    pub fn changed(&self) {
        self.dirty.trigger();
    }

    pub fn to_json(&self) -> Value {
        self.with(|state| state.to_json())
    }

    pub fn register_listener(&self) -> ChangeListener {
        let slot = Arc::new(ListenerSlot::default());
        let id = self.with(|state| {
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.insert(id, slot.clone());
            id
        });
        ChangeListener { id, slot, inner: self.inner.clone(), dirty: self.dirty.clone() }
    }
}

// ── Change listeners ──────────────────────────────────────────────────────────

#[derive(Default)]
struct ListenerSlot {
    pending: Mutex<Patch>,
}

/// Accumulates the fields assigned since the last patch was taken. One per
/// connected operator client; deregisters itself on drop.
pub struct ChangeListener {
    id: u64,
    slot: Arc<ListenerSlot>,
    inner: Arc<Mutex<State>>,
    dirty: Signal,
}

impl ChangeListener {
    /// Return and clear the accumulated patch.
    pub fn take_patch(&self) -> Patch {
        let mut pending = self.slot.pending.lock().expect("listener patch poisoned");
        std::mem::take(&mut *pending)
    }

    /// Wait until a state change leaves a non-empty patch, then take it.
    pub async fn wait_for_patch(&self) -> Patch {
        loop {
            let patch = self.take_patch();
            if !patch.is_empty() {
                return patch;
            }
            self.dirty.wait().await;
        }
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.lock() {
            state.listeners.remove(&self.id);
        }
    }
}
