//! # grid-nav
//!
//! Grid-based global planning for the arena robot.
//!
//! The crate is deliberately free of async machinery and shared state: every
//! entry point takes a value snapshot and returns a value, so the heavy work
//! can be shipped to a worker pool without blocking the coordination loop.
//!
//! ## Pipeline
//!
//! 1. [`map::compile_map`]: merge operator-drawn rectangles into the camera
//!    obstacle grid and inflate everything by the robot's safety radius.
//! 2. [`graph::SquareGrid`]: 8-connected grid over the inflated map.
//! 3. [`dijkstra::find_path`]: shortest path, binary-heap frontier.
//! 4. [`optimise::PathOptimiser`]: drop interior waypoints whose neighbours
//!    see each other across free cells only.
//!
//! [`plan::plan_route`] bundles the search and optimisation into the single
//! profiled function handed to the pool.

pub mod dijkstra;
pub mod graph;
pub mod map;
pub mod optimise;
pub mod plan;

pub use dijkstra::{find_path, path_cost};
pub use graph::SquareGrid;
pub use map::{compile_map, disk_kernel, inflate, l1_distance, Map};
pub use optimise::{raytrace, PathOptimiser};
pub use plan::{plan_route, PlanOutcome, PlanRequest};
