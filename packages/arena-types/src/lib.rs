//! # arena-types
//!
//! Shared geometry and world-model types for the arena robot brain.
//!
//! These types are used by:
//! - `brain`: pose estimation, motion control, the operator WebSocket
//! - `grid-nav`: grid-based global planning (value-only snapshots)
//!
//! ## Coordinate Conventions
//!
//! - **Arena frame**: right-hand, origin at the bottom-left corner of the
//!   table, X to the right, Y up, units in centimetres.
//! - **Grid frame**: integer cells over an N×N subdivision of the arena,
//!   cell (0, 0) at the arena origin.
//! - **Heading**: radians from the arena X axis, wrapped to `(−π, π]`.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

// ── 2D vector (arena frame, centimetres) ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: &Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(&self, s: f64) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dist(&self, other: &Vec2) -> f64 {
        self.sub(other).norm()
    }

    /// Angle of the vector `self → other` from the X axis, radians.
    pub fn angle_to(&self, other: &Vec2) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// L-infinity distance, used by the outlier gates.
    pub fn linf_dist(&self, other: &Vec2) -> f64 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

// ── Planar pose ───────────────────────────────────────────────────────────────

/// Robot pose in the arena frame. `theta` is always wrapped to `(−π, π]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta: wrap_angle(theta) }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Wrap an angle into `(−π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let r = angle.rem_euclid(TAU);
    if r > PI {
        r - TAU
    } else {
        r
    }
}

// ── Axis-aligned obstacle rectangle ──────────────────────────────────────────

/// Extra obstacle in physical coordinates, as drawn by the operator.
/// `normalised` rearranges the corners so `a` carries the componentwise
/// minimum and `b` the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub a: Vec2,
    pub b: Vec2,
}

impl Rect {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self { a, b }
    }

    pub fn normalised(&self) -> Rect {
        Rect {
            a: Vec2::new(self.a.x.min(self.b.x), self.a.y.min(self.b.y)),
            b: Vec2::new(self.a.x.max(self.b.x), self.a.y.max(self.b.y)),
        }
    }
}

// ── Grid cells ────────────────────────────────────────────────────────────────

/// One cell of the N×N planning grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Conversion between physical arena coordinates and grid cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridFrame {
    pub subdivisions: usize,
    pub physical_size: f64,
}

impl GridFrame {
    pub fn new(subdivisions: usize, physical_size: f64) -> Self {
        Self { subdivisions, physical_size }
    }

    /// Physical point → containing grid cell, clamped to the grid bounds.
    pub fn to_cell(&self, point: Vec2) -> Cell {
        let factor = self.subdivisions as f64 / self.physical_size;
        let max = self.subdivisions as i32 - 1;
        Cell::new(
            ((point.x * factor) as i32).clamp(0, max),
            ((point.y * factor) as i32).clamp(0, max),
        )
    }

    /// Grid cell → physical coordinates of its centre.
    pub fn to_physical(&self, cell: Cell) -> Vec2 {
        let factor = self.physical_size / self.subdivisions as f64;
        Vec2::new(
            (cell.x as f64 + 0.5) * factor,
            (cell.y as f64 + 0.5) * factor,
        )
    }
}
