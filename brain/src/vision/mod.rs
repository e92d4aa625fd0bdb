//! Perception pipeline.
//!
//! One observation per invocation: rectify the camera frame through the
//! calibrated homography, denoise, extract the obstacle grid by colour,
//! and locate the two robot landmarks by disk matching. Calibration (the
//! four arena corners and the two landmark seed colours) is collected by an
//! external UI and read from a TOML file here.

pub mod homography;
pub mod imgproc;

use std::path::Path;

use nalgebra::Matrix3;
use ndarray::Array2;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use arena_types::Vec2;
use grid_nav::Map;

use crate::config::{
    BILATERAL_DIAMETER, BILATERAL_SIGMA_COLOR, BILATERAL_SIGMA_SPACE, CELL_OCCUPANCY_THRESHOLD,
    ISOLATE_THRESHOLD, LANDMARK_DETECTION_THRESHOLD, LANDMARK_PIXEL_OFFSET, LM_BACK_CM,
    LM_FRONT_CM, OBSTACLE_COLOR_HIGH, OBSTACLE_COLOR_LOW, PHYSICAL_SIZE_CM, PIXELS_PER_CM,
    SEED_COLOR_TOLERANCE, SUBDIVISIONS, TABLE_LEN_PX,
};
use crate::pool::Pool;

use imgproc::Image;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("cannot open frame source: {0}")]
    CaptureOpen(String),
    #[error("frame grab failed: {0}")]
    FrameGrab(String),
    #[error("calibration file unreadable: {0}")]
    CalibrationFile(String),
    #[error("calibration corners are degenerate")]
    DegenerateCorners,
    #[error("homography has not been established")]
    NotCalibrated,
}

// ── Frame sources ─────────────────────────────────────────────────────────────

/// Yields BGR frames. The live camera grabber is an external collaborator
/// implementing this trait; the still-image source is the fallback path.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<Image, VisionError>;
}

/// Replays a single decoded image, used when no camera is attached.
pub struct StillFrameSource {
    frame: Image,
}

impl StillFrameSource {
    pub fn open(path: &Path) -> Result<Self, VisionError> {
        let decoded = image::open(path)
            .map_err(|e| VisionError::CaptureOpen(format!("{}: {e}", path.display())))?
            .to_rgb8();

        let (w, h) = decoded.dimensions();
        let mut frame = Image::zeros((h as usize, w as usize, 3));
        for (x, y, pixel) in decoded.enumerate_pixels() {
            // Stored BGR, matching the camera contract.
            frame[(y as usize, x as usize, 0)] = pixel[2];
            frame[(y as usize, x as usize, 1)] = pixel[1];
            frame[(y as usize, x as usize, 2)] = pixel[0];
        }
        Ok(Self { frame })
    }
}

impl FrameSource for StillFrameSource {
    fn grab(&mut self) -> Result<Image, VisionError> {
        Ok(self.frame.clone())
    }
}

// ── Calibration ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Calibration {
    /// Image-space arena corners, clockwise from the arena origin.
    pub corners: [[f64; 2]; 4],
    pub colors: CalibrationColors,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationColors {
    /// Seed BGR colour of the back (position) landmark.
    pub back: [u8; 3],
    /// Seed BGR colour of the front (heading) landmark.
    pub front: [u8; 3],
}

impl Calibration {
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VisionError::CalibrationFile(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| VisionError::CalibrationFile(e.to_string()))
    }
}

/// Value snapshot shipped to the pool with each frame.
#[derive(Clone)]
pub struct Prepared {
    pub h: Matrix3<f64>,
    pub back_seed: [u8; 3],
    pub front_seed: [u8; 3],
}

// ── Observation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Observation {
    /// N×N obstacle grid in arena orientation.
    pub obstacles: Map,
    /// Back landmark centre, physical cm.
    pub back: Vec2,
    /// Front landmark centre, physical cm.
    pub front: Vec2,
}

// ── Vision module ─────────────────────────────────────────────────────────────

pub struct Vision {
    source: Box<dyn FrameSource>,
    calibration: Calibration,
    prepared: Option<Prepared>,
}

impl Vision {
    pub fn new(source: Box<dyn FrameSource>, calibration: Calibration) -> Self {
        Self { source, calibration, prepared: None }
    }

    /// Establish the homography. Fails when the source cannot produce a
    /// frame or the corners are degenerate; both abort the run.
    pub fn calibrate(&mut self) -> Result<(), VisionError> {
        self.source.grab()?;

        let dst = homography::rectified_corners(TABLE_LEN_PX);
        let h = homography::homography_from_corners(&self.calibration.corners, &dst)
            .ok_or(VisionError::DegenerateCorners)?;

        self.prepared = Some(Prepared {
            h,
            back_seed: self.calibration.colors.back,
            front_seed: self.calibration.colors.front,
        });
        Ok(())
    }

    /// Produce the next observation, processing the frame on the pool.
    /// Missing frames and undetected landmarks are transient: `None`.
    pub async fn next(&mut self, pool: &Pool) -> Option<Observation> {
        let Some(prepared) = self.prepared.clone() else {
            debug!("frame skipped: {}", VisionError::NotCalibrated);
            return None;
        };
        let frame = match self.source.grab() {
            Ok(frame) => frame,
            Err(error) => {
                debug!("frame skipped: {error}");
                return None;
            }
        };

        pool.run(move || process_frame(&frame, &prepared)).await.flatten()
    }
}

// ── Per-frame processing ──────────────────────────────────────────────────────

/// Steps: rectify → denoise → obstacle grid → landmarks → physical coords.
pub fn process_frame(frame: &Image, prepared: &Prepared) -> Option<Observation> {
    let side = TABLE_LEN_PX;
    let warped = imgproc::warp_perspective(frame, &prepared.h, side, side);
    let smooth = imgproc::bilateral_filter(
        &warped,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    );

    let obstacles = extract_obstacles(&smooth);

    let back = detect_landmark(&smooth, prepared.back_seed, LM_BACK_CM)?;
    let front = detect_landmark(&smooth, prepared.front_seed, LM_FRONT_CM)?;

    Some(Observation {
        obstacles,
        back: landmark_to_physical(back),
        front: landmark_to_physical(front),
    })
}

fn extract_obstacles(table: &Image) -> Map {
    let mut mask = imgproc::in_range(table, OBSTACLE_COLOR_LOW, OBSTACLE_COLOR_HIGH);
    imgproc::zero_border(&mut mask, PIXELS_PER_CM);

    let means = imgproc::resize_area(&mask, SUBDIVISIONS);
    let flipped = imgproc::flip_vertical(&means);
    let grid: Map = flipped.mapv(|v| i8::from(v >= CELL_OCCUPANCY_THRESHOLD));

    // Isolated cells are sensor noise, not obstacles.
    let ones = Array2::<i8>::ones((3, 3));
    let counts = grid_nav::map::convolve2d_same(&grid, &ones);
    let mut cleaned = grid;
    for ((y, x), count) in counts.indexed_iter() {
        if *count <= ISOLATE_THRESHOLD {
            cleaned[(y, x)] = 0;
        }
    }
    cleaned
}

/// Disk-match one landmark. `None` when the best score stays under the
/// detection threshold.
fn detect_landmark(table: &Image, seed: [u8; 3], diameter_cm: f64) -> Option<(f64, f64)> {
    let low = [
        seed[0].saturating_sub(SEED_COLOR_TOLERANCE),
        seed[1].saturating_sub(SEED_COLOR_TOLERANCE),
        seed[2].saturating_sub(SEED_COLOR_TOLERANCE),
    ];
    let high = [
        seed[0].saturating_add(SEED_COLOR_TOLERANCE),
        seed[1].saturating_add(SEED_COLOR_TOLERANCE),
        seed[2].saturating_add(SEED_COLOR_TOLERANCE),
    ];

    let mask = imgproc::in_range(table, low, high).mapv(|v| v as f32);
    let kernel = imgproc::disk_kernel(diameter_cm * PIXELS_PER_CM as f64);
    let scores = imgproc::convolve2d_same(&mask, &kernel);

    let (best, x, y) = imgproc::get_maximum(&scores);
    if best < LANDMARK_DETECTION_THRESHOLD {
        return None;
    }

    Some((x as f64 + LANDMARK_PIXEL_OFFSET, y as f64 + LANDMARK_PIXEL_OFFSET))
}

/// Rectified pixels → physical cm, flipping the image y axis into the
/// arena's y-up convention.
fn landmark_to_physical((x, y): (f64, f64)) -> Vec2 {
    let side = TABLE_LEN_PX as f64;
    let scale = PHYSICAL_SIZE_CM / side;
    Vec2::new(x * scale, (side - y) * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACK_SEED: [u8; 3] = [180, 150, 220];
    const FRONT_SEED: [u8; 3] = [200, 30, 20];

    fn prepared_identity() -> Prepared {
        Prepared { h: Matrix3::identity(), back_seed: BACK_SEED, front_seed: FRONT_SEED }
    }

    fn blank_table(color: [u8; 3]) -> Image {
        let mut img = Image::zeros((TABLE_LEN_PX, TABLE_LEN_PX, 3));
        for y in 0..TABLE_LEN_PX {
            for x in 0..TABLE_LEN_PX {
                for c in 0..3 {
                    img[(y, x, c)] = color[c];
                }
            }
        }
        img
    }

    fn paint_disk(img: &mut Image, cx: usize, cy: usize, radius: usize, color: [u8; 3]) {
        for y in cy.saturating_sub(radius)..(cy + radius + 1).min(TABLE_LEN_PX) {
            for x in cx.saturating_sub(radius)..(cx + radius + 1).min(TABLE_LEN_PX) {
                let dy = y as i64 - cy as i64;
                let dx = x as i64 - cx as i64;
                if dx * dx + dy * dy <= (radius * radius) as i64 {
                    for c in 0..3 {
                        img[(y, x, c)] = color[c];
                    }
                }
            }
        }
    }

    fn paint_square(img: &mut Image, x0: usize, y0: usize, side: usize, color: [u8; 3]) {
        for y in y0..(y0 + side).min(TABLE_LEN_PX) {
            for x in x0..(x0 + side).min(TABLE_LEN_PX) {
                for c in 0..3 {
                    img[(y, x, c)] = color[c];
                }
            }
        }
    }

    #[test]
    fn landmarks_resolve_to_physical_coordinates() {
        let mut table = blank_table([120, 120, 120]);
        // Painted at the matched kernel size so the score peak is unique.
        paint_disk(&mut table, 60, 200, 16, BACK_SEED);
        paint_disk(&mut table, 100, 180, 13, FRONT_SEED);

        let obs = process_frame(&table, &prepared_identity()).expect("landmarks present");

        let scale = PHYSICAL_SIZE_CM / TABLE_LEN_PX as f64;
        let expected_back = Vec2::new(60.0 * scale, (TABLE_LEN_PX as f64 - 200.0) * scale);
        let expected_front = Vec2::new(100.0 * scale, (TABLE_LEN_PX as f64 - 180.0) * scale);

        assert!(obs.back.dist(&expected_back) < 3.0 * scale, "back at {:?}", obs.back);
        assert!(obs.front.dist(&expected_front) < 3.0 * scale, "front at {:?}", obs.front);
    }

    #[test]
    fn missing_landmark_skips_the_observation() {
        let mut table = blank_table([120, 120, 120]);
        paint_disk(&mut table, 60, 200, 9, BACK_SEED);
        // No front landmark painted.
        assert!(process_frame(&table, &prepared_identity()).is_none());
    }

    #[test]
    fn a_few_stray_pixels_stay_below_the_detection_threshold() {
        let mut table = blank_table([120, 120, 120]);
        paint_disk(&mut table, 60, 200, 9, BACK_SEED);
        // Front seed colour appears only as a 2×2 speck.
        paint_square(&mut table, 150, 150, 2, FRONT_SEED);
        assert!(process_frame(&table, &prepared_identity()).is_none());
    }

    #[test]
    fn obstacles_land_in_flipped_grid_cells() {
        let mut table = blank_table([120, 120, 120]);
        // Black square near the image top-left, clear of the border band.
        paint_square(&mut table, 20, 20, 40, [10, 10, 10]);
        paint_disk(&mut table, 200, 250, 9, BACK_SEED);
        paint_disk(&mut table, 240, 250, 8, FRONT_SEED);

        let obs = process_frame(&table, &prepared_identity()).expect("observation");
        assert_eq!(obs.obstacles.dim(), (SUBDIVISIONS, SUBDIVISIONS));

        // Image top → arena high y → high row index after the flip.
        let px_per_cell = TABLE_LEN_PX as f64 / SUBDIVISIONS as f64;
        let col = (40.0 / px_per_cell) as usize;
        let row = SUBDIVISIONS - 1 - (40.0 / px_per_cell) as usize;
        assert_eq!(obs.obstacles[(row, col)], 1, "expected occupancy at ({row}, {col})");

        // The far corner stays free.
        assert_eq!(obs.obstacles[(5, 55)], 0);
    }

    #[test]
    fn isolated_cells_are_scrubbed() {
        let mut table = blank_table([120, 120, 120]);
        // A speck covering a single grid cell.
        paint_square(&mut table, 100, 100, 4, [10, 10, 10]);
        let grid = extract_obstacles(&table);
        assert_eq!(grid.sum(), 0, "speck should be removed as noise");

        // A solid block survives.
        paint_square(&mut table, 100, 100, 40, [10, 10, 10]);
        let grid = extract_obstacles(&table);
        assert!(grid.sum() > 0);
    }
}
