//! Homography estimation for the overhead camera.
//!
//! Four image-space corner points map the arena quadrilateral onto the
//! rectified L×L square. With exactly four correspondences the DLT system
//! is square, so a direct 8×8 solve replaces the usual SVD.

use nalgebra::{Matrix3, SMatrix, SVector};

/// Destination corners of the rectified table, clockwise from the origin.
pub fn rectified_corners(side_px: usize) -> [[f64; 2]; 4] {
    let l = side_px as f64 - 1.0;
    [[0.0, 0.0], [l, 0.0], [l, l], [0.0, l]]
}

/// Estimate the 3×3 homography mapping `src[i] → dst[i]`.
/// Returns `None` for degenerate (collinear) corner sets.
pub fn homography_from_corners(
    src: &[[f64; 2]; 4],
    dst: &[[f64; 2]; 4],
) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let [x, y] = src[i];
        let [u, v] = dst[i];

        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Apply a homography to a point.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
    (
        (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w,
        (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w,
    )
}
