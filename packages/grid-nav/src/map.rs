//! Obstacle map compilation: rectangle rasterisation, disk-kernel inflation
//! and the change metric used to gate replanning.

use arena_types::Cell;
use ndarray::Array2;

/// N×N obstacle grid. 1 = occupied, 0 = free.
pub type Map = Array2<i8>;

/// Build a disk-shaped convolution kernel of the given radius in cells.
/// A radius of zero yields the 1×1 identity kernel.
pub fn disk_kernel(radius: f64) -> Array2<i8> {
    let size = (radius * 2.0) as usize + 1;
    let mut kernel = Array2::<i8>::zeros((size, size));

    for i in 0..size {
        for j in 0..size {
            let di = i as f64 - radius;
            let dj = j as f64 - radius;
            if di * di + dj * dj <= radius * radius {
                kernel[(i, j)] = 1;
            }
        }
    }

    kernel
}

/// 2D convolution with zero fill, output the same shape as the input.
/// Accumulates into i32 so a fully-covered kernel cannot wrap.
pub fn convolve2d_same(map: &Map, kernel: &Array2<i8>) -> Array2<i32> {
    let (h, w) = map.dim();
    let (kh, kw) = kernel.dim();
    let (ch, cw) = (kh as i32 / 2, kw as i32 / 2);

    let mut out = Array2::<i32>::zeros((h, w));
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut acc = 0i32;
            for ky in 0..kh as i32 {
                for kx in 0..kw as i32 {
                    let sy = y + ky - ch;
                    let sx = x + kx - cw;
                    if sy < 0 || sx < 0 || sy >= h as i32 || sx >= w as i32 {
                        continue;
                    }
                    acc += map[(sy as usize, sx as usize)] as i32
                        * kernel[(ky as usize, kx as usize)] as i32;
                }
            }
            out[(y as usize, x as usize)] = acc;
        }
    }
    out
}

/// Grow every obstacle by a disk of the given radius (in cells). Any cell
/// the disk touches becomes occupied; planning treats nonzero as forbidden.
pub fn inflate(map: &Map, radius: f64) -> Map {
    let kernel = disk_kernel(radius);
    convolve2d_same(map, &kernel).mapv(|v| i8::from(v > 0))
}

/// Mark the cells covered by a cell-space rectangle as occupied.
/// The `b` corner is exclusive, matching slice semantics.
pub fn rasterise_rect(map: &mut Map, a: Cell, b: Cell) {
    let (h, w) = map.dim();
    let x1 = a.x.clamp(0, w as i32) as usize;
    let x2 = b.x.clamp(0, w as i32) as usize;
    let y1 = a.y.clamp(0, h as i32) as usize;
    let y2 = b.y.clamp(0, h as i32) as usize;

    for y in y1..y2 {
        for x in x1..x2 {
            map[(y, x)] = 1;
        }
    }
}

/// Compile the planning map: camera grid + operator rectangles, inflated by
/// the safety radius. The output has the input's shape and dominates it
/// entry-wise.
pub fn compile_map(obstacles: &Map, extra: &[(Cell, Cell)], inflation_radius: f64) -> Map {
    let mut map = obstacles.clone();
    for &(a, b) in extra {
        rasterise_rect(&mut map, a, b);
    }
    inflate(&map, inflation_radius)
}

/// L1 distance between two grids of the same shape.
/// Widened accumulator: an int8 sum overflows on a 64×64 grid.
pub fn l1_distance(a: &Map, b: &Map) -> i32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as i32 - y as i32).abs())
        .sum()
}
