//! Numeric image kernels used by the perception pipeline.
//!
//! Everything operates on `ndarray` planes: BGR frames as `(H, W, 3)` u8
//! arrays, masks as `(H, W)` u8, score maps as `(H, W)` f32.

use nalgebra::Matrix3;
use ndarray::{s, Array2, Array3};

pub type Image = Array3<u8>;
pub type GrayMask = Array2<u8>;

/// Rectify a frame: inverse-map every output pixel through `h⁻¹` and sample
/// the source bilinearly. Pixels falling outside the source stay black.
pub fn warp_perspective(src: &Image, h: &Matrix3<f64>, out_w: usize, out_h: usize) -> Image {
    let h_inv = match h.try_inverse() {
        Some(inv) => inv,
        None => return Image::zeros((out_h, out_w, 3)),
    };
    let (src_h, src_w, _) = src.dim();
    let mut out = Image::zeros((out_h, out_w, 3));

    for y in 0..out_h {
        for x in 0..out_w {
            let (fx, fy) = super::homography::project(&h_inv, x as f64, y as f64);
            if fx < 0.0 || fy < 0.0 || fx > (src_w - 1) as f64 || fy > (src_h - 1) as f64 {
                continue;
            }

            let x0 = fx.floor() as usize;
            let y0 = fy.floor() as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let y1 = (y0 + 1).min(src_h - 1);
            let tx = fx - x0 as f64;
            let ty = fy - y0 as f64;

            for c in 0..3 {
                let top = src[(y0, x0, c)] as f64 * (1.0 - tx) + src[(y0, x1, c)] as f64 * tx;
                let bottom = src[(y1, x0, c)] as f64 * (1.0 - tx) + src[(y1, x1, c)] as f64 * tx;
                out[(y, x, c)] = (top * (1.0 - ty) + bottom * ty).round() as u8;
            }
        }
    }

    out
}

/// Edge-preserving denoise: each pixel becomes the average of its window,
/// weighted by spatial distance and colour similarity.
pub fn bilateral_filter(src: &Image, diameter: usize, sigma_color: f32, sigma_space: f32) -> Image {
    let radius = (diameter / 2).max(1) as i32;
    let (h, w, _) = src.dim();
    let mut out = Image::zeros((h, w, 3));

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let centre = [
                src[(y as usize, x as usize, 0)] as f32,
                src[(y as usize, x as usize, 1)] as f32,
                src[(y as usize, x as usize, 2)] as f32,
            ];

            let mut weight_sum = 0.0f32;
            let mut acc = [0.0f32; 3];

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let sy = y + dy;
                    let sx = x + dx;
                    if sy < 0 || sx < 0 || sy >= h as i32 || sx >= w as i32 {
                        continue;
                    }

                    let pixel = [
                        src[(sy as usize, sx as usize, 0)] as f32,
                        src[(sy as usize, sx as usize, 1)] as f32,
                        src[(sy as usize, sx as usize, 2)] as f32,
                    ];

                    let spatial = (dy * dy + dx * dx) as f32;
                    let color: f32 = centre
                        .iter()
                        .zip(pixel.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    let weight = (spatial * space_coeff + color * color_coeff).exp();

                    weight_sum += weight;
                    for c in 0..3 {
                        acc[c] += pixel[c] * weight;
                    }
                }
            }

            for c in 0..3 {
                out[(y as usize, x as usize, c)] = (acc[c] / weight_sum).round() as u8;
            }
        }
    }

    out
}

/// Per-pixel colour-range threshold: 255 where every channel sits inside
/// `[low, high]` inclusive, 0 elsewhere.
pub fn in_range(src: &Image, low: [u8; 3], high: [u8; 3]) -> GrayMask {
    let (h, w, _) = src.dim();
    let mut out = GrayMask::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let inside = (0..3).all(|c| {
                let v = src[(y, x, c)];
                v >= low[c] && v <= high[c]
            });
            if inside {
                out[(y, x)] = 255;
            }
        }
    }
    out
}

/// Zero out a band of pixels around the mask edge (camera vignetting and
/// table-border artefacts).
pub fn zero_border(mask: &mut GrayMask, band: usize) {
    let (h, w) = mask.dim();
    let band = band.min(h / 2).min(w / 2);
    mask.slice_mut(s![..band, ..]).fill(0);
    mask.slice_mut(s![h - band.., ..]).fill(0);
    mask.slice_mut(s![.., ..band]).fill(0);
    mask.slice_mut(s![.., w - band..]).fill(0);
}

/// Area downsample: mean of every source pixel binned into an `out × out`
/// grid.
pub fn resize_area(mask: &GrayMask, out_side: usize) -> Array2<f32> {
    let (h, w) = mask.dim();
    let mut sums = Array2::<f32>::zeros((out_side, out_side));
    let mut counts = Array2::<f32>::zeros((out_side, out_side));

    for y in 0..h {
        for x in 0..w {
            let by = (y * out_side / h).min(out_side - 1);
            let bx = (x * out_side / w).min(out_side - 1);
            sums[(by, bx)] += mask[(y, x)] as f32;
            counts[(by, bx)] += 1.0;
        }
    }

    sums / counts.mapv(|c| c.max(1.0))
}

/// Reverse the row order, converting image coordinates (y down) to arena
/// coordinates (y up).
pub fn flip_vertical<T: Clone>(src: &Array2<T>) -> Array2<T> {
    src.slice(s![..;-1, ..]).to_owned()
}

/// 2D cross-correlation with zero fill, same output shape. Scatters from
/// nonzero source pixels, so sparse masks (the usual input here) cost far
/// less than a dense gather.
pub fn convolve2d_same(src: &Array2<f32>, kernel: &Array2<f32>) -> Array2<f32> {
    let (h, w) = src.dim();
    let (kh, kw) = kernel.dim();
    let (ch, cw) = (kh as i32 / 2, kw as i32 / 2);

    let mut out = Array2::<f32>::zeros((h, w));
    for ((sy, sx), &v) in src.indexed_iter() {
        if v == 0.0 {
            continue;
        }
        for ky in 0..kh as i32 {
            for kx in 0..kw as i32 {
                let oy = sy as i32 - ky + ch;
                let ox = sx as i32 - kx + cw;
                if oy < 0 || ox < 0 || oy >= h as i32 || ox >= w as i32 {
                    continue;
                }
                out[(oy as usize, ox as usize)] += v * kernel[(ky as usize, kx as usize)];
            }
        }
    }
    out
}

/// Disk-shaped matching kernel.
pub fn disk_kernel(radius: f64) -> Array2<f32> {
    let size = (radius * 2.0) as usize + 1;
    let mut kernel = Array2::<f32>::zeros((size, size));
    for i in 0..size {
        for j in 0..size {
            let di = i as f64 - radius;
            let dj = j as f64 - radius;
            if di * di + dj * dj <= radius * radius {
                kernel[(i, j)] = 1.0;
            }
        }
    }
    kernel
}

/// Strict row-major argmax: `(value, x, y)`. An all-zero map yields (0, 0).
pub fn get_maximum(map: &Array2<f32>) -> (f32, usize, usize) {
    let mut best = f32::NEG_INFINITY;
    let mut best_x = 0;
    let mut best_y = 0;
    for ((y, x), &v) in map.indexed_iter() {
        if v > best {
            best = v;
            best_x = x;
            best_y = y;
        }
    }
    (best, best_x, best_y)
}
