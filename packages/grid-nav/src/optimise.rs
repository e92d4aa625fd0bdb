//! Path shortening: drop interior waypoints whose neighbours can see each
//! other across free cells only, using a supercover raytrace.

use arena_types::Cell;

use crate::map::Map;

/// Integer-only supercover line: every grid cell the segment `a → b`
/// intersects, endpoints included.
/// See <https://playtechs.blogspot.com/2007/03/raytracing-on-grid.html>
pub fn raytrace(a: Cell, b: Cell) -> Vec<Cell> {
    let dx = (b.x - a.x).abs();
    let dy = (b.y - a.y).abs();

    let x_inc = if b.x > a.x { 1 } else { -1 };
    let y_inc = if b.y > a.y { 1 } else { -1 };

    let mut x = a.x;
    let mut y = a.y;
    let mut error = dx - dy;
    let n = 1 + dx + dy;

    let (dx, dy) = (dx * 2, dy * 2);
    let mut cells = Vec::with_capacity(n as usize);

    for _ in 0..n {
        cells.push(Cell::new(x, y));

        if error > 0 {
            x += x_inc;
            error -= dy;
        } else {
            y += y_inc;
            error += dx;
        }
    }

    cells
}

pub struct PathOptimiser<'a> {
    map: &'a Map,
}

impl<'a> PathOptimiser<'a> {
    pub fn new(map: &'a Map) -> Self {
        Self { map }
    }

    /// Remove interior waypoints while the segment between their neighbours
    /// stays on free cells, restarting from the front after each removal.
    pub fn optimise(&self, path: Vec<Cell>) -> Vec<Cell> {
        if path.len() <= 2 {
            return path;
        }

        let mut path = path;
        let mut i = 1;

        while i != path.len() - 1 {
            if self.free_path(path[i - 1], path[i + 1]) {
                path.remove(i);
                i = 1;
            } else {
                i += 1;
            }
        }

        path
    }

    pub fn free_path(&self, a: Cell, b: Cell) -> bool {
        let (h, w) = self.map.dim();
        raytrace(a, b)
            .into_iter()
            .filter(|c| c.x >= 0 && c.y >= 0 && (c.x as usize) < w && (c.y as usize) < h)
            .all(|c| self.map[(c.y as usize, c.x as usize)] == 0)
    }
}
