//! 8-connected grid graph over the inflated obstacle map.

use arena_types::Cell;

use crate::map::Map;

pub const DIST_ADJC: f64 = 1.0;
pub const DIST_DIAG: f64 = std::f64::consts::SQRT_2;

/// Grid graph view over a map. A cell is visitable iff its inflated-map
/// value is zero.
pub struct SquareGrid<'a> {
    map: &'a Map,
}

impl<'a> SquareGrid<'a> {
    pub fn new(map: &'a Map) -> Self {
        Self { map }
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        let (h, w) = self.map.dim();
        cell.x >= 0 && cell.y >= 0 && (cell.x as usize) < w && (cell.y as usize) < h
    }

    pub fn is_free(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.map[(cell.y as usize, cell.x as usize)] == 0
    }

    /// Visitable neighbours of a cell, in row-major offset order.
    pub fn neighbors(&self, cell: Cell) -> impl Iterator<Item = Cell> + '_ {
        OFFSETS
            .iter()
            .map(move |&(dx, dy)| Cell::new(cell.x + dx, cell.y + dy))
            .filter(|&n| self.is_free(n))
    }

    /// Step cost: 1 for orthogonal moves, √2 for diagonal ones.
    pub fn cost(&self, a: Cell, b: Cell) -> f64 {
        if a.x != b.x && a.y != b.y {
            DIST_DIAG
        } else {
            DIST_ADJC
        }
    }
}

const OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_cell_has_eight_free_neighbors() {
        let map = Map::zeros((8, 8));
        let grid = SquareGrid::new(&map);
        assert_eq!(grid.neighbors(Cell::new(4, 4)).count(), 8);
    }

    #[test]
    fn corner_cell_has_three_neighbors() {
        let map = Map::zeros((8, 8));
        let grid = SquareGrid::new(&map);
        assert_eq!(grid.neighbors(Cell::new(0, 0)).count(), 3);
    }

    #[test]
    fn occupied_cells_are_not_visitable() {
        let mut map = Map::zeros((8, 8));
        map[(4, 3)] = 1;
        let grid = SquareGrid::new(&map);
        assert!(!grid.is_free(Cell::new(3, 4)));
        assert!(grid.neighbors(Cell::new(4, 4)).all(|n| n != Cell::new(3, 4)));
    }

    #[test]
    fn diagonal_steps_cost_sqrt_two() {
        let map = Map::zeros((4, 4));
        let grid = SquareGrid::new(&map);
        assert_eq!(grid.cost(Cell::new(1, 1), Cell::new(1, 2)), DIST_ADJC);
        assert_eq!(grid.cost(Cell::new(1, 1), Cell::new(2, 2)), DIST_DIAG);
    }
}
