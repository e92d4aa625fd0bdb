//! Dijkstra shortest path with a binary-heap frontier.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use arena_types::Cell;

use crate::graph::SquareGrid;

/// Frontier entry, ordered so the heap pops the cheapest cell first.
struct Frontier {
    cost: f64,
    cell: Cell,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other.cost.total_cmp(&self.cost)
    }
}

type CostTable = HashMap<Cell, (Option<Cell>, f64)>;

/// Shortest path from `start` to `end` over the grid, or `None` when the
/// goal is unreachable. The returned path runs start → end inclusive.
pub fn find_path(grid: &SquareGrid<'_>, start: Cell, end: Cell) -> Option<Vec<Cell>> {
    let mut frontier = BinaryHeap::new();
    let mut cost: CostTable = HashMap::new();

    frontier.push(Frontier { cost: 0.0, cell: start });
    cost.insert(start, (None, 0.0));

    while let Some(Frontier { cell: current, .. }) = frontier.pop() {
        if current == end {
            break;
        }

        let (_, current_cost) = cost[&current];

        for next in grid.neighbors(current) {
            let new_cost = current_cost + grid.cost(current, next);
            let old_cost = cost.get(&next).map(|&(_, c)| c).unwrap_or(f64::INFINITY);
            if new_cost < old_cost {
                cost.insert(next, (Some(current), new_cost));
                frontier.push(Frontier { cost: new_cost, cell: next });
            }
        }
    }

    reconstruct_path(&cost, end)
}

fn reconstruct_path(cost: &CostTable, end: Cell) -> Option<Vec<Cell>> {
    let (mut parent, _) = *cost.get(&end)?;
    let mut path = vec![end];

    while let Some(cell) = parent {
        path.push(cell);
        parent = cost[&cell].0;
    }

    path.reverse();
    Some(path)
}

/// Total step cost of a cell path.
pub fn path_cost(grid: &SquareGrid<'_>, path: &[Cell]) -> f64 {
    path.windows(2).map(|w| grid.cost(w[0], w[1])).sum()
}
