//! The profiled planning job shipped to the worker pool.

use std::time::Instant;

use arena_types::Cell;
use serde::{Deserialize, Serialize};

use crate::dijkstra::find_path;
use crate::graph::SquareGrid;
use crate::map::Map;
use crate::optimise::PathOptimiser;

/// Immutable snapshot of everything the planner needs. The map is already
/// compiled (rectangles merged, safety margin inflated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub start: Cell,
    pub end: Cell,
    #[serde(with = "grid_serde")]
    pub map: Map,
    pub optimise: bool,
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Cell path start → end, or `None` when the goal is unreachable.
    pub path: Option<Vec<Cell>>,
    /// Wall-clock seconds spent searching and optimising.
    pub elapsed: f64,
}

/// Run the search (and the optimiser when requested), timing the whole job.
pub fn plan_route(request: &PlanRequest) -> PlanOutcome {
    let started = Instant::now();

    let grid = SquareGrid::new(&request.map);
    let mut path = find_path(&grid, request.start, request.end);

    if request.optimise {
        if let Some(cells) = path.take() {
            path = Some(PathOptimiser::new(&request.map).optimise(cells));
        }
    }

    PlanOutcome { path, elapsed: started.elapsed().as_secs_f64() }
}

/// Nested-row (de)serialisation for the grid, matching the JSON shape the
/// operator UI renders.
mod grid_serde {
    use super::Map;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &Map, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<i8>> = map.rows().into_iter().map(|r| r.to_vec()).collect();
        serde::Serialize::serialize(&rows, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Map, D::Error> {
        let rows: Vec<Vec<i8>> = Deserialize::deserialize(deserializer)?;
        let height = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<i8> = rows.into_iter().flatten().collect();
        Map::from_shape_vec((height, width), flat).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::compile_map;
    use arena_types::{GridFrame, Vec2};
    use approx::assert_relative_eq;

    fn to_physical(frame: &GridFrame, cells: &[Cell]) -> Vec<Vec2> {
        cells.iter().map(|&c| frame.to_physical(c)).collect()
    }

    #[test]
    fn empty_map_collapses_to_a_straight_line() {
        let frame = GridFrame::new(8, 8.0);
        let obstacles = Map::zeros((8, 8));
        let map = compile_map(&obstacles, &[], 0.0);

        let request = PlanRequest {
            start: frame.to_cell(Vec2::new(0.5, 0.5)),
            end: frame.to_cell(Vec2::new(7.5, 7.5)),
            map,
            optimise: true,
        };
        let outcome = plan_route(&request);
        let path = outcome.path.unwrap();

        let physical = to_physical(&frame, &path);
        assert_eq!(physical.len(), 2);
        assert_relative_eq!(physical[0].x, 0.5);
        assert_relative_eq!(physical[0].y, 0.5);
        assert_relative_eq!(physical[1].x, 7.5);
        assert_relative_eq!(physical[1].y, 7.5);
    }

    #[test]
    fn central_obstacle_is_skirted_on_free_cells() {
        let frame = GridFrame::new(8, 8.0);
        let mut obstacles = Map::zeros((8, 8));
        for y in 3..5 {
            for x in 3..5 {
                obstacles[(y, x)] = 1;
            }
        }
        let map = compile_map(&obstacles, &[], 0.0);

        let request = PlanRequest {
            start: frame.to_cell(Vec2::new(0.5, 0.5)),
            end: frame.to_cell(Vec2::new(7.5, 7.5)),
            map: map.clone(),
            optimise: false,
        };
        let outcome = plan_route(&request);
        let path = outcome.path.unwrap();

        assert_eq!(path.first(), Some(&Cell::new(0, 0)));
        assert_eq!(path.last(), Some(&Cell::new(7, 7)));
        for cell in &path {
            assert_eq!(map[(cell.y as usize, cell.x as usize)], 0);
        }
        for w in path.windows(2) {
            assert!((w[0].x - w[1].x).abs() <= 1 && (w[0].y - w[1].y).abs() <= 1);
        }
    }

    #[test]
    fn unreachable_goal_reports_no_path_but_a_duration() {
        let mut obstacles = Map::zeros((8, 8));
        for x in 0..8 {
            obstacles[(4, x)] = 1;
        }
        let request = PlanRequest {
            start: Cell::new(0, 0),
            end: Cell::new(0, 7),
            map: compile_map(&obstacles, &[], 0.0),
            optimise: false,
        };
        let outcome = plan_route(&request);
        assert!(outcome.path.is_none());
        assert!(outcome.elapsed > 0.0);
    }

    #[test]
    fn optimised_segments_raytrace_over_free_cells_only() {
        let mut obstacles = Map::zeros((16, 16));
        for y in 4..12 {
            obstacles[(y, 7)] = 1;
        }
        let map = compile_map(&obstacles, &[], 1.0);
        let request = PlanRequest {
            start: Cell::new(1, 8),
            end: Cell::new(14, 8),
            map: map.clone(),
            optimise: true,
        };
        let path = plan_route(&request).path.unwrap();
        let optimiser = PathOptimiser::new(&map);
        for w in path.windows(2) {
            assert!(optimiser.free_path(w[0], w[1]));
        }
    }

    #[test]
    fn request_round_trips_through_json() {
        let mut obstacles = Map::zeros((4, 4));
        obstacles[(1, 2)] = 1;
        let request = PlanRequest {
            start: Cell::new(0, 0),
            end: Cell::new(3, 3),
            map: obstacles,
            optimise: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: PlanRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.map, request.map);
        assert_eq!(back.start, request.start);
    }
}
