//! Compile-time tuning constants. Everything that had to be measured on the
//! physical setup (wheelbase, sensor tables, colour ranges) lives here.

/// Grid subdivisions per axis of the obstacle map.
pub const SUBDIVISIONS: usize = 64;

/// Physical side length of the arena in centimetres.
pub const PHYSICAL_SIZE_CM: f64 = 110.0;

/// Distance between the wheel contact points, centimetres.
pub const WHEELBASE_CM: f64 = 9.5;

/// Clearance kept around obstacles when planning, centimetres.
pub const SAFE_DISTANCE_CM: f64 = 15.0;

/// Minimum L1 grid change that counts as a new scene and triggers a replan.
pub const SCENE_THRESHOLD: i32 = 10;

/// Driver speed unit → cm/s.
pub const SPEED_UNIT_TO_CM: f64 = 3.85e-2;

/// Coordination loop period, seconds (~10 Hz).
pub const LOOP_PERIOD: f64 = 0.1;

/// Longest the motion controller sleeps without a pose update, seconds.
pub const MAX_WAIT: f64 = 0.1;

/// Worker threads for planning and frame processing.
pub const POOL_SIZE: usize = 4;

// == Vision == //

/// Rectified pixels per physical centimetre.
pub const PIXELS_PER_CM: usize = 5;

/// Side length of the calibrated table, centimetres.
pub const TABLE_LEN_CM: usize = 58;

/// Rectified table side in pixels.
pub const TABLE_LEN_PX: usize = PIXELS_PER_CM * TABLE_LEN_CM;

/// Diameter of the back (position) landmark, centimetres.
pub const LM_BACK_CM: f64 = 3.2;

/// Diameter of the front (heading) landmark, centimetres.
pub const LM_FRONT_CM: f64 = 2.7;

/// BGR range for the obstacle colour (black tape).
pub const OBSTACLE_COLOR_LOW: [u8; 3] = [0, 0, 0];
pub const OBSTACLE_COLOR_HIGH: [u8; 3] = [70, 70, 70];

/// Per-channel tolerance around a calibrated landmark seed colour.
pub const SEED_COLOR_TOLERANCE: u8 = 30;

/// Mean mask value (0..255) above which a downsampled cell counts occupied.
pub const CELL_OCCUPANCY_THRESHOLD: f32 = 127.0;

/// A grid cell with at most this many occupied cells in its 3×3
/// neighbourhood (itself included) is discarded as noise.
pub const ISOLATE_THRESHOLD: i32 = 1;

/// Minimum disk-convolution score for a landmark to count as detected.
pub const LANDMARK_DETECTION_THRESHOLD: f32 = 20.0 * 255.0;

/// Half-pixel correction for the kernel-alignment bias of the argmax.
pub const LANDMARK_PIXEL_OFFSET: f64 = 0.5;

/// Bilateral filter: window diameter and the two sigmas.
pub const BILATERAL_DIAMETER: usize = PIXELS_PER_CM;
pub const BILATERAL_SIGMA_COLOR: f32 = 75.0;
pub const BILATERAL_SIGMA_SPACE: f32 = 75.0;

// == Coordinator == //

/// Outlier gates: L∞ threshold for landmark points, radians for heading.
pub const OUTLIER_POINT_THRESHOLD: f64 = 2.0;
pub const OUTLIER_ANGLE_THRESHOLD: f64 = 0.1;
pub const OUTLIER_MAX_MISSES: u32 = 5;

// == Local navigation == //

/// Entry distance for reactive control, centimetres.
pub const REACTIVE_ENTRY_CM: f64 = 3.5;

/// Seconds in reactive mode before a replan is requested from the
/// displaced pose, and before waypoint following re-engages. The gap lets
/// the planner observe the new position first.
pub const REACTIVE_REPLAN_SECS: f64 = 7.0;
pub const REACTIVE_EXIT_SECS: f64 = 8.0;

// == Celebration == //

/// Motor units and durations for the arrival routine.
pub const HALF_TURN_SPEED: i32 = 150;
pub const HALF_TURN_SECS: f64 = 3.4;
pub const DROP_SPEED: i32 = 100;
pub const DROP_SECS: f64 = 1.8;
pub const DROP_HOLD_SECS: f64 = 3.0;

/// Run the half turn on the auxiliary node instead of the drive node.
pub const CELEBRATE_ON_AUX: bool = false;
