/// Relative tolerance for geometric comparisons.
pub const EPS: f64 = 1.0e-6;
/// Square of `EPS`, compared against squared lengths.
pub const EPS2: f64 = 1.0e-12;
/// Maximum vertices of an input surface in 3-D.
pub const MAX_INPUT_VERTICES: usize = 4;
/// Out-of-plane vertex deviation allowed, relative to the bounding radius.
pub const PLANARITY_TOLERANCE: f64 = 1.0e-5;
/// Vertices closer than this fraction of the bounding radius to a plane are treated as on it.
pub const PLANE_TOLERANCE: f64 = 1.0e-5;
/// Centroids closer than this fraction of `rc1 + rc2` are coincident.
pub const COINCIDENT_CENTROIDS: f64 = 1.0e-5;
/// Clipped area below this fraction of the original disables obstruction tests.
pub const EXTREME_CLIP: f64 = 1.0e-4;
/// Factors below this fraction of the larger area are reset to zero.
pub const TINY_FACTOR: f64 = 1.0e-12;
/// Area ratio tolerance when checking a subsurface lies inside its base.
pub const ENCLOSED_AREA_TOLERANCE: f64 = 1.0e-3;
/// Maximum vertices in a single shadow polygon.
pub const MAX_POLYGON_VERTICES: usize = 64;
/// Vertex/edge records available to one polygon arena.
pub const ARENA_CAPACITY: usize = 16384;
/// Convergence tolerance of the enclosure normalisation.
pub const NORM_TOLERANCE: f64 = 1.0e-7;
/// Iteration cap of the enclosure normalisation in 3-D.
pub const NORM_ITERATIONS_3D: usize = 100;
/// Iteration cap of the enclosure normalisation in 2-D.
pub const NORM_ITERATIONS_2D: usize = 30;
/// Default emittance of a radiating surface.
pub const DEFAULT_EMITTANCE: f64 = 0.9;
