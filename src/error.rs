use thiserror::Error;

/// Fatal errors raised while validating geometry or computing factors.
///
/// Surface numbers are 1-based, matching the numbering of the input file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewError {
    #[error("surface {0}: vertices are not coplanar (deviation {1:.3e})")]
    NonPlanar(usize, f64),
    #[error("surface {0}: polygon is not convex")]
    NonConvex(usize),
    #[error("surface {0}: zero area")]
    ZeroArea(usize),
    #[error("surface {0}: {1} vertices is not supported")]
    VertexCount(usize, usize),
    #[error("surface {0}: not entirely within its base surface {1}")]
    SubsurfaceOutsideBase(usize, usize),
    #[error("surfaces {0} and {1} have the same centroid")]
    CoincidentCentroids(usize, usize),
    #[error("surfaces {0} and {1} intersect")]
    SurfacesIntersect(usize, usize),
    #[error("polygon arena exhausted: {0}")]
    ArenaExhausted(String),
    #[error("surface {0}: reference to surface {1} is invalid ({2})")]
    BadReference(usize, usize, &'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ViewError>;
