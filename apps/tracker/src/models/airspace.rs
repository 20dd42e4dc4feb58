//! Fixed geometry of the monitored airspace.
//!
//! Coordinates are in the upstream feed's units (millimetres). The nest sits at
//! the centre of a 500 x 500 metre square and the no-drone zone is the disc of
//! radius 100 metres around it.

/// Width of the monitored area.
pub const AREA_WIDTH: f64 = 500_000.0;

/// Height of the monitored area.
pub const AREA_HEIGHT: f64 = 500_000.0;

/// Reference origin the distance of every observation is measured from.
pub const ORIGIN_X: f64 = 250_000.0;
pub const ORIGIN_Y: f64 = 250_000.0;

/// Radius of the protected zone. The boundary itself is restricted.
pub const PROTECTED_RADIUS: f64 = 100_000.0;

/// Euclidean distance from a position to the reference origin.
pub fn distance_to_origin(x: f64, y: f64) -> f64 {
    (x - ORIGIN_X).hypot(y - ORIGIN_Y)
}

pub fn within_restricted_area(x: f64, y: f64) -> bool {
    distance_to_origin(x, y) <= PROTECTED_RADIUS
}

/// True when the position lies inside `[0, width] x [0, height]`.
pub fn within_bounds(x: f64, y: f64) -> bool {
    (0.0..=AREA_WIDTH).contains(&x) && (0.0..=AREA_HEIGHT).contains(&y)
}
