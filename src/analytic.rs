//! Closed-form view factors for simple configurations.
//!
//! Used as reference values when checking the numerical methods.

use std::f64::consts::PI;


/// Factor between directly opposed parallel rectangles `a × b` at distance `c`.
pub fn parallel_rectangles(a: f64, b: f64, c: f64) -> f64 {
    let x = a / c;
    let y = b / c;
    let x1 = (1.0 + x * x).sqrt();
    let y1 = (1.0 + y * y).sqrt();
    let log = ((1.0 + x * x) * (1.0 + y * y) / (1.0 + x * x + y * y)).sqrt().ln();
    let sum = log + x * y1 * (x / y1).atan() + y * x1 * (y / x1).atan() - x * x.atan() - y * y.atan();
    2.0 * sum / (PI * x * y)
}

/// Factor from a `w × l` rectangle to an `h × l` rectangle at right angles,
/// sharing the edge of length `l`.
pub fn perpendicular_rectangles(l: f64, w: f64, h: f64) -> f64 {
    let h = h / l;
    let w = w / l;
    let (h2, w2) = (h * h, w * w);
    let hw = (h2 + w2).sqrt();
    let a = (1.0 + w2) * (1.0 + h2) / (1.0 + w2 + h2);
    let b = (w2 * (1.0 + w2 + h2) / ((1.0 + w2) * (w2 + h2))).powf(w2);
    let c = (h2 * (1.0 + h2 + w2) / ((1.0 + h2) * (h2 + w2))).powf(h2);
    let sum = w * (1.0 / w).atan() + h * (1.0 / h).atan() - hw * (1.0 / hw).atan() + 0.25 * (a * b * c).ln();
    sum / (PI * w)
}

/// Factor from a differential area to a parallel `a × b` rectangle at
/// distance `c`, with the area's normal through one corner.
pub fn point_to_parallel_rectangle(a: f64, b: f64, c: f64) -> f64 {
    let x = a / c;
    let y = b / c;
    let x1 = (1.0 + x * x).sqrt();
    let y1 = (1.0 + y * y).sqrt();
    (x / x1 * (y / x1).atan() + y / y1 * (x / y1).atan()) / (2.0 * PI)
}

/// Factor from side `a` to side `b` of a triangular 2-D enclosure with third side `c`.
pub fn triangle_enclosure(a: f64, b: f64, c: f64) -> f64 {
    (a + b - c) / (2.0 * a)
}
