//! Gaussian quadrature rules over segments, triangles and parallelograms.
//!
//! Each rule is selected by a division count `n_div` in `1..=4`:
//! - segments: `n_div` Gauss-Legendre points
//! - parallelograms: `n_div × n_div` product points
//! - triangles: 1, 4, 7 or 13 symmetric points
//!
//! Points come back with weights already scaled by the area (or length) of
//! the domain, so a quadrature is a plain weighted sum.

use nalgebra::{Point3, Vector3};

use crate::geom::{Facet, Shape};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Facet {
        Facet::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn segment_weights_sum_to_one() {
        for n_div in 1..=4 {
            let (x, w) = segment_rule(n_div);
            assert_eq!(x.len(), n_div);
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn triangle_rules_integrate_quadratics() {
        let tri = Facet::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ])
        .unwrap();
        // integral of x^2 over the triangle is 4/3
        for n_div in 2..=4 {
            let sum: f64 = area_points(n_div, &tri)
                .iter()
                .map(|g| g.weight * g.point.x * g.point.x)
                .sum();
            assert_relative_eq!(sum, 4.0 / 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn parallelogram_product_rule() {
        let square = unit_square();
        for n_div in 1..=4 {
            let points = area_points(n_div, &square);
            assert_eq!(points.len(), n_div * n_div);
            let area: f64 = points.iter().map(|g| g.weight).sum();
            assert_relative_eq!(area, 1.0, epsilon = 1e-8);
        }
        let xy: f64 = area_points(2, &square)
            .iter()
            .map(|g| g.weight * g.point.x * g.point.y)
            .sum();
        assert_relative_eq!(xy, 0.25, epsilon = 1e-8);
    }

    #[test]
    fn general_polygon_uses_fan() {
        let pentagon = Facet::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.5, 1.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            Point3::new(-0.5, 1.0, 0.0),
        ])
        .unwrap();
        let area: f64 = area_points(3, &pentagon).iter().map(|g| g.weight).sum();
        assert_relative_eq!(area, pentagon.area, epsilon = 1e-6);
    }

    #[test]
    fn edges_are_divided_along_their_length() {
        let square = unit_square();
        let edges = divide_edges(3, &square.vertices);
        assert_eq!(edges.len(), 4);
        for edge in &edges {
            assert_relative_eq!(edge.length, 1.0, epsilon = 1e-12);
            let total: f64 = edge.divisions.iter().map(|d| d.s).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-8);
        }
        // edge 0 runs from the last vertex to the first
        assert_relative_eq!(edges[0].dir, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
    }
}

/// Gauss-Legendre ordinates on `[0, 1]` for 1, 2, 3 and 4 points.
pub const GQX: [f64; 10] = [
    0.500000000,
    0.211324865,
    0.788675135,
    0.112701665,
    0.500000000,
    0.887298335,
    0.069431844,
    0.330009478,
    0.669990522,
    0.930568156,
];

/// Weights matching [`GQX`].
pub const GQW: [f64; 10] = [
    1.000000000,
    0.500000000,
    0.500000000,
    0.277777778,
    0.444444444,
    0.277777778,
    0.173927423,
    0.326072577,
    0.326072577,
    0.173927423,
];

const OFFSET: [usize; 4] = [0, 1, 3, 6];

/// Barycentric ordinates and weights of the symmetric triangle rules.
const TRIANGLE_RULE: [[f64; 4]; 25] = [
    [0.33333333, 0.33333333, 0.33333333, 1.00000000],
    [0.33333333, 0.33333333, 0.33333333, -0.5625000],
    [0.60000000, 0.20000000, 0.20000000, 0.52083333],
    [0.20000000, 0.60000000, 0.20000000, 0.52083333],
    [0.20000000, 0.20000000, 0.60000000, 0.52083333],
    [0.33333333, 0.33333333, 0.33333333, 0.22500000],
    [0.05971587, 0.47014206, 0.47014206, 0.13239415],
    [0.47014206, 0.05971587, 0.47014206, 0.13239415],
    [0.47014206, 0.47014206, 0.05971587, 0.13239415],
    [0.79742699, 0.10128651, 0.10128651, 0.12593918],
    [0.10128651, 0.79742699, 0.10128651, 0.12593918],
    [0.10128651, 0.10128651, 0.79742699, 0.12593918],
    [0.33333333, 0.33333333, 0.33333333, -0.14957004],
    [0.47930807, 0.26034597, 0.26034597, 0.17561526],
    [0.26034597, 0.47930807, 0.26034597, 0.17561526],
    [0.26034597, 0.26034597, 0.47930807, 0.17561526],
    [0.86973979, 0.06513010, 0.06513010, 0.05334724],
    [0.06513010, 0.86973979, 0.06513010, 0.05334724],
    [0.06513010, 0.06513010, 0.86973979, 0.05334724],
    [0.63844419, 0.31286550, 0.04869031, 0.07711376],
    [0.63844419, 0.04869031, 0.31286550, 0.07711376],
    [0.31286550, 0.63844419, 0.04869031, 0.07711376],
    [0.31286550, 0.04869031, 0.63844419, 0.07711376],
    [0.04869031, 0.63844419, 0.31286550, 0.07711376],
    [0.04869031, 0.31286550, 0.63844419, 0.07711376],
];
const TRIANGLE_OFFSET: [usize; 4] = [0, 1, 5, 12];
const TRIANGLE_COUNT: [usize; 4] = [1, 4, 7, 13];

/// Quadrature point with its area-scaled weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussPoint {
    pub point: Point3<f64>,
    pub weight: f64,
}

/// Ordinates and weights of the `n_div`-point segment rule.
pub fn segment_rule(n_div: usize) -> (&'static [f64], &'static [f64]) {
    let n_div = n_div.clamp(1, 4);
    let o = OFFSET[n_div - 1];
    (&GQX[o..o + n_div], &GQW[o..o + n_div])
}

/// Appends the triangle rule over `v`, weights scaled by `area`.
pub fn triangle_points(n_div: usize, v: [&Point3<f64>; 3], area: f64, out: &mut Vec<GaussPoint>) {
    let n_div = n_div.clamp(1, 4);
    let o = TRIANGLE_OFFSET[n_div - 1];
    for g in &TRIANGLE_RULE[o..o + TRIANGLE_COUNT[n_div - 1]] {
        let p = v[0].coords * g[0] + v[1].coords * g[1] + v[2].coords * g[2];
        out.push(GaussPoint {
            point: Point3::from(p),
            weight: g[3] * area,
        });
    }
}

/// Appends the product rule over the parallelogram `v[0..4]`.
pub fn parallelogram_points(
    n_div: usize,
    v: [&Point3<f64>; 4],
    area: f64,
    out: &mut Vec<GaussPoint>,
) {
    let (x, w) = segment_rule(n_div);
    let v0 = v[3] - v[0];
    let v1 = v[2] - v[1];
    for i in 0..x.len() {
        let pt0 = v[0] + v0 * x[i];
        let pt1 = v[1] + v1 * x[i];
        let v2 = pt1 - pt0;
        for j in 0..x.len() {
            out.push(GaussPoint {
                point: pt0 + v2 * x[j],
                weight: w[i] * w[j] * area,
            });
        }
    }
}

/// Quadrature points over a convex polygon. Shapes without a direct rule
/// are split into a triangle fan from the first vertex.
pub fn area_points(n_div: usize, facet: &Facet) -> Vec<GaussPoint> {
    let v = &facet.vertices;
    let mut out = Vec::new();
    match facet.shape {
        Shape::Triangle => triangle_points(n_div, [&v[0], &v[1], &v[2]], facet.area, &mut out),
        Shape::Parallelogram => {
            parallelogram_points(n_div, [&v[0], &v[1], &v[2], &v[3]], facet.area, &mut out)
        }
        Shape::Quadrilateral | Shape::Polygon => {
            for k in 1..v.len() - 1 {
                let area = 0.5 * (v[k] - v[0]).cross(&(v[k + 1] - v[0])).norm();
                triangle_points(n_div, [&v[0], &v[k], &v[k + 1]], area, &mut out);
            }
        }
    }
    out
}

/// A Gauss point on an edge with its length-scaled weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDivision {
    pub point: Point3<f64>,
    pub s: f64,
}

/// Polygon edge from vertex `i - 1` to vertex `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    /// Unit direction.
    pub dir: Vector3<f64>,
    pub length: f64,
    pub divisions: Vec<EdgeDivision>,
}

/// Splits every polygon edge into `n_div` Gauss points.
pub fn divide_edges(n_div: usize, vertices: &[Point3<f64>]) -> Vec<Edge> {
    let (x, w) = segment_rule(n_div);
    let nv = vertices.len();
    (0..nv)
        .map(|i| {
            let start = vertices[(i + nv - 1) % nv];
            let end = vertices[i];
            let v = end - start;
            let length = v.norm();
            let divisions = x
                .iter()
                .zip(w)
                .map(|(&x, &w)| EdgeDivision {
                    point: start + v * x,
                    s: w * length,
                })
                .collect();
            Edge {
                start,
                end,
                dir: v / length,
                length,
                divisions,
            }
        })
        .collect()
}
