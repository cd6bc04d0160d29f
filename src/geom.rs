use geo::IsConvex;
use geo_types::{Coord, LineString};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Result, ViewError};

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn square(z: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(0.0, 1.0, z),
        ]
    }

    #[test]
    fn unit_square_properties() {
        let facet = Facet::new(square(2.0)).unwrap();
        assert_relative_eq!(facet.area, 1.0, epsilon = 1e-12);
        assert_relative_eq!(facet.centroid, Point3::new(0.5, 0.5, 2.0), epsilon = 1e-12);
        assert_relative_eq!(facet.rc, 0.5_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(facet.dc.normal, Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(facet.dc.w, -2.0, epsilon = 1e-12);
        assert_eq!(facet.shape, Shape::Parallelogram);
    }

    #[test]
    fn shapes() {
        let tri = Facet::new(square(0.0)[..3].to_vec()).unwrap();
        assert_eq!(tri.shape, Shape::Triangle);

        let mut quad = square(0.0);
        quad[2] = Point3::new(2.0, 1.5, 0.0);
        let quad = Facet::new(quad).unwrap();
        assert_eq!(quad.shape, Shape::Quadrilateral);
    }

    #[test]
    fn rejects_bad_surfaces() {
        let mut warped = square(0.0);
        warped[2].z = 0.1;
        assert!(matches!(
            Surface::new(3, "warped", warped, Role::Rad),
            Err(ViewError::NonPlanar(4, _))
        ));

        let bowtie = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        assert!(Surface::new(0, "bowtie", bowtie, Role::Rad).is_err());

        let dart = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.5, 0.5, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        assert_eq!(
            Surface::new(1, "dart", dart, Role::Rad),
            Err(ViewError::NonConvex(2))
        );

        let line = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];
        assert_eq!(
            Surface::new(0, "line", line, Role::Rad),
            Err(ViewError::ZeroArea(1))
        );
    }

    #[test]
    fn clip_square_in_half() {
        let clipped = clip_polygon(&square(0.0), |p| p.x - 0.5);
        let facet = Facet::new(clipped).unwrap();
        assert_relative_eq!(facet.area, 0.5, epsilon = 1e-12);
        assert_relative_eq!(facet.centroid.x, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn contains_point() {
        let facet = Facet::new(square(0.0)).unwrap();
        assert!(facet.contains(&Point3::new(0.2, 0.9, 0.0), 1e-9));
        assert!(!facet.contains(&Point3::new(1.2, 0.5, 0.0), 1e-9));
    }
}

/// Plane of a surface: `normal · x + w = 0`, with a unit outward normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirCos {
    pub normal: Vector3<f64>,
    pub w: f64,
}

impl DirCos {
    pub fn new(normal: Vector3<f64>, point: &Point3<f64>) -> Self {
        Self {
            normal,
            w: -normal.dot(&point.coords),
        }
    }

    /// Signed distance of a point from the plane, positive in front.
    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.w
    }
}

/// Shape tag used to pick the quadrature rule for a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Triangle,
    Parallelogram,
    Quadrilateral,
    Polygon,
}

impl Shape {
    /// Triangles and parallelograms have direct Gauss rules.
    pub fn has_rule(&self) -> bool {
        matches!(self, Shape::Triangle | Shape::Parallelogram)
    }
}

/// Role of a surface in the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Radiating surface.
    #[default]
    Rad,
    /// Obstruction only.
    Obso,
    /// Opaque patch coplanar with its base.
    Mask,
    /// Hole in its base.
    Null,
    /// Subsurface of its base.
    Subs,
}

impl Role {
    /// Masks and nulls take part only through their base.
    pub fn is_mask(&self) -> bool {
        matches!(self, Role::Mask | Role::Null)
    }

    pub fn needs_base(&self) -> bool {
        matches!(self, Role::Mask | Role::Null | Role::Subs)
    }
}

/// Geometry of a planar convex polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Facet {
    pub vertices: Vec<Point3<f64>>,
    pub dc: DirCos,
    pub centroid: Point3<f64>,
    /// Maximum distance from the centroid to a vertex.
    pub rc: f64,
    pub area: f64,
    pub shape: Shape,
}

impl Facet {
    /// Computes plane, centroid, radius, area and shape of a polygon.
    /// Returns `None` if the polygon has no area.
    pub fn new(vertices: Vec<Point3<f64>>) -> Option<Self> {
        let vertices = collapse_vertices(vertices);
        if vertices.len() < 3 {
            return None;
        }

        let v0 = vertices[0];
        let mut sum = Vector3::zeros();
        for (a, b) in vertices[1..].iter().zip(vertices[2..].iter()) {
            sum += (a - v0).cross(&(b - v0));
        }
        let double_area = sum.norm();
        if double_area <= f64::MIN_POSITIVE {
            return None;
        }
        let normal = sum / double_area;

        // fan triangles weighted by signed area along the normal
        let mut weighted = Vector3::zeros();
        for (a, b) in vertices[1..].iter().zip(vertices[2..].iter()) {
            let signed = (a - v0).cross(&(b - v0)).dot(&normal);
            weighted += signed * (v0.coords + a.coords + b.coords) / 3.0;
        }
        let centroid = Point3::from(weighted / double_area);

        let rc = vertices
            .iter()
            .map(|v| (v - centroid).norm())
            .fold(0.0, f64::max);
        let area = 0.5 * double_area;
        if area <= config::EPS2 * rc * rc {
            return None;
        }

        let shape = classify(&vertices, rc);
        Some(Self {
            dc: DirCos::new(normal, &centroid),
            vertices,
            centroid,
            rc,
            area,
            shape,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Largest distance of a vertex from the fitted plane.
    pub fn planar_deviation(&self) -> f64 {
        self.vertices
            .iter()
            .map(|v| self.dc.distance(v).abs())
            .fold(0.0, f64::max)
    }

    /// Orthonormal in-plane axes `(u, v)` with `u × v` along the normal.
    pub fn frame(&self) -> (Vector3<f64>, Vector3<f64>) {
        let edge = self.vertices[1] - self.vertices[0];
        let u = (edge - self.dc.normal * edge.dot(&self.dc.normal)).normalize();
        let v = self.dc.normal.cross(&u);
        (u, v)
    }

    /// Vertices expressed in the in-plane frame, counter-clockwise.
    pub fn planar_coords(&self) -> Vec<Coord<f64>> {
        let (u, v) = self.frame();
        self.vertices
            .iter()
            .map(|p| {
                let d = p - self.centroid;
                Coord {
                    x: d.dot(&u),
                    y: d.dot(&v),
                }
            })
            .collect()
    }

    pub fn is_convex(&self) -> bool {
        if self.vertices.len() == 3 {
            return true;
        }
        let mut coords = self.planar_coords();
        coords.push(coords[0]);
        LineString::new(coords).is_ccw_convex()
    }

    /// True if a point on the plane lies inside the polygon, within `eps`.
    pub fn contains(&self, p: &Point3<f64>, eps: f64) -> bool {
        let n = self.vertices.len();
        (0..n).all(|i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            (b - a).cross(&(p - a)).dot(&self.dc.normal) >= -eps * (b - a).norm()
        })
    }

    /// Counts vertices of `vertices` in front of and behind this plane.
    pub fn relation(&self, vertices: &[Point3<f64>], eps: f64) -> (usize, usize) {
        vertices.iter().fold((0, 0), |(front, behind), v| {
            let d = self.dc.distance(v);
            if d > eps {
                (front + 1, behind)
            } else if d < -eps {
                (front, behind + 1)
            } else {
                (front, behind)
            }
        })
    }
}

/// Drops consecutive vertices that coincide relative to the polygon size.
fn collapse_vertices(vertices: Vec<Point3<f64>>) -> Vec<Point3<f64>> {
    if vertices.len() < 2 {
        return vertices;
    }
    let extent = vertices
        .iter()
        .flat_map(|a| vertices.iter().map(move |b| (a - b).norm()))
        .fold(0.0, f64::max);
    let tol = config::EPS * extent;
    let mut out: Vec<Point3<f64>> = Vec::with_capacity(vertices.len());
    for v in vertices {
        if out.last().map_or(true, |last| (v - last).norm() > tol) {
            out.push(v);
        }
    }
    while out.len() > 1 && (out[0] - out[out.len() - 1]).norm() <= tol {
        out.pop();
    }
    out
}

fn classify(vertices: &[Point3<f64>], rc: f64) -> Shape {
    match vertices.len() {
        3 => Shape::Triangle,
        4 => {
            let skew = (vertices[1] - vertices[0]) - (vertices[2] - vertices[3]);
            if skew.norm() < config::PLANARITY_TOLERANCE * rc {
                Shape::Parallelogram
            } else {
                Shape::Quadrilateral
            }
        }
        _ => Shape::Polygon,
    }
}

/// Keeps the part of a convex polygon where `dist(p) >= 0`.
pub fn clip_polygon<F>(vertices: &[Point3<f64>], dist: F) -> Vec<Point3<f64>>
where
    F: Fn(&Point3<f64>) -> f64,
{
    let n = vertices.len();
    let d: Vec<f64> = vertices.iter().map(&dist).collect();
    let mut out = Vec::with_capacity(n + 1);
    for j in 0..n {
        let jm1 = if j == 0 { n - 1 } else { j - 1 };
        if (d[jm1] < 0.0 && d[j] > 0.0) || (d[jm1] > 0.0 && d[j] < 0.0) {
            let h = d[jm1] / (d[jm1] - d[j]);
            out.push(vertices[jm1] + (vertices[j] - vertices[jm1]) * h);
        }
        if d[j] >= 0.0 {
            out.push(vertices[j]);
        }
    }
    out
}

/// One surface of the input geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub name: String,
    pub facet: Facet,
    pub role: Role,
    /// Index of the base surface of a subsurface, mask or null.
    pub base: Option<usize>,
    /// Index of the surface this one is merged into after computation.
    pub cmbn: Option<usize>,
    pub emit: f64,
    /// Transmittance, for obstruction-only surfaces.
    pub trns: f64,
}

impl Surface {
    /// Validates and builds a surface. `index` is 0-based; errors report it 1-based.
    pub fn new(
        index: usize,
        name: impl Into<String>,
        vertices: Vec<Point3<f64>>,
        role: Role,
    ) -> Result<Self> {
        let number = index + 1;
        let nv = vertices.len();
        if !(3..=config::MAX_INPUT_VERTICES).contains(&nv) {
            return Err(ViewError::VertexCount(number, nv));
        }
        let facet = Facet::new(vertices).ok_or(ViewError::ZeroArea(number))?;
        if facet.num_vertices() != nv {
            return Err(ViewError::ZeroArea(number));
        }

        let deviation = facet.planar_deviation();
        if deviation > config::PLANARITY_TOLERANCE * facet.rc {
            return Err(ViewError::NonPlanar(number, deviation));
        }
        if !facet.is_convex() {
            return Err(ViewError::NonConvex(number));
        }

        Ok(Self {
            name: name.into(),
            facet,
            role,
            base: None,
            cmbn: None,
            emit: config::DEFAULT_EMITTANCE,
            trns: 0.0,
        })
    }

    pub fn area(&self) -> f64 {
        self.facet.area
    }
}
