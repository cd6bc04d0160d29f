//! View factors between mutually visible surfaces with nothing in between.
//!
//! Five integration methods trade cost for generality:
//! - **DAI**: Gauss quadrature over both areas
//! - **SAI**: Gauss quadrature over one area with the exact point-to-polygon factor
//! - **DLI**: Gauss quadrature over the edges of both surfaces (contour integral)
//! - **SLI**: Gauss quadrature over the edges of one surface, exact along the other
//! - **ALI**: adaptive Simpson integration along the edges of one surface
//!
//! The fixed-order methods are refined from 1 to 4 divisions and fall back to
//! ALI when successive estimates never agree. [`select_method`] picks the
//! cheapest method expected to converge from the radius ratio and relative
//! separation of the pair.
//!
//! All functions return area-weighted factors `A1·F12`.

use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::str::FromStr;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::{EPS, EPS2};
use crate::geom::{DirCos, Facet};
use crate::quadrature::{self, GaussPoint};
use crate::stats::Counters;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic;
    use approx::assert_relative_eq;

    fn facet(points: &[[f64; 3]]) -> Facet {
        Facet::new(points.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect()).unwrap()
    }

    fn parallel_squares(h: f64) -> (Facet, Facet) {
        (
            facet(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]),
            facet(&[[0.0, 0.0, h], [0.0, 1.0, h], [1.0, 1.0, h], [1.0, 0.0, h]]),
        )
    }

    #[test]
    fn all_methods_agree_for_parallel_squares() {
        let (a, b) = parallel_squares(1.0);
        let exact = analytic::parallel_rectangles(1.0, 1.0, 1.0);
        for method in Method::ALL {
            let mut counters = Counters::new();
            let result = view_unobstructed(&a, &b, method, 1e-7, 12, &mut counters);
            assert_relative_eq!(result.af, exact, epsilon = 2e-4);
        }
        let mut counters = Counters::new();
        let ali = view_unobstructed(&a, &b, Method::Ali, 1e-9, 12, &mut counters);
        assert_relative_eq!(ali.af, exact, epsilon = 1e-7);
        assert!(ali.converged);
        assert!(counters.line_points > 0);
    }

    #[test]
    fn perpendicular_shared_edge_uses_exact_colinear_term() {
        let floor = facet(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]);
        let wall = facet(&[[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [0.0, 0.0, 1.0]]);
        let exact = analytic::perpendicular_rectangles(1.0, 1.0, 1.0);
        let mut counters = Counters::new();
        let ali = view_unobstructed(&floor, &wall, Method::Ali, 1e-9, 12, &mut counters);
        assert_relative_eq!(ali.af, exact, epsilon = 1e-6);
    }

    #[test]
    fn point_factor_to_large_square() {
        let (_, b) = parallel_squares(1.0);
        let f = point_polygon_factor(&Point3::new(0.5, 0.5, 0.0), &Vector3::z(), &b.vertices);
        // centred point below a unit square at height 1
        let exact = analytic::point_to_parallel_rectangle(0.5, 0.5, 1.0) * 4.0;
        assert_relative_eq!(f, exact, epsilon = 1e-10);
    }

    #[test]
    fn method_table() {
        let (a, b) = parallel_squares(10.0);
        let thresholds = MethodThresholds::for_tolerance(1e-4);
        let choice = select_method(&a, &b, 10.0, 1e-4, &thresholds);
        assert_eq!(choice.method, Method::Dai);

        let (a, b) = parallel_squares(0.2);
        let choice = select_method(&a, &b, 0.2, 1e-4, &thresholds);
        assert_eq!(choice.method, Method::Ali);

        let small = facet(&[[0.0, 0.0, 2.0], [0.0, 0.1, 2.0], [0.1, 0.1, 2.0], [0.1, 0.0, 2.0]]);
        let big = facet(&[[-2.0, -2.0, 0.0], [2.0, -2.0, 0.0], [2.0, 2.0, 0.0], [-2.0, 2.0, 0.0]]);
        let dist = (small.centroid - big.centroid).norm();
        let choice = select_method(&small, &big, dist, 1e-4, &thresholds);
        assert_eq!(choice.method, Method::Sai);
        assert!(choice.rc_ratio > 10.0);
    }

    #[test]
    fn tighter_tolerance_raises_thresholds() {
        let loose = MethodThresholds::for_tolerance(1e-3);
        let tight = MethodThresholds::for_tolerance(1e-8);
        assert!(tight.dai1 > loose.dai1);
        assert!(tight.sli1 > loose.sli1);
    }

    #[test]
    fn recursion_cap_bounds_error() {
        let (a, b) = parallel_squares(0.1);
        let exact = analytic::parallel_rectangles(1.0, 1.0, 0.1);
        let mut counters = Counters::new();
        let coarse = view_unobstructed(&a, &b, Method::Ali, 1e-12, 0, &mut counters);
        let fine = view_unobstructed(&a, &b, Method::Ali, 1e-12, 14, &mut counters);
        assert!(!coarse.converged);
        assert!((fine.af - exact).abs() < (coarse.af - exact).abs());
        assert!((fine.af - exact).abs() < 1e-7);
    }

    #[test]
    fn method_from_str() {
        assert_eq!("dli".parse::<Method>(), Ok(Method::Dli));
        assert!("xyz".parse::<Method>().is_err());
    }
}

/// Unobstructed integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Dai,
    Sai,
    Dli,
    Sli,
    Ali,
}

impl Method {
    pub const ALL: [Method; 5] = [Method::Dai, Method::Sai, Method::Dli, Method::Sli, Method::Ali];

    pub fn index(&self) -> usize {
        match self {
            Method::Dai => 0,
            Method::Sai => 1,
            Method::Dli => 2,
            Method::Sli => 3,
            Method::Ali => 4,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Dai => "DAI",
            Method::Sai => "SAI",
            Method::Dli => "DLI",
            Method::Sli => "SLI",
            Method::Ali => "ALI",
        };
        f.pad(name)
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DAI" => Ok(Method::Dai),
            "SAI" => Ok(Method::Sai),
            "DLI" => Ok(Method::Dli),
            "SLI" => Ok(Method::Sli),
            "ALI" => Ok(Method::Ali),
            _ => Err(format!(
                "unknown method '{}', expected one of DAI, SAI, DLI, SLI, ALI",
                s
            )),
        }
    }
}

/// Relative-separation cutoffs of the method table for one tolerance tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodThresholds {
    pub sli4: f64,
    pub sai4: f64,
    pub sai10: f64,
    pub dai1: f64,
    pub sli1: f64,
}

impl MethodThresholds {
    /// Tighter tolerances demand larger separations before a fixed-order
    /// method is trusted.
    pub fn for_tolerance(eps_adap: f64) -> Self {
        let (sli4, sai4, sai10, dai1, sli1) = if eps_adap < 0.99e-7 {
            (0.7, 1.5, 1.8, 3.0, 3.0)
        } else if eps_adap < 0.99e-6 {
            (0.5, 1.2, 1.2, 2.3, 2.2)
        } else if eps_adap < 0.99e-5 {
            (0.45, 1.1, 1.0, 1.7, 1.5)
        } else if eps_adap < 0.99e-4 {
            (0.4, 1.0, 0.8, 1.3, 0.9)
        } else {
            (0.3, 0.9, 0.6, 1.0, 0.6)
        };
        Self {
            sli4,
            sai4,
            sai10,
            dai1,
            sli1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodChoice {
    pub method: Method,
    /// `rc2 / rc1`, at least 1.
    pub rc_ratio: f64,
    /// Centroid distance over `rc1 + rc2`.
    pub rel_sep: f64,
}

/// Chooses the integration method. `srf1` must be the surface with the
/// smaller bounding radius.
pub fn select_method(
    srf1: &Facet,
    srf2: &Facet,
    dist: f64,
    eps_adap: f64,
    t: &MethodThresholds,
) -> MethodChoice {
    let rc_ratio = srf2.rc / srf1.rc;
    let rel_sep = dist / (srf1.rc + srf2.rc);

    let mut method = None;
    if rc_ratio > 4.0 {
        if srf1.shape.has_rule() {
            let rel_dot = srf2.dc.distance(&srf1.centroid);
            let near_plane = rel_dot > 2.0 * srf1.rc;
            let sai = if rc_ratio > 10.0 { t.sai10 } else { t.sai4 };
            if rel_sep > sai || near_plane {
                method = Some(Method::Sai);
            }
        }
        if method.is_none() && rel_sep > t.sli4 {
            method = Some(Method::Sli);
        }
    }
    if method.is_none() && rel_sep > t.dai1 && srf1.shape.has_rule() && srf2.shape.has_rule() {
        method = Some(Method::Dai);
    }
    if method.is_none() && rel_sep > t.sli1 {
        method = Some(Method::Sli);
    }
    let method = match method {
        Some(Method::Sli) if eps_adap < 0.5e-6 => Method::Ali,
        Some(m) => m,
        None => Method::Ali,
    };

    MethodChoice {
        method,
        rc_ratio,
        rel_sep,
    }
}

/// Outcome of one unobstructed computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unobstructed {
    pub af: f64,
    pub method: Method,
    /// Divisions at convergence; 5 when a fixed-order method fell back to ALI.
    pub n_edge_div: usize,
    pub converged: bool,
}

/// Area-weighted factor `A1·F12` for an unobstructed pair.
pub fn view_unobstructed(
    srf1: &Facet,
    srf2: &Facet,
    method: Method,
    eps_af: f64,
    max_recurs_ali: usize,
    counters: &mut Counters,
) -> Unobstructed {
    let mut af1 = 2.0 * srf1.area;
    if method != Method::Ali {
        for n_div in 1..=4 {
            let af0 = af1;
            af1 = match method {
                Method::Dai => view_2ai(
                    &srf1.dc,
                    &quadrature::area_points(n_div, srf1),
                    &srf2.dc,
                    &quadrature::area_points(n_div, srf2),
                ),
                Method::Sai => view_1ai(&srf1.dc, &quadrature::area_points(n_div, srf1), srf2),
                Method::Sli => {
                    let edges = quadrature::divide_edges(n_div, &srf1.vertices);
                    view_1li(&edges, &srf2.vertices, counters)
                }
                Method::Dli => view_2li(
                    &quadrature::divide_edges(n_div, &srf1.vertices),
                    &quadrature::divide_edges(n_div, &srf2.vertices),
                ),
                Method::Ali => unreachable!(),
            };
            if (af1 - af0).abs() < eps_af {
                return Unobstructed {
                    af: af1,
                    method,
                    n_edge_div: n_div,
                    converged: true,
                };
            }
        }
    }

    let mut ctx = AdaptiveLine::new(eps_af, max_recurs_ali);
    let af = ctx.view(&srf1.vertices, &srf2.vertices);
    counters.line_points += ctx.evaluations;
    Unobstructed {
        af,
        method,
        n_edge_div: if method == Method::Ali { 2 } else { 5 },
        converged: !ctx.failed,
    }
}

/// Double area integration.
pub fn view_2ai(dc1: &DirCos, pt1: &[GaussPoint], dc2: &DirCos, pt2: &[GaussPoint]) -> f64 {
    let mut sum = 0.0;
    for p in pt1 {
        for q in pt2 {
            let v = q.point - p.point;
            let r2 = v.norm_squared();
            sum -= v.dot(&dc1.normal) * v.dot(&dc2.normal) * p.weight * q.weight / (r2 * r2);
        }
    }
    sum / PI
}

/// Single area integration: quadrature over surface 1, exact over surface 2.
pub fn view_1ai(dc1: &DirCos, pt1: &[GaussPoint], srf2: &Facet) -> f64 {
    pt1.iter()
        .map(|g| g.weight * point_polygon_factor(&g.point, &dc1.normal, &srf2.vertices))
        .sum()
}

/// Factor from a differential area at `p` with normal `n` to a polygon in
/// front of it.
pub fn point_polygon_factor(p: &Point3<f64>, n: &Vector3<f64>, vertices: &[Point3<f64>]) -> f64 {
    let nv = vertices.len();
    let mut sum = 0.0;
    for i in 0..nv {
        let r1 = vertices[i] - p;
        let r2 = vertices[(i + 1) % nv] - p;
        let c = r1.cross(&r2);
        let cn = c.norm();
        if cn <= EPS2 * r1.norm() * r2.norm() {
            continue;
        }
        let theta = cn.atan2(r1.dot(&r2));
        sum += theta * n.dot(&c) / cn;
    }
    sum.abs() / (2.0 * PI)
}

/// Double line integration over the Gauss divisions of both contours.
pub fn view_2li(edges1: &[quadrature::Edge], edges2: &[quadrature::Edge]) -> f64 {
    let mut sum = 0.0;
    for e1 in edges1 {
        for e2 in edges2 {
            let dot = e1.dir.dot(&e2.dir);
            if dot.abs() < EPS2 {
                continue;
            }
            let mut sumt = 0.0;
            for d1 in &e1.divisions {
                for d2 in &e2.divisions {
                    let r2 = (d2.point - d1.point).norm_squared();
                    if r2 > EPS2 {
                        sumt += d1.s * d2.s * r2.ln();
                    }
                }
            }
            sum += dot * sumt;
        }
    }
    sum / (4.0 * PI)
}

/// Single line integration: Gauss divisions on contour 1, exact along each
/// edge of polygon 2.
pub fn view_1li(edges1: &[quadrature::Edge], v2: &[Point3<f64>], counters: &mut Counters) -> f64 {
    let nv2 = v2.len();
    let mut sum = 0.0;
    for j in 0..nv2 {
        let target = TargetEdge::new(v2[(j + nv2 - 1) % nv2], v2[j]);
        let b = target.b2.sqrt();
        for e1 in edges1 {
            let dot = target.b.dot(&e1.dir) / b;
            if dot.abs() <= EPS * b {
                continue;
            }
            let parallel = dot.abs() >= 1.0 - EPS;
            let mut sumt = 0.0;
            let mut colinear = false;
            for d in &e1.divisions {
                let (df, close) = target.part(&d.point);
                counters.line_points += 1;
                sumt += df * d.s;
                if parallel && close {
                    colinear = true;
                    break;
                }
            }
            if colinear {
                sum += dot * colinear_exact(&e1.start, &e1.end, e1.length, &target.b0, &target.b1, b);
            } else {
                sum += dot * sumt / b;
            }
        }
    }
    sum / (4.0 * PI)
}

/// Edge of polygon 2 against which line-integral points are evaluated.
#[derive(Debug, Clone, Copy)]
struct TargetEdge {
    b0: Point3<f64>,
    b1: Point3<f64>,
    b: Vector3<f64>,
    b2: f64,
}

impl TargetEdge {
    fn new(b0: Point3<f64>, b1: Point3<f64>) -> Self {
        let b = b1 - b0;
        Self {
            b0,
            b1,
            b,
            b2: b.norm_squared(),
        }
    }

    /// Line integral kernel from point `p` along this edge (Mitalas and
    /// Stephenson). The flag is set when `p` lies on the edge's line.
    fn part(&self, p: &Point3<f64>) -> (f64, bool) {
        let mut sum = 0.0;
        let s = p - self.b0;
        let s2 = s.norm_squared();
        if s2 > EPS2 {
            sum += s.dot(&self.b) * s2.ln();
        }
        let t = self.b1 - p;
        let t2 = t.norm_squared();
        if t2 > EPS2 {
            sum += t.dot(&self.b) * t2.ln();
        }
        let sxb2 = s.cross(&self.b).norm_squared();
        if sxb2 > EPS2 * self.b2 {
            let h = s2 + t2 - self.b2;
            let g = sxb2.sqrt();
            let omega = FRAC_PI_2 - (0.5 * h / g).atan();
            sum += 2.0 * (g * omega - self.b2);
            (sum, false)
        } else {
            sum -= 2.0 * self.b2;
            (sum, true)
        }
    }
}

/// Exact line integral between colinear edges `a0→a1` and `b0→b1`.
fn colinear_exact(
    a0: &Point3<f64>,
    a1: &Point3<f64>,
    a: f64,
    b0: &Point3<f64>,
    b1: &Point3<f64>,
    b: f64,
) -> f64 {
    let e2 = (a1 - b0).norm_squared();
    let d2 = (a0 - b1).norm_squared();
    if e2 < EPS2 && d2 < EPS2 {
        return b * b * ((b * b).ln() - 3.0);
    }
    let mut sum = 0.0;
    if e2 > EPS2 {
        sum += e2 - e2 * e2.ln();
    }
    if d2 > EPS2 {
        sum += d2 - d2 * d2.ln();
    }
    let c2 = (a0 - b0).norm_squared();
    if c2 > EPS2 {
        sum += c2 * c2.ln() - c2;
    }
    let f2 = (a1 - b1).norm_squared();
    if f2 > EPS2 {
        sum += f2 * f2.ln() - f2;
    }
    0.5 * sum - 2.0 * a * b
}

/// Adaptive single line integration state for one pair.
#[derive(Debug, Clone)]
struct AdaptiveLine {
    eps_af: f64,
    max_level: usize,
    failed: bool,
    evaluations: usize,
}

impl AdaptiveLine {
    fn new(eps_af: f64, max_level: usize) -> Self {
        Self {
            eps_af,
            max_level,
            failed: false,
            evaluations: 0,
        }
    }

    fn view(&mut self, v1: &[Point3<f64>], v2: &[Point3<f64>]) -> f64 {
        let (nv1, nv2) = (v1.len(), v2.len());
        let mut sum = 0.0;
        for j in 0..nv2 {
            let target = TargetEdge::new(v2[(j + nv2 - 1) % nv2], v2[j]);
            let b = target.b2.sqrt();
            for i in 0..nv1 {
                let (a0, a1) = (v1[(i + nv1 - 1) % nv1], v1[i]);
                let edge = a1 - a0;
                let a = edge.norm();
                let dot = target.b.dot(&edge) / (b * a);
                if dot.abs() <= EPS {
                    continue;
                }
                let (df0, flag0) = target.part(&a0);
                let (df2, flag2) = target.part(&a1);
                self.evaluations += 2;
                let sumt = if flag0 && flag2 {
                    colinear_exact(&a0, &a1, a, &target.b0, &target.b1, b)
                } else {
                    let mid = nalgebra::center(&a0, &a1);
                    let (df1, _) = target.part(&mid);
                    self.evaluations += 1;
                    self.adapt([a0, mid, a1], [df0, df1, df2], a / 6.0, &target, 0) / b
                };
                sum += dot * sumt;
            }
        }
        sum / (4.0 * PI)
    }

    /// Simpson's rule on 3 points compared with 5; splits until they agree.
    fn adapt(
        &mut self,
        p: [Point3<f64>; 3],
        df: [f64; 3],
        h: f64,
        target: &TargetEdge,
        level: usize,
    ) -> f64 {
        let f3 = h * (df[0] + 4.0 * df[1] + df[2]);
        let q1 = nalgebra::center(&p[0], &p[1]);
        let q3 = nalgebra::center(&p[1], &p[2]);
        let (d1, _) = target.part(&q1);
        let (d3, _) = target.part(&q3);
        self.evaluations += 2;
        let h = 0.5 * h;
        let f5 = h * (df[0] + 4.0 * d1 + 2.0 * df[1] + 4.0 * d3 + df[2]);

        if (f5 - f3).abs() <= self.eps_af {
            return f5;
        }
        let level = level + 1;
        if level > self.max_level {
            self.failed = true;
            return f5;
        }
        self.adapt([p[0], q1, p[1]], [df[0], d1, df[1]], h, target, level)
            + self.adapt([p[1], q3, p[2]], [df[1], d3, df[2]], h, target, level)
    }
}
