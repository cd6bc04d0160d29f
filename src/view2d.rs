//! Two-dimensional view factors, per unit depth.
//!
//! Every surface is a segment `v1 → v2` whose normal points to its left, so
//! a counter-clockwise outline faces inwards. Unobstructed pairs use Hottel's
//! crossed strings. Obstructed pairs are integrated over the source segment,
//! comparing 3- and 4-point Gauss rules and halving until they agree. From
//! each point the obstructions are projected onto the receiving segment and
//! the shadows merged into disjoint intervals.

use std::cmp::Ordering;

use nalgebra::{Point2, Vector2};

use crate::error::{Result, ViewError};
use crate::geom::Role;
use crate::obstructed::{Direction, Params};
use crate::quadrature;
use crate::stats::{Counters, PairKind, PairOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic;
    use approx::assert_relative_eq;

    fn surface(index: usize, a: [f64; 2], b: [f64; 2], role: Role) -> Surface2D {
        Surface2D::new(
            index,
            format!("s{}", index + 1),
            Point2::new(a[0], a[1]),
            Point2::new(b[0], b[1]),
            role,
        )
        .unwrap()
    }

    fn params() -> Params {
        Params {
            eps_adap: 1.0e-5,
            max_recursion: 12,
            min_recursion: 0,
            prj_reverse: false,
        }
    }

    /// Floor and ceiling of unit width, a two-sided baffle between them.
    fn baffled(lo: f64, hi: f64) -> Vec<Surface2D> {
        vec![
            surface(0, [0.0, 0.0], [1.0, 0.0], Role::Rad),
            surface(1, [1.0, 1.0], [0.0, 1.0], Role::Rad),
            surface(2, [lo, 0.5], [hi, 0.5], Role::Obso),
            surface(3, [hi, 0.5], [lo, 0.5], Role::Obso),
        ]
    }

    #[test]
    fn crossed_strings_triangle() {
        let a = Segment::new(Point2::new(0.0, 0.0), Point2::new(3.0, 0.0)).unwrap();
        let b = Segment::new(Point2::new(3.0, 0.0), Point2::new(0.0, 4.0)).unwrap();
        let c = Segment::new(Point2::new(0.0, 4.0), Point2::new(0.0, 0.0)).unwrap();
        assert_relative_eq!(crossed_strings(&a, &b), 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            crossed_strings(&a, &b) / a.length,
            analytic::triangle_enclosure(3.0, 5.0, 4.0),
            epsilon = 1e-12
        );
        let row: f64 = [&b, &c].iter().map(|s| crossed_strings(&a, s)).sum();
        assert_relative_eq!(row / a.length, 1.0, epsilon = 1e-12);
    }

    fn plates() -> (Segment, Segment) {
        (
            Segment::new(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)).unwrap(),
            Segment::new(Point2::new(1.0, 1.0), Point2::new(0.0, 1.0)).unwrap(),
        )
    }

    #[test]
    fn parallel_plates() {
        let (a, b) = plates();
        assert_relative_eq!(crossed_strings(&a, &b), 2f64.sqrt() - 1.0, epsilon = 1e-12);
        assert_relative_eq!(crossed_strings(&b, &a), 2f64.sqrt() - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn point_integration_matches_crossed_strings() {
        let (a, b) = plates();
        let frame = Frame2D::new(&a);
        let source = Segment::new(frame.point(&b.v1), frame.point(&b.v2)).unwrap();
        let scene = ShadowScene2D {
            normal: source.normal,
            base: Interval { xl: 0.0, xr: 1.0 },
            shades: Vec::new(),
            eps: 1.0e-7,
        };
        let mut adapt = Adapt2D {
            scene: &scene,
            eps_af: 1.0e-7,
            max_recursion: 12,
            min_recursion: 0,
            failed: false,
        };
        let mut counters = Counters::new();
        let af = adapt.view(source.v1, source.v2, source.length, 0, &mut counters);
        assert!(!adapt.failed);
        assert_relative_eq!(af, 2f64.sqrt() - 1.0, epsilon = 1e-6);
        assert!(counters.used_points > 0);
    }

    #[test]
    fn shadows_merge() {
        let mut shadows = Shadows::new(Interval { xl: 0.0, xr: 10.0 }, 1.0e-6);
        assert_eq!(shadows.add(Interval { xl: 1.0, xr: 2.0 }), Merge::Added);
        assert_eq!(shadows.add(Interval { xl: 1.5, xr: 1.8 }), Merge::Unchanged);
        assert_eq!(shadows.add(Interval { xl: 3.0, xr: 4.0 }), Merge::Added);
        assert_eq!(shadows.used.len(), 2);
        assert_eq!(shadows.add(Interval { xl: 1.5, xr: 3.5 }), Merge::Added);
        assert_eq!(shadows.used, vec![Interval { xl: 1.0, xr: 4.0 }]);
        assert_eq!(shadows.add(Interval { xl: -5.0, xr: 0.5 }), Merge::Added);
        assert_eq!(shadows.add(Interval { xl: 0.0, xr: 0.0 }), Merge::Unchanged);
        assert_eq!(shadows.add(Interval { xl: 0.2, xr: 12.0 }), Merge::Covered);
    }

    #[test]
    fn segments_below_the_axis_are_dropped() {
        let a = Point2::new(0.0, -1.0);
        let b = Point2::new(1.0, -2.0);
        assert!(clip_below_axis(a, b).is_none());
        let (p, q) = clip_below_axis(Point2::new(0.0, -1.0), Point2::new(2.0, 1.0)).unwrap();
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);
        assert_eq!(q, Point2::new(2.0, 1.0));
    }

    #[test]
    fn closed_outline_has_no_obstructions() {
        let surfaces = vec![
            surface(0, [0.0, 0.0], [3.0, 0.0], Role::Rad),
            surface(1, [3.0, 0.0], [0.0, 4.0], Role::Rad),
            surface(2, [0.0, 4.0], [0.0, 0.0], Role::Rad),
        ];
        assert!(possible_obstructions_2d(&surfaces).is_empty());
    }

    #[test]
    fn full_baffle_blocks() {
        let surfaces = baffled(-0.5, 1.5);
        let possible = possible_obstructions_2d(&surfaces);
        assert_eq!(possible.len(), 2);
        let engine = Engine2D::new(&surfaces, params());
        let mut counters = Counters::new();
        let outcome = engine.pair(1, 0, &mut counters).unwrap();
        assert_eq!(outcome.kind, PairKind::Blocked(3));
        assert_eq!(outcome.af, 0.0);
    }

    #[test]
    fn half_baffle_halves_the_view() {
        let surfaces = baffled(-1.0, 0.5);
        let engine = Engine2D::new(&surfaces, params());
        let mut counters = Counters::new();
        let outcome = engine.pair(1, 0, &mut counters).unwrap();
        assert!(outcome.converged);
        assert!(matches!(outcome.kind, PairKind::Obstructed { obstructions: 1, .. }));
        assert_relative_eq!(outcome.af, 0.5 * (2f64.sqrt() - 1.0), epsilon = 5e-4);
    }

    #[test]
    fn reversed_projection_agrees() {
        let surfaces = baffled(-1.0, 0.5);
        let mut reversed = params();
        reversed.prj_reverse = true;
        let mut counters = Counters::new();
        let forward = Engine2D::new(&surfaces, params()).pair(1, 0, &mut counters).unwrap();
        let backward = Engine2D::new(&surfaces, reversed).pair(1, 0, &mut counters).unwrap();
        assert_relative_eq!(forward.af, backward.af, epsilon = 5e-4);
    }

    #[test]
    fn crossing_segments_intersect() {
        let a = Segment::new(Point2::new(0.0, 0.0), Point2::new(2.0, 0.0)).unwrap();
        let b = Segment::new(Point2::new(1.0, -1.0), Point2::new(1.0, 1.0)).unwrap();
        assert_eq!(
            self_obstruction_2d(0, &a, 1, &b),
            Err(ViewError::SurfacesIntersect(1, 2))
        );
    }

    #[test]
    fn partly_hidden_segment_is_clipped() {
        // b runs along x = 1 facing -x; only its upper half is in front of a
        let a = Segment::new(Point2::new(0.0, 0.0), Point2::new(0.5, 0.0)).unwrap();
        let b = Segment::new(Point2::new(1.0, -1.0), Point2::new(1.0, 1.0)).unwrap();
        let (ca, cb) = self_obstruction_2d(0, &a, 1, &b).unwrap().unwrap();
        assert_eq!(ca, a);
        assert_relative_eq!(cb.length, 1.0, epsilon = 1e-12);
        assert_relative_eq!(cb.v1.y, 0.0, epsilon = 1e-12);
        assert_eq!(cb.v2, Point2::new(1.0, 1.0));
    }
}

/// Comparisons against a line use single precision resolution.
const SIDE_EPS: f64 = f32::EPSILON as f64;

/// A straight 2-D surface with its unit normal to the left of `v1 → v2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub v1: Point2<f64>,
    pub v2: Point2<f64>,
    pub normal: Vector2<f64>,
    pub w: f64,
    pub length: f64,
}

impl Segment {
    /// Returns `None` for a zero-length segment.
    pub fn new(v1: Point2<f64>, v2: Point2<f64>) -> Option<Self> {
        let v = v2 - v1;
        let length = v.norm();
        if length <= SIDE_EPS {
            return None;
        }
        let normal = Vector2::new(-v.y, v.x) / length;
        let mid = nalgebra::center(&v1, &v2);
        Some(Self {
            v1,
            v2,
            normal,
            w: -normal.dot(&mid.coords),
            length,
        })
    }

    /// Signed distance from the line, positive in front.
    pub fn distance(&self, p: &Point2<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.w
    }

    pub fn midpoint(&self) -> Point2<f64> {
        nalgebra::center(&self.v1, &self.v2)
    }

    fn side(&self, p: &Point2<f64>) -> i8 {
        let d = self.distance(p);
        if d > SIDE_EPS {
            1
        } else if d < -SIDE_EPS {
            -1
        } else {
            0
        }
    }

    /// Counts of end points in front of and behind `plane`.
    fn relation(&self, plane: &Segment, eps: f64) -> (bool, bool) {
        let mut front = false;
        let mut behind = false;
        for p in [&self.v1, &self.v2] {
            let d = plane.distance(p);
            front |= d > eps;
            behind |= d < -eps;
        }
        (front, behind)
    }

    /// The part in front of `plane`, keeping the vertex order.
    fn clip_front(&self, plane: &Segment, eps: f64) -> Option<Segment> {
        let flush = |d: f64| if d.abs() <= eps { 0.0 } else { d };
        let d1 = flush(plane.distance(&self.v1));
        let d2 = flush(plane.distance(&self.v2));
        if d1 >= 0.0 && d2 >= 0.0 {
            return Some(*self);
        }
        if d1 <= 0.0 && d2 <= 0.0 {
            return None;
        }
        let x = self.v1 + (self.v2 - self.v1) * (d1 / (d1 - d2));
        if d1 < 0.0 {
            Segment::new(x, self.v2)
        } else {
            Segment::new(self.v1, x)
        }
    }
}

/// One surface of a 2-D geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface2D {
    pub name: String,
    pub segment: Segment,
    pub role: Role,
    pub base: Option<usize>,
    pub cmbn: Option<usize>,
    pub emit: f64,
}

impl Surface2D {
    pub fn new(
        index: usize,
        name: impl Into<String>,
        v1: Point2<f64>,
        v2: Point2<f64>,
        role: Role,
    ) -> Result<Self> {
        if role.is_mask() {
            return Err(ViewError::InvalidInput(format!(
                "surface {}: masks and nulls are not supported in 2-D",
                index + 1
            )));
        }
        let segment = Segment::new(v1, v2).ok_or(ViewError::ZeroArea(index + 1))?;
        Ok(Self {
            name: name.into(),
            segment,
            role,
            base: None,
            cmbn: None,
            emit: crate::config::DEFAULT_EMITTANCE,
        })
    }

    /// Length, the area per unit depth.
    pub fn area(&self) -> f64 {
        self.segment.length
    }
}

/// Hottel's crossed strings: area-weighted factor between two segments
/// that see each other without obstruction.
pub fn crossed_strings(a: &Segment, b: &Segment) -> f64 {
    let crossed = (b.v1 - a.v1).norm() + (b.v2 - a.v2).norm();
    let uncrossed = (b.v1 - a.v2).norm() + (b.v2 - a.v1).norm();
    0.5 * (crossed - uncrossed)
}

/// Factor from a differential strip at `p` with unit `normal` to the
/// segment `a`–`b`: half the difference of the sines of the edge angles.
pub fn point_factor(p: &Point2<f64>, normal: &Vector2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let sine = |v: &Point2<f64>| {
        let d = v - p;
        let len = d.norm();
        if len > 0.0 {
            (d.x * normal.y - d.y * normal.x) / len
        } else {
            1.0
        }
    };
    0.5 * (sine(a) - sine(b)).abs()
}

/// Surfaces with other surfaces' end points on both sides of their line,
/// longest first. Subsurfaces neither obstruct nor count.
pub fn possible_obstructions_2d(surfaces: &[Surface2D]) -> Vec<usize> {
    let solid = |s: &&Surface2D| s.role != Role::Subs;
    let mut possible: Vec<usize> = surfaces
        .iter()
        .enumerate()
        .filter(|(_, s)| solid(s))
        .filter(|(_, s)| {
            let eps = 1.0e-5 * s.area();
            let (mut front, mut behind) = (false, false);
            for other in surfaces.iter().filter(solid) {
                let (f, b) = other.segment.relation(&s.segment, eps);
                front |= f;
                behind |= b;
            }
            front && behind
        })
        .map(|(i, _)| i)
        .collect();
    possible.sort_by(|&a, &b| {
        surfaces[b]
            .area()
            .partial_cmp(&surfaces[a].area())
            .unwrap_or(Ordering::Equal)
    });
    possible
}

/// Parts of N and M that lie in front of each other.
///
/// Returns `Ok(None)` when either is wholly on or behind the other's line.
/// Segments that cross each other are an input error.
pub fn self_obstruction_2d(
    n: usize,
    srf_n: &Segment,
    m: usize,
    srf_m: &Segment,
) -> Result<Option<(Segment, Segment)>> {
    let eps_m = 1.0e-5 * srf_m.length;
    let (m_front, m_behind) = srf_m.relation(srf_n, eps_m);
    if !m_front {
        return Ok(None);
    }
    let eps_n = 1.0e-5 * srf_n.length;
    let (n_front, n_behind) = srf_n.relation(srf_m, eps_n);
    if !n_front {
        return Ok(None);
    }
    if n_behind && m_behind {
        return Err(ViewError::SurfacesIntersect(n + 1, m + 1));
    }

    let clipped_n = if n_behind { srf_n.clip_front(srf_m, eps_n) } else { Some(*srf_n) };
    let clipped_m = if m_behind { srf_m.clip_front(srf_n, eps_m) } else { Some(*srf_m) };
    Ok(clipped_n.zip(clipped_m))
}

/// Which of the pair an obstruction faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sees {
    N,
    M,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate2D {
    pub index: usize,
    pub sees: Sees,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Culled2D {
    /// The obstruction covers the whole view between N and M.
    Blocked(usize),
    Candidates(Vec<Candidate2D>),
}

/// Keeps the possible obstructions that cut the quadrilateral spanned by N
/// and M, bounded by side A (N.v2 → M.v1) and side B (M.v2 → N.v1).
///
/// ```text
///                 (v2) *-------------------* (v1)
///                     /        N          /
///             side A /                   / side B
///                   /        M          /
///             (v1) *-------------------* (v2)
/// ```
pub fn box_test_2d(
    surfaces: &[Surface2D],
    possible: &[usize],
    n: usize,
    srf_n: &Segment,
    m: usize,
    srf_m: &Segment,
) -> Culled2D {
    let side_a = Segment::new(srf_n.v2, srf_m.v1);
    let side_b = Segment::new(srf_m.v2, srf_n.v1);
    let mut candidates = Vec::new();

    for &j in possible {
        if j == n || j == m {
            continue;
        }
        let sj = &surfaces[j].segment;
        // N and M against J
        let u = [sj.side(&srf_n.v1), sj.side(&srf_n.v2), sj.side(&srf_m.v1), sj.side(&srf_m.v2)];
        // J against the sides, N and M
        let a = side_a.as_ref().map(|side| (side.side(&sj.v1), side.side(&sj.v2)));
        if matches!(a, Some((a1, a2)) if a1 <= 0 && a2 <= 0) {
            continue;
        }
        let b = side_b.as_ref().map(|side| (side.side(&sj.v1), side.side(&sj.v2)));
        if matches!(b, Some((b1, b2)) if b1 <= 0 && b2 <= 0) {
            continue;
        }
        let (n1, n2) = (srf_n.side(&sj.v1), srf_n.side(&sj.v2));
        if n1 <= 0 && n2 <= 0 {
            continue;
        }
        let (m1, m2) = (srf_m.side(&sj.v1), srf_m.side(&sj.v2));
        if m1 <= 0 && m2 <= 0 {
            continue;
        }
        if u.iter().all(|&s| s <= 0) || u.iter().all(|&s| s >= 0) {
            continue;
        }

        // J separates N from M and spans the quadrilateral from side to side
        let separates = u[0] <= 0 && u[1] <= 0 && u[2] >= 0 && u[3] >= 0;
        let spans = match (a, b) {
            (None, Some((b1, _))) => b1 <= 0 && n2 <= 0 && m2 <= 0,
            (Some((_, a2)), None) => a2 <= 0 && n1 <= 0 && m1 <= 0,
            (Some((_, a2)), Some((b1, _))) => a2 <= 0 && b1 <= 0,
            (None, None) => n2 <= 0 && m2 <= 0,
        };
        if separates && spans {
            return Culled2D::Blocked(j);
        }

        let sees = match (u[0] > 0 || u[1] > 0, u[2] > 0 || u[3] > 0) {
            (true, false) => Sees::N,
            (false, true) => Sees::M,
            _ => Sees::Both,
        };
        candidates.push(Candidate2D { index: j, sees });
    }
    Culled2D::Candidates(candidates)
}

/// Source of the shadow projection: the surface farther from its nearest
/// facing obstruction, distances scaled by the opposite length. Ties go to
/// the shorter surface as source.
pub fn projection_direction_2d(
    surfaces: &[Surface2D],
    srf_n: &Segment,
    srf_m: &Segment,
    candidates: &[Candidate2D],
    reverse: bool,
) -> Direction {
    let nearest = |centre: Point2<f64>, hidden: Sees| {
        candidates
            .iter()
            .filter(|c| c.sees != hidden)
            .map(|c| (surfaces[c.index].segment.midpoint() - centre).norm())
            .fold(f64::INFINITY, f64::min)
    };
    let to_n = nearest(srf_n.midpoint(), Sees::M) * srf_m.length;
    let to_m = nearest(srf_m.midpoint(), Sees::N) * srf_n.length;

    let direction = match to_n.partial_cmp(&to_m) {
        Some(Ordering::Greater) => Direction::NtoM,
        Some(Ordering::Less) => Direction::MtoN,
        _ if srf_n.length <= srf_m.length => Direction::NtoM,
        _ => Direction::MtoN,
    };
    match (direction, reverse) {
        (d, false) => d,
        (Direction::NtoM, true) => Direction::MtoN,
        (Direction::MtoN, true) => Direction::NtoM,
    }
}

/// Puts the start of surface 2 at the origin and its end on `+x`.
#[derive(Debug, Clone, Copy)]
struct Frame2D {
    origin: Point2<f64>,
    cos: f64,
    sin: f64,
}

impl Frame2D {
    fn new(target: &Segment) -> Self {
        let v = (target.v2 - target.v1) / target.length;
        Self {
            origin: target.v1,
            cos: v.x,
            sin: v.y,
        }
    }

    fn point(&self, p: &Point2<f64>) -> Point2<f64> {
        let d = p - self.origin;
        Point2::new(d.x * self.cos + d.y * self.sin, d.y * self.cos - d.x * self.sin)
    }
}

/// The part of `a`–`b` on or above `y = 0`.
fn clip_below_axis(a: Point2<f64>, b: Point2<f64>) -> Option<(Point2<f64>, Point2<f64>)> {
    let cross = |a: Point2<f64>, b: Point2<f64>| Point2::new(a.x - a.y * (b.x - a.x) / (b.y - a.y), 0.0);
    match (a.y < 0.0, b.y < 0.0) {
        (true, true) => None,
        (true, false) => Some((cross(a, b), b)),
        (false, true) => Some((a, cross(a, b))),
        (false, false) => Some((a, b)),
    }
}

/// The part of `a`–`b` on or below `y = yc`.
fn clip_above(a: Point2<f64>, b: Point2<f64>, yc: f64) -> Option<(Point2<f64>, Point2<f64>)> {
    let cross = |a: Point2<f64>, b: Point2<f64>| {
        Point2::new(a.x + (yc - a.y) * (b.x - a.x) / (b.y - a.y), yc)
    };
    match (a.y > yc, b.y > yc) {
        (true, true) => None,
        (true, false) => Some((cross(a, b), b)),
        (false, true) => Some((a, cross(a, b))),
        (false, false) => Some((a, b)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Interval {
    xl: f64,
    xr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Unchanged,
    Added,
    /// The shadows cover the whole base.
    Covered,
}

/// Disjoint shadow intervals on the receiving segment.
#[derive(Debug)]
struct Shadows {
    base: Interval,
    used: Vec<Interval>,
    /// Gaps narrower than this are closed.
    eps: f64,
}

impl Shadows {
    fn new(base: Interval, eps: f64) -> Self {
        Self {
            base,
            used: Vec::new(),
            eps,
        }
    }

    fn add(&mut self, mut new: Interval) -> Merge {
        let eps = self.eps;
        new.xl = new.xl.max(self.base.xl);
        new.xr = new.xr.min(self.base.xr);
        if new.xr < new.xl + eps {
            return Merge::Unchanged;
        }

        let mut i = 0;
        while i < self.used.len() {
            let old = self.used[i];
            if old.xl >= new.xr + eps || old.xr <= new.xl - eps {
                i += 1;
                continue;
            }
            if old.xl < new.xl {
                if old.xr >= new.xr {
                    return Merge::Unchanged;
                }
                new.xl = old.xl;
            } else if old.xr > new.xr {
                new.xr = old.xr;
            }
            self.used.swap_remove(i);
        }
        self.used.push(new);

        if new.xl < self.base.xl + eps && self.base.xr < new.xr + eps {
            Merge::Covered
        } else {
            Merge::Added
        }
    }
}

/// Geometry of one obstructed pair in the projection frame.
#[derive(Debug)]
struct ShadowScene2D {
    /// Normal of the source segment.
    normal: Vector2<f64>,
    /// Receiving segment along `y = 0`.
    base: Interval,
    shades: Vec<(Point2<f64>, Point2<f64>)>,
    eps: f64,
}

impl ShadowScene2D {
    /// Point factor from `p` to the lit part of the receiving segment.
    fn point_view(&self, p: &Point2<f64>) -> f64 {
        let left = Point2::new(self.base.xl, 0.0);
        let right = Point2::new(self.base.xr, 0.0);
        let df = point_factor(p, &self.normal, &left, &right);
        if p.y < 0.5e-6 {
            return 0.5 * df;
        }

        let yc = 0.999 * p.y;
        let mut shadows = Shadows::new(self.base, self.eps);
        for &(a, b) in &self.shades {
            let Some((a, b)) = clip_above(a, b, yc) else {
                continue;
            };
            let project = |v: Point2<f64>| p.x - p.y * (p.x - v.x) / (p.y - v.y);
            let (x1, x2) = (project(a), project(b));
            let shadow = Interval {
                xl: x1.min(x2),
                xr: x1.max(x2),
            };
            if shadows.add(shadow) == Merge::Covered {
                return 0.0;
            }
        }

        let lit = shadows.used.iter().fold(df, |lit, s| {
            lit - point_factor(p, &self.normal, &Point2::new(s.xr, 0.0), &Point2::new(s.xl, 0.0))
        });
        lit.max(0.0)
    }
}

/// Adaptive Gauss integration along the source segment.
struct Adapt2D<'a> {
    scene: &'a ShadowScene2D,
    eps_af: f64,
    max_recursion: usize,
    min_recursion: usize,
    failed: bool,
}

impl Adapt2D<'_> {
    fn view(
        &mut self,
        v1: Point2<f64>,
        v2: Point2<f64>,
        length: f64,
        level: usize,
        counters: &mut Counters,
    ) -> f64 {
        let scene = self.scene;
        let d = v2 - v1;
        let gauss = |n_div: usize| {
            let (x, w) = quadrature::segment_rule(n_div);
            x.iter()
                .zip(w)
                .map(|(x, w)| w * length * scene.point_view(&(v1 + d * *x)))
                .sum::<f64>()
        };
        let evaluated = level >= self.min_recursion;
        let (af3, af4) = if evaluated {
            (gauss(3), gauss(4))
        } else {
            (-self.eps_af, self.eps_af)
        };

        let mut converged = (af4 - af3).abs() < self.eps_af;
        if !converged && level >= self.max_recursion {
            self.failed = true;
            converged = true;
        }
        if evaluated {
            counters.wasted_points += 3;
            if converged {
                counters.used_points += 4;
            } else {
                counters.wasted_points += 4;
            }
        }

        if converged {
            af4
        } else {
            let mid = nalgebra::center(&v1, &v2);
            self.view(v1, mid, 0.5 * length, level + 1, counters)
                + self.view(mid, v2, 0.5 * length, level + 1, counters)
        }
    }
}

/// Pair solver for a 2-D geometry.
#[derive(Debug)]
pub struct Engine2D<'a> {
    surfaces: &'a [Surface2D],
    possible: Vec<usize>,
    params: Params,
}

impl<'a> Engine2D<'a> {
    /// `params.eps_adap` is the obstructed convergence tolerance.
    pub fn new(surfaces: &'a [Surface2D], params: Params) -> Self {
        Self {
            surfaces,
            possible: possible_obstructions_2d(surfaces),
            params,
        }
    }

    pub fn possible(&self) -> &[usize] {
        &self.possible
    }

    /// Area-weighted factor from surface `n` to surface `m`.
    pub fn pair(&self, n: usize, m: usize, counters: &mut Counters) -> Result<PairOutcome> {
        let (sn, sm) = (&self.surfaces[n], &self.surfaces[m]);
        let Some((srf_n, srf_m)) = self_obstruction_2d(n, &sn.segment, m, &sm.segment)? else {
            return Ok(PairOutcome::zero(PairKind::Hidden));
        };

        let candidates = match box_test_2d(self.surfaces, &self.possible, n, &srf_n, m, &srf_m) {
            Culled2D::Blocked(j) => return Ok(PairOutcome::zero(PairKind::Blocked(j))),
            Culled2D::Candidates(c) => c,
        };
        if candidates.is_empty() {
            return Ok(PairOutcome {
                af: crossed_strings(&srf_n, &srf_m),
                kind: PairKind::CrossedStrings,
                converged: true,
            });
        }

        let direction =
            projection_direction_2d(self.surfaces, &srf_n, &srf_m, &candidates, self.params.prj_reverse);
        let (s1, srf1, srf2, hidden) = match direction {
            Direction::NtoM => (n, srf_n, srf_m, Sees::N),
            Direction::MtoN => (m, srf_m, srf_n, Sees::M),
        };

        let frame = Frame2D::new(&srf2);
        let source =
            Segment::new(frame.point(&srf1.v1), frame.point(&srf1.v2)).ok_or(ViewError::ZeroArea(s1 + 1))?;
        let shades: Vec<_> = candidates
            .iter()
            .filter(|c| c.sees != hidden)
            .filter_map(|c| {
                let s = &self.surfaces[c.index].segment;
                clip_below_axis(frame.point(&s.v1), frame.point(&s.v2))
            })
            .collect();
        let scene = ShadowScene2D {
            normal: source.normal,
            base: Interval {
                xl: 0.0,
                xr: srf2.length,
            },
            shades,
            eps: 0.01 * self.params.eps_adap * srf2.length,
        };

        let mut adapt = Adapt2D {
            scene: &scene,
            eps_af: srf1.length.min(srf2.length) * self.params.eps_adap,
            max_recursion: self.params.max_recursion,
            min_recursion: self.params.min_recursion,
            failed: false,
        };
        let af = adapt.view(source.v1, source.v2, source.length, 0, counters);
        Ok(PairOutcome {
            af,
            kind: PairKind::Obstructed {
                source: s1,
                obstructions: scene.shades.len(),
            },
            converged: !adapt.failed,
        })
    }
}
