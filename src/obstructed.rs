//! View factors between surfaces with obstructions in between.
//!
//! All participating geometry is moved into a frame where the receiving
//! surface (surface 2) lies in the plane `z = 0` with its normal along `+z`,
//! centred on the origin and scaled to unit bounding radius. From each
//! quadrature point on surface 1 the obstructions are projected onto `z = 0`
//! and subtracted from surface 2 with the polygon engine. The point factor
//! is the exact point-to-polygon factor of whatever remains lit.
//!
//! Surface 1 is split into at most five triangles or parallelograms, each
//! integrated adaptively: a 4-point triangle rule is compared with a 7-point
//! rule (2×2 with 3×3 for parallelograms) and the patch is split into four
//! until they agree.

use geo_types::Coord;
use nalgebra::{Matrix3, Point3, Vector3};

use crate::config;
use crate::cull::Candidate;
use crate::error::{Result, ViewError};
use crate::geom::{clip_polygon, Facet, Shape, Surface};
use crate::polygon::{self, OverlapMode, PolygonArena, PolygonId};
use crate::quadrature::{self, GaussPoint};
use crate::stats::Counters;
use crate::unobstructed::point_polygon_factor;


/// Projection of shadows: rays are cast from surface 1 to surface 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Surface N is the source.
    NtoM,
    /// Surface M is the source.
    MtoN,
}

/// Integration controls for obstructed pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    pub eps_adap: f64,
    pub max_recursion: usize,
    pub min_recursion: usize,
    pub prj_reverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstructedView {
    pub af: f64,
    pub converged: bool,
    /// Surface the rays were cast from.
    pub source: usize,
    /// Obstructions left after the direction filter.
    pub obstructions: usize,
}

/// Chooses the source surface: the one farther from its nearest facing
/// obstruction, each distance scaled by the area of the opposite surface.
pub fn projection_direction(
    surfaces: &[Surface],
    srf_n: &Facet,
    srf_m: &Facet,
    candidates: &[Candidate],
    reverse: bool,
) -> Direction {
    let nearest = |facet: &Facet, facing: &dyn Fn(&Candidate) -> bool| {
        candidates
            .iter()
            .filter(|c| facing(c))
            .map(|c| (surfaces[c.index].facet.centroid - facet.centroid).norm())
            .fold(1.0e9, f64::min)
    };
    let to_n = nearest(srf_n, &|c| c.n_side.faces()) * srf_m.area;
    let to_m = nearest(srf_m, &|c| c.m_side.faces()) * srf_n.area;

    let direction = if (to_n - to_m).abs() > 0.002 * (to_n + to_m) {
        if to_n > to_m {
            Direction::NtoM
        } else {
            Direction::MtoN
        }
    } else {
        let facing_n = candidates.iter().filter(|c| c.n_side.faces()).count();
        let facing_m = candidates.iter().filter(|c| c.m_side.faces()).count();
        if facing_n > facing_m {
            Direction::NtoM
        } else {
            Direction::MtoN
        }
    };

    match (direction, reverse) {
        (d, false) => d,
        (Direction::NtoM, true) => Direction::MtoN,
        (Direction::MtoN, true) => Direction::NtoM,
    }
}

/// Rotation and scaling that puts surface 2 at `z = 0`.
#[derive(Debug, Clone, Copy)]
struct Frame {
    origin: Point3<f64>,
    rotation: Matrix3<f64>,
    scale: f64,
}

impl Frame {
    fn new(target: &Facet) -> Self {
        let (u, v) = target.frame();
        let rotation = Matrix3::from_rows(&[
            u.transpose(),
            v.transpose(),
            target.dc.normal.transpose(),
        ]);
        Self {
            origin: target.centroid,
            rotation,
            scale: 1.0 / target.rc,
        }
    }

    fn point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * (p - self.origin) * self.scale)
    }

    fn points(&self, pts: &[Point3<f64>]) -> Vec<Point3<f64>> {
        pts.iter().map(|p| self.point(p)).collect()
    }
}

/// An obstruction in the projection frame.
#[derive(Debug, Clone)]
struct Shade {
    vertices: Vec<Point3<f64>>,
    trns: f64,
}

/// Geometry of one obstructed pair in the projection frame.
#[derive(Debug, Clone)]
struct ShadowScene {
    normal: Vector3<f64>,
    target: Vec<Coord<f64>>,
    target_masks: Vec<Vec<Coord<f64>>>,
    source_masks: Vec<Facet>,
    shades: Vec<Shade>,
    window: [f64; 4],
}

/// Point factor from `p` on surface 1 to the lit part of surface 2.
fn point_view(
    scene: &ShadowScene,
    p: &Point3<f64>,
    arena: &mut PolygonArena,
) -> Result<f64> {
    if scene
        .source_masks
        .iter()
        .any(|mask| mask.contains(p, config::EPS))
    {
        return Ok(0.0);
    }

    arena.reset();
    let mut lit = match arena.insert(&scene.target, 1.0)? {
        Some(id) => vec![id],
        None => return Ok(0.0),
    };
    for mask in &scene.target_masks {
        subtract(arena, &mut lit, mask, 0.0)?;
    }

    if p.z > config::EPS {
        let zc = p.z * (1.0 - config::EPS);
        let [xmin, xmax, ymin, ymax] = scene.window;
        for shade in &scene.shades {
            if lit.is_empty() {
                break;
            }
            let below = clip_polygon(&shade.vertices, |q| zc - q.z);
            if below.len() < 3 {
                continue;
            }
            let projected: Vec<Coord<f64>> = below
                .iter()
                .map(|q| {
                    let t = p.z / (p.z - q.z);
                    Coord {
                        x: p.x + (q.x - p.x) * t,
                        y: p.y + (q.y - p.y) * t,
                    }
                })
                .collect();
            let mut shadow = polygon::limit_polygon(&projected, xmin, xmax, ymin, ymax);
            if polygon::clockwise_area(&shadow) < 0.0 {
                shadow.reverse();
            }
            subtract(arena, &mut lit, &shadow, shade.trns)?;
        }
    }

    let mut df = 0.0;
    for id in lit {
        let vertices: Vec<Point3<f64>> = arena
            .vertices(id)
            .iter()
            .map(|c| Point3::new(c.x, c.y, 0.0))
            .collect();
        df += arena.trns(id) * point_polygon_factor(p, &scene.normal, &vertices);
    }
    Ok(df)
}

/// Replaces the lit polygons by their parts outside `shadow`. Parts under a
/// translucent shadow stay lit with reduced transmittance.
fn subtract(
    arena: &mut PolygonArena,
    lit: &mut Vec<PolygonId>,
    shadow: &[Coord<f64>],
    trns: f64,
) -> Result<()> {
    let Some(shadow) = arena.insert(shadow, trns)? else {
        return Ok(());
    };
    let mode = if trns > 0.0 {
        OverlapMode::Both
    } else {
        OverlapMode::Outside
    };
    let mut next = Vec::with_capacity(lit.len() + 4);
    for id in lit.drain(..) {
        let overlap = arena.overlap(shadow, id, mode)?;
        arena.free(id);
        next.extend(overlap.inside);
        next.extend(overlap.outside);
    }
    arena.free(shadow);
    *lit = next;
    Ok(())
}

/// A triangle or parallelogram piece of surface 1.
#[derive(Debug, Clone, PartialEq)]
struct Patch {
    vertices: Vec<Point3<f64>>,
    area: f64,
}

fn triangle_area(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    0.5 * (b - a).cross(&(c - a)).norm()
}

/// Splits a convex polygon into at most five triangles or parallelograms.
fn patches(facet: &Facet) -> Vec<Patch> {
    let v = &facet.vertices;
    match facet.shape {
        Shape::Triangle | Shape::Parallelogram => vec![Patch {
            vertices: v.clone(),
            area: facet.area,
        }],
        Shape::Quadrilateral => vec![
            Patch {
                vertices: vec![v[0], v[1], v[2]],
                area: triangle_area(&v[0], &v[1], &v[2]),
            },
            Patch {
                vertices: vec![v[0], v[2], v[3]],
                area: triangle_area(&v[0], &v[2], &v[3]),
            },
        ],
        Shape::Polygon => {
            let c = facet.centroid;
            (0..v.len())
                .map(|i| {
                    let (a, b) = (v[i], v[(i + 1) % v.len()]);
                    Patch {
                        vertices: vec![c, a, b],
                        area: triangle_area(&c, &a, &b),
                    }
                })
                .collect()
        }
    }
}

/// Adaptive integration of the point function over surface 1.
struct Integrator<'s> {
    scene: &'s ShadowScene,
    eps_af: f64,
    max_recursion: usize,
    min_recursion: usize,
    failed: bool,
    points: Vec<GaussPoint>,
}

impl Integrator<'_> {
    fn sum(
        &mut self,
        n_div: usize,
        v: &[Point3<f64>],
        area: f64,
        arena: &mut PolygonArena,
    ) -> Result<f64> {
        let mut points = std::mem::take(&mut self.points);
        points.clear();
        if v.len() == 3 {
            quadrature::triangle_points(n_div, [&v[0], &v[1], &v[2]], area, &mut points);
        } else {
            quadrature::parallelogram_points(n_div, [&v[0], &v[1], &v[2], &v[3]], area, &mut points);
        }
        let mut sum = 0.0;
        for g in &points {
            sum += g.weight * point_view(self.scene, &g.point, arena)?;
        }
        self.points = points;
        Ok(sum)
    }

    /// Low and high order estimates over a patch: 4 and 7 points for a
    /// triangle, 2×2 and 3×3 for a parallelogram.
    fn view(
        &mut self,
        v: &[Point3<f64>],
        area: f64,
        level: usize,
        arena: &mut PolygonArena,
        counters: &mut Counters,
    ) -> Result<f64> {
        let (low_count, high_count) = if v.len() == 3 { (4, 7) } else { (4, 9) };

        let (low, high) = if level >= self.min_recursion {
            (
                self.sum(2, v, area, arena)?,
                self.sum(3, v, area, arena)?,
            )
        } else {
            (-self.eps_af, self.eps_af)
        };

        let mut converged = (high - low).abs() < self.eps_af;
        let level = level + 1;
        if !converged && level > self.max_recursion {
            self.failed = true;
            converged = true;
        }
        if level > self.min_recursion {
            counters.wasted_points += low_count;
            if converged {
                counters.used_points += high_count;
            } else {
                counters.wasted_points += high_count;
            }
        }
        if converged {
            return Ok(high);
        }

        let mut total = 0.0;
        for sub in split(v) {
            total += self.view(&sub, 0.25 * area, level, arena, counters)?;
        }
        Ok(total)
    }
}

/// Quarters a triangle or parallelogram through its edge midpoints.
fn split(v: &[Point3<f64>]) -> Vec<Vec<Point3<f64>>> {
    let mid = |a: &Point3<f64>, b: &Point3<f64>| nalgebra::center(a, b);
    if v.len() == 3 {
        let (m01, m12, m20) = (mid(&v[0], &v[1]), mid(&v[1], &v[2]), mid(&v[2], &v[0]));
        vec![
            vec![v[0], m01, m20],
            vec![m01, v[1], m12],
            vec![m20, m12, v[2]],
            vec![m12, m20, m01],
        ]
    } else {
        let (m01, m12, m23, m30) = (
            mid(&v[0], &v[1]),
            mid(&v[1], &v[2]),
            mid(&v[2], &v[3]),
            mid(&v[3], &v[0]),
        );
        let c = mid(&v[0], &v[2]);
        vec![
            vec![v[0], m01, c, m30],
            vec![m01, v[1], m12, c],
            vec![c, m12, v[2], m23],
            vec![m30, c, m23, v[3]],
        ]
    }
}

/// Area-weighted factor between clipped surfaces N and M with obstructions.
/// `min_area` is the smaller unclipped area, which sets the tolerance.
#[allow(clippy::too_many_arguments)]
pub fn obstructed_factor(
    surfaces: &[Surface],
    n: usize,
    srf_n: &Facet,
    m: usize,
    srf_m: &Facet,
    candidates: &[Candidate],
    min_area: f64,
    params: &Params,
    arena: &mut PolygonArena,
    counters: &mut Counters,
) -> Result<ObstructedView> {
    let direction = projection_direction(surfaces, srf_n, srf_m, candidates, params.prj_reverse);
    let (s1, srf1, s2, srf2) = match direction {
        Direction::NtoM => (n, srf_n, m, srf_m),
        Direction::MtoN => (m, srf_m, n, srf_n),
    };

    let frame = Frame::new(srf2);
    let source = Facet::new(frame.points(&srf1.vertices)).ok_or(ViewError::ZeroArea(s1 + 1))?;
    let target3: Vec<Point3<f64>> = frame.points(&srf2.vertices);
    let mut target: Vec<Coord<f64>> = target3.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    target.reverse();

    let (mut xmin, mut xmax, mut ymin, mut ymax) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for c in &target {
        xmin = xmin.min(c.x);
        xmax = xmax.max(c.x);
        ymin = ymin.min(c.y);
        ymax = ymax.max(c.y);
    }
    let margin = 0.01;

    let mut scene = ShadowScene {
        normal: source.dc.normal,
        target,
        target_masks: Vec::new(),
        source_masks: Vec::new(),
        shades: Vec::new(),
        window: [xmin - margin, xmax + margin, ymin - margin, ymax + margin],
    };

    for c in candidates {
        let surface = &surfaces[c.index];
        let vertices = frame.points(&surface.facet.vertices);
        if surface.role.is_mask() {
            if surface.base == Some(s2) {
                let mut mask: Vec<Coord<f64>> =
                    vertices.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
                if polygon::clockwise_area(&mask) < 0.0 {
                    mask.reverse();
                }
                scene.target_masks.push(mask);
            } else if surface.base == Some(s1) {
                if let Some(mask) = Facet::new(vertices) {
                    scene.source_masks.push(mask);
                }
            }
            continue;
        }

        let facing = match direction {
            Direction::NtoM => c.m_side.faces(),
            Direction::MtoN => c.n_side.faces(),
        };
        if !facing {
            continue;
        }
        let above = clip_polygon(&vertices, |p| p.z);
        let in_front = clip_polygon(&above, |p| source.dc.distance(p));
        if Facet::new(in_front.clone()).is_some() {
            scene.shades.push(Shade {
                vertices: in_front,
                trns: surface.trns,
            });
        }
    }

    // surface 2 has unit radius in the projection frame
    arena.set_tolerances(1.0e-9, config::EPS2);
    let scale2 = srf2.rc * srf2.rc;
    let mut integrator = Integrator {
        scene: &scene,
        eps_af: min_area * params.eps_adap / scale2,
        max_recursion: params.max_recursion,
        min_recursion: params.min_recursion,
        failed: false,
        points: Vec::with_capacity(9),
    };

    let mut calc = 0.0;
    for patch in patches(&source) {
        calc += integrator.view(&patch.vertices, patch.area, 0, arena, counters)?;
    }

    Ok(ObstructedView {
        af: calc * scale2,
        converged: !integrator.failed,
        source: s1,
        obstructions: scene.shades.len(),
    })
}
