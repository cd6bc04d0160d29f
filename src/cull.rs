//! Rejection tests that narrow the obstructions of a surface pair.
//!
//! The tests run from cheapest to most expensive:
//! - [`possible_obstructions`]: once per geometry, surfaces whose plane separates others
//! - [`facing_row`]: once per row, drops obstructions entirely behind surface N
//! - [`Culler::cull`]: per pair, the cone/radius test, the bounding box test
//!   with its total-block check, and the orientation test
//!
//! Self-obstruction clipping happens before culling: each surface of a pair is
//! clipped to the half-space in front of the other, see [`self_obstruction`].

use nalgebra::Point3;

use crate::config;
use crate::error::{Result, ViewError};
use crate::geom::{clip_polygon, Facet, Role, Surface};

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(index: usize, pts: &[[f64; 3]], role: Role) -> Surface {
        let vertices = pts.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect();
        Surface::new(index, format!("s{}", index + 1), vertices, role).unwrap()
    }

    fn floor(z: f64) -> [[f64; 3]; 4] {
        [[0.0, 0.0, z], [1.0, 0.0, z], [1.0, 1.0, z], [0.0, 1.0, z]]
    }

    fn ceiling(z: f64) -> [[f64; 3]; 4] {
        [[0.0, 0.0, z], [0.0, 1.0, z], [1.0, 1.0, z], [1.0, 0.0, z]]
    }

    fn sandwich(plate: [[f64; 3]; 4]) -> Vec<Surface> {
        vec![
            surface(0, &floor(0.0), Role::Rad),
            surface(1, &ceiling(1.0), Role::Rad),
            surface(2, &plate, Role::Obso),
        ]
    }

    #[test]
    fn plate_between_squares_is_possible() {
        let surfaces = sandwich(floor(0.5));
        assert_eq!(possible_obstructions(&surfaces), vec![2]);
    }

    #[test]
    fn convex_box_has_no_obstructions() {
        let surfaces = vec![
            surface(0, &floor(0.0), Role::Rad),
            surface(1, &ceiling(1.0), Role::Rad),
            surface(
                2,
                &[[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 0.0, 0.0]],
                Role::Rad,
            ),
        ];
        assert!(possible_obstructions(&surfaces).is_empty());
    }

    #[test]
    fn equal_plate_blocks_completely() {
        let surfaces = sandwich(floor(0.5));
        let possible = possible_obstructions(&surfaces);
        let row = facing_row(&surfaces, 1, &possible);
        let culler = Culler::new(&surfaces);
        let (n, m) = (&surfaces[1].facet, &surfaces[0].facet);
        let dist = (n.centroid - m.centroid).norm();
        assert_eq!(culler.cull(&row, 1, 0, n, m, dist), Culled::Blocked(2));
    }

    #[test]
    fn small_plate_is_probable() {
        let plate = [[0.4, 0.4, 0.5], [0.6, 0.4, 0.5], [0.6, 0.6, 0.5], [0.4, 0.6, 0.5]];
        let surfaces = sandwich(plate);
        let possible = possible_obstructions(&surfaces);
        let row = facing_row(&surfaces, 1, &possible);
        let culler = Culler::new(&surfaces);
        let (n, m) = (&surfaces[1].facet, &surfaces[0].facet);
        let dist = (n.centroid - m.centroid).norm();
        match culler.cull(&row, 1, 0, n, m, dist) {
            Culled::Candidates(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].index, 2);
                assert_eq!(list[0].n_side, Side::Front);
                assert_eq!(list[0].m_side, Side::Behind);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn distant_plate_fails_cone_test() {
        let plate = [[5.0, 5.0, 0.5], [6.0, 5.0, 0.5], [6.0, 6.0, 0.5], [5.0, 6.0, 0.5]];
        let surfaces = sandwich(plate);
        let culler = Culler::new(&surfaces);
        let (n, m) = (&surfaces[1].facet, &surfaces[0].facet);
        let dist = (n.centroid - m.centroid).norm();
        assert_eq!(
            culler.cull(&[2], 1, 0, n, m, dist),
            Culled::Candidates(Vec::new())
        );
    }

    #[test]
    fn perpendicular_squares_clip_each_other() {
        let a = surface(0, &floor(0.0), Role::Rad);
        let b = surface(
            1,
            &[[0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [0.5, 0.5, 0.5], [0.5, -0.5, 0.5]],
            Role::Rad,
        );
        // b pierces a along x = 0.5
        assert_eq!(
            self_obstruction(0, &a.facet, 1, &b.facet),
            Err(ViewError::SurfacesIntersect(1, 2))
        );

        let c = surface(
            2,
            &[[0.5, 2.0, -0.5], [0.5, 3.0, -0.5], [0.5, 3.0, 0.5], [0.5, 2.0, 0.5]],
            Role::Rad,
        );
        let (fa, fc) = self_obstruction(0, &a.facet, 2, &c.facet).unwrap().unwrap();
        assert!((fc.area - 0.5).abs() < 1e-12);
        assert!(fc.vertices.iter().all(|v| v.z >= -1e-12));
        assert!((fa.area - 0.5).abs() < 1e-12);
    }

    #[test]
    fn back_to_back_cannot_see() {
        let a = surface(0, &floor(0.0), Role::Rad);
        let b = surface(1, &ceiling(-1.0), Role::Rad);
        assert_eq!(self_obstruction(0, &a.facet, 1, &b.facet), Ok(None));
    }

    #[test]
    fn hull_distance_between_spheres() {
        let d = hull_distance(
            &Point3::new(0.0, 3.0, 0.0),
            &Point3::new(-2.0, 0.0, 0.0),
            1.0,
            &Point3::new(2.0, 0.0, 0.0),
            1.0,
        );
        assert!((d - 2.0).abs() < 1e-9);
    }
}

/// Position of a surface relative to the plane of an obstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Behind,
    Straddles,
    Front,
}

impl Side {
    fn of(facet: &Facet, plane_of: &Facet, eps: f64) -> Side {
        match plane_of.relation(&facet.vertices, eps) {
            (f, 0) if f > 0 => Side::Front,
            (0, b) if b > 0 => Side::Behind,
            _ => Side::Straddles,
        }
    }

    fn sign(&self) -> i32 {
        match self {
            Side::Behind => -1,
            Side::Straddles => 0,
            Side::Front => 1,
        }
    }

    /// True unless the surface lies wholly behind the plane.
    pub fn faces(&self) -> bool {
        *self != Side::Behind
    }
}

/// A probable obstruction with the sides of N and M relative to its plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub index: usize,
    pub n_side: Side,
    pub m_side: Side,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Culled {
    /// A single opaque surface covers every sight line between N and M.
    Blocked(usize),
    Candidates(Vec<Candidate>),
}

fn takes_part_in_obstruction(surface: &Surface) -> bool {
    matches!(surface.role, Role::Rad | Role::Obso)
}

/// Surfaces whose plane has other surfaces on both sides. Others can never
/// come between two surfaces. Largest first.
pub fn possible_obstructions(surfaces: &[Surface]) -> Vec<usize> {
    let mut possible: Vec<usize> = surfaces
        .iter()
        .enumerate()
        .filter(|(_, s)| takes_part_in_obstruction(s))
        .filter(|(j, s)| {
            let eps = config::PLANE_TOLERANCE * s.facet.rc;
            let mut front = false;
            let mut behind = false;
            for (k, other) in surfaces.iter().enumerate() {
                if k == *j || !takes_part_in_obstruction(other) {
                    continue;
                }
                let (f, b) = s.facet.relation(&other.facet.vertices, eps);
                front |= f > 0;
                behind |= b > 0;
                if front && behind {
                    return true;
                }
            }
            false
        })
        .map(|(j, _)| j)
        .collect();
    possible.sort_by(|&a, &b| surfaces[b].area().total_cmp(&surfaces[a].area()));
    possible
}

/// Drops obstructions entirely behind (or in the plane of) surface `n`.
pub fn facing_row(surfaces: &[Surface], n: usize, possible: &[usize]) -> Vec<usize> {
    let facet = &surfaces[n].facet;
    let eps = config::PLANE_TOLERANCE * facet.rc;
    possible
        .iter()
        .copied()
        .filter(|&k| k != n && facet.relation(&surfaces[k].facet.vertices, eps).0 > 0)
        .collect()
}

/// Parts of N and M that can see each other, each clipped to the half-space
/// in front of the other. `None` when either lies wholly behind the other.
pub fn self_obstruction(
    n: usize,
    srf_n: &Facet,
    m: usize,
    srf_m: &Facet,
) -> Result<Option<(Facet, Facet)>> {
    let eps_m = config::PLANE_TOLERANCE * srf_m.rc;
    let eps_n = config::PLANE_TOLERANCE * srf_n.rc;
    let (m_front, m_behind) = srf_n.relation(&srf_m.vertices, eps_m);
    if m_front == 0 {
        return Ok(None);
    }
    let (n_front, n_behind) = srf_m.relation(&srf_n.vertices, eps_n);
    if n_front == 0 {
        return Ok(None);
    }

    if m_behind > 0 && n_behind > 0 && surfaces_intersect(srf_n, srf_m) {
        return Err(ViewError::SurfacesIntersect(n + 1, m + 1));
    }

    let clipped_m = if m_behind > 0 {
        match clip_in_front(srf_m, srf_n, eps_m) {
            Some(f) => f,
            None => return Ok(None),
        }
    } else {
        srf_m.clone()
    };
    let clipped_n = if n_behind > 0 {
        match clip_in_front(srf_n, srf_m, eps_n) {
            Some(f) => f,
            None => return Ok(None),
        }
    } else {
        srf_n.clone()
    };
    Ok(Some((clipped_n, clipped_m)))
}

/// Part of `facet` in front of the plane of `other`.
fn clip_in_front(facet: &Facet, other: &Facet, eps: f64) -> Option<Facet> {
    let clipped = clip_polygon(&facet.vertices, |p| {
        let d = other.dc.distance(p);
        if d.abs() < eps {
            0.0
        } else {
            d
        }
    });
    Facet::new(clipped)
}

/// Points where the edges of `facet` cross the plane of `other`.
fn plane_crossings(facet: &Facet, other: &Facet) -> Vec<Point3<f64>> {
    let v = &facet.vertices;
    let n = v.len();
    let d: Vec<f64> = v.iter().map(|p| other.dc.distance(p)).collect();
    let mut out = Vec::with_capacity(2);
    for j in 0..n {
        let i = (j + n - 1) % n;
        if (d[i] < 0.0 && d[j] > 0.0) || (d[i] > 0.0 && d[j] < 0.0) {
            out.push(v[i] + (v[j] - v[i]) * (d[i] / (d[i] - d[j])));
        } else if d[j] == 0.0 {
            out.push(v[j]);
        }
    }
    out
}

/// True if each surface straddles the other's plane along a common segment.
fn surfaces_intersect(a: &Facet, b: &Facet) -> bool {
    let dir = a.dc.normal.cross(&b.dc.normal);
    if dir.norm() < config::EPS {
        return false;
    }
    let interval = |pts: Vec<Point3<f64>>| {
        pts.iter()
            .map(|p| p.coords.dot(&dir))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
                (lo.min(t), hi.max(t))
            })
    };
    let (a0, a1) = interval(plane_crossings(a, b));
    let (b0, b1) = interval(plane_crossings(b, a));
    let overlap = a1.min(b1) - a0.max(b0);
    overlap > config::PLANE_TOLERANCE * (a.rc + b.rc) * dir.norm()
}

/// Distance from `p` to the convex hull of two spheres. Negative inside.
fn hull_distance(p: &Point3<f64>, c1: &Point3<f64>, r1: f64, c2: &Point3<f64>, r2: f64) -> f64 {
    // convex in t, so a ternary search finds the minimum
    let f = |t: f64| (p - (c1 + (c2 - c1) * t)).norm() - (r1 + (r2 - r1) * t);
    let (mut lo, mut hi) = (0.0, 1.0);
    for _ in 0..60 {
        let t1 = lo + (hi - lo) / 3.0;
        let t2 = hi - (hi - lo) / 3.0;
        if f(t1) <= f(t2) {
            hi = t2;
        } else {
            lo = t1;
        }
    }
    f(0.5 * (lo + hi))
}

/// Per-pair culling against a shared set of surfaces.
pub struct Culler<'a> {
    surfaces: &'a [Surface],
    masks: Vec<usize>,
}

impl<'a> Culler<'a> {
    pub fn new(surfaces: &'a [Surface]) -> Self {
        let masks = surfaces
            .iter()
            .enumerate()
            .filter(|(_, s)| s.role.is_mask())
            .map(|(i, _)| i)
            .collect();
        Self { surfaces, masks }
    }

    /// Probable obstructions between N and M, given the clipped surfaces
    /// and the row's facing obstructions. N and M never appear in the list.
    pub fn cull(
        &self,
        row: &[usize],
        n: usize,
        m: usize,
        srf_n: &Facet,
        srf_m: &Facet,
        dist: f64,
    ) -> Culled {
        let eps_m = config::PLANE_TOLERANCE * srf_m.rc;
        let mut list: Vec<usize> = row
            .iter()
            .copied()
            .filter(|&k| k != n && k != m)
            .filter(|&k| srf_m.relation(&self.surfaces[k].facet.vertices, eps_m).0 > 0)
            .collect();

        if !list.is_empty() {
            list = self.cone_radius_test(list, srf_n, srf_m, dist);
        }
        if !list.is_empty() {
            match self.box_test(list, srf_n, srf_m) {
                Ok(kept) => list = kept,
                Err(blocker) => return Culled::Blocked(blocker),
            }
        }
        let mut candidates = if list.is_empty() {
            Vec::new()
        } else {
            self.orientation_test(&list, srf_n, srf_m)
        };
        self.add_masks(&mut candidates, n, m, srf_n, srf_m);
        Culled::Candidates(candidates)
    }

    /// Keeps obstructions whose bounding sphere reaches the hull of the
    /// bounding spheres of N and M.
    fn cone_radius_test(
        &self,
        list: Vec<usize>,
        srf_n: &Facet,
        srf_m: &Facet,
        dist: f64,
    ) -> Vec<usize> {
        let slack = config::EPS * dist;
        list.into_iter()
            .filter(|&k| {
                let k = &self.surfaces[k].facet;
                let d = hull_distance(&k.centroid, &srf_n.centroid, srf_n.rc, &srf_m.centroid, srf_m.rc);
                d < k.rc + slack
            })
            .collect()
    }

    /// Keeps obstructions overlapping the bounding box of N and M.
    /// `Err` names an opaque surface that blocks every sight line.
    fn box_test(
        &self,
        list: Vec<usize>,
        srf_n: &Facet,
        srf_m: &Facet,
    ) -> std::result::Result<Vec<usize>, usize> {
        let (lo, hi) = bounds(srf_n.vertices.iter().chain(srf_m.vertices.iter()));
        let eps = config::PLANE_TOLERANCE * (srf_n.rc + srf_m.rc);
        let mut kept = Vec::with_capacity(list.len());
        for k in list {
            let surface = &self.surfaces[k];
            let (klo, khi) = bounds(surface.facet.vertices.iter());
            let apart = (0..3).any(|i| klo[i] > hi[i] - eps || khi[i] < lo[i] + eps);
            if apart {
                continue;
            }
            if surface.trns == 0.0 && blocks(&surface.facet, srf_n, srf_m) {
                return Err(k);
            }
            kept.push(k);
        }
        Ok(kept)
    }

    /// Tags each obstruction with the sides of N and M; drops those with
    /// N and M on the same side.
    fn orientation_test(&self, list: &[usize], srf_n: &Facet, srf_m: &Facet) -> Vec<Candidate> {
        list.iter()
            .filter_map(|&k| {
                let facet = &self.surfaces[k].facet;
                let eps = config::PLANE_TOLERANCE * facet.rc;
                let n_side = Side::of(srf_n, facet, eps);
                let m_side = Side::of(srf_m, facet, eps);
                (n_side.sign() * m_side.sign() <= 0).then_some(Candidate {
                    index: k,
                    n_side,
                    m_side,
                })
            })
            .collect()
    }

    /// Masks and nulls on N or M shadow the pair.
    fn add_masks(
        &self,
        candidates: &mut Vec<Candidate>,
        n: usize,
        m: usize,
        srf_n: &Facet,
        srf_m: &Facet,
    ) {
        for &k in &self.masks {
            let base = self.surfaces[k].base;
            if base == Some(n) || base == Some(m) {
                let facet = &self.surfaces[k].facet;
                let eps = config::PLANE_TOLERANCE * facet.rc;
                candidates.push(Candidate {
                    index: k,
                    n_side: Side::of(srf_n, facet, eps),
                    m_side: Side::of(srf_m, facet, eps),
                });
            }
        }
    }
}

fn bounds<'b>(points: impl Iterator<Item = &'b Point3<f64>>) -> ([f64; 3], [f64; 3]) {
    points.fold(
        ([f64::INFINITY; 3], [f64::NEG_INFINITY; 3]),
        |(mut lo, mut hi), p| {
            for i in 0..3 {
                lo[i] = lo[i].min(p[i]);
                hi[i] = hi[i].max(p[i]);
            }
            (lo, hi)
        },
    )
}

/// True if `k` separates N from M and every segment joining a vertex of N
/// to a vertex of M crosses `k` inside its boundary. By convexity every
/// sight line then crosses it.
fn blocks(k: &Facet, srf_n: &Facet, srf_m: &Facet) -> bool {
    let eps = config::PLANE_TOLERANCE * k.rc;
    let dn: Vec<f64> = srf_n.vertices.iter().map(|p| k.dc.distance(p)).collect();
    let dm: Vec<f64> = srf_m.vertices.iter().map(|p| k.dc.distance(p)).collect();
    let n_front = dn.iter().all(|&d| d > eps);
    let n_behind = dn.iter().all(|&d| d < -eps);
    let m_front = dm.iter().all(|&d| d > eps);
    let m_behind = dm.iter().all(|&d| d < -eps);
    if !((n_front && m_behind) || (n_behind && m_front)) {
        return false;
    }
    let tol = config::EPS * k.rc;
    srf_n.vertices.iter().zip(&dn).all(|(a, &da)| {
        srf_m.vertices.iter().zip(&dm).all(|(b, &db)| {
            let crossing = a + (b - a) * (da / (da - db));
            k.contains(&crossing, tol)
        })
    })
}
