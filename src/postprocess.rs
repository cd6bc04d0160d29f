//! Corrections applied once every pair has been computed.
//!
//! The passes run in a fixed order and all mutate the matrix in place:
//! - mask bases are cleared, their factors are already final
//! - nulls are deleted and their area taken from their base
//! - subsurfaces are separated from their base
//! - surfaces flagged `cmbn` are merged into their target
//! - enclosures are normalised so every row of `F` sums to one

use nalgebra::Point3;
use serde::Serialize;

use crate::geom::{Role, Surface};
use crate::matrix::{SurfaceInfo, ViewFactorMatrix};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn info(name: &str, area: f64, role: Role, base: Option<usize>) -> SurfaceInfo {
        SurfaceInfo {
            name: name.to_string(),
            number: 0,
            area,
            emit: 0.9,
            role,
            base,
            cmbn: None,
        }
    }

    /// Unit-area equilateral enclosure: every off-diagonal factor is one half.
    fn triangle() -> (ViewFactorMatrix, Vec<SurfaceInfo>) {
        let mut af = ViewFactorMatrix::new(3);
        for n in 0..3 {
            for m in 0..n {
                af.set(n, m, 0.5);
            }
        }
        let surfaces = (0..3).map(|i| info(&format!("s{}", i), 1.0, Role::Rad, None)).collect();
        (af, surfaces)
    }

    #[test]
    fn exact_enclosure_needs_no_iterations() {
        let (mut af, surfaces) = triangle();
        let areas: Vec<f64> = surfaces.iter().map(|s| s.area).collect();
        let norm = normalise(&mut af, &areas, 1.0e-7, 30);
        assert!(norm.converged);
        assert_eq!(norm.iterations, 0);
        assert!(row_errors(&af, &surfaces).max < 1e-12);
    }

    #[test]
    fn perturbed_enclosure_is_normalised() {
        let (mut af, surfaces) = triangle();
        af.set(1, 0, 0.505);
        let before = row_errors(&af, &surfaces);
        assert_relative_eq!(before.max, 0.005, epsilon = 1e-12);
        let areas: Vec<f64> = surfaces.iter().map(|s| s.area).collect();
        let norm = normalise(&mut af, &areas, 1.0e-7, 100);
        assert!(norm.converged);
        for n in 0..3 {
            assert_relative_eq!(af.row_sum(n), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn nulls_are_removed_from_their_base() {
        let mut af = ViewFactorMatrix::new(3);
        af.set(1, 0, 0.3);
        af.set(2, 1, 0.0);
        let mut surfaces = vec![
            info("floor", 2.0, Role::Rad, None),
            info("ceiling", 2.0, Role::Rad, None),
            info("hole", 0.5, Role::Null, Some(1)),
        ];
        assert_eq!(remove_nulls(&mut af, &mut surfaces), 1);
        assert_eq!(af.len(), 2);
        assert_eq!(surfaces.len(), 2);
        assert_relative_eq!(surfaces[1].area, 1.5);
        assert_relative_eq!(af.get(0, 1), 0.3);
    }

    #[test]
    fn subsurfaces_are_separated() {
        // wall 0 with window 2, facing floor 1
        let mut af = ViewFactorMatrix::new(3);
        af.set(1, 0, 0.4);
        af.set(2, 1, 0.1);
        let mut surfaces = vec![
            info("wall", 4.0, Role::Rad, None),
            info("floor", 4.0, Role::Rad, None),
            info("window", 1.0, Role::Subs, Some(0)),
        ];
        assert_eq!(separate_subsurfaces(&mut af, &mut surfaces), 1);
        assert_relative_eq!(surfaces[0].area, 3.0);
        assert_relative_eq!(af.get(0, 1), 0.3);
        assert_relative_eq!(af.get(2, 1), 0.1);
        assert!(surfaces.iter().all(|s| s.base.is_none()));
    }

    #[test]
    fn combined_surfaces_add_up() {
        let mut af = ViewFactorMatrix::new(3);
        af.set(1, 0, 0.2);
        af.set(2, 0, 0.3);
        af.set(2, 1, 0.1);
        let mut surfaces = vec![
            info("a", 1.0, Role::Rad, None),
            info("b", 1.0, Role::Rad, None),
            info("c", 2.0, Role::Rad, None),
        ];
        surfaces[2].cmbn = Some(1);
        assert_eq!(combine_surfaces(&mut af, &mut surfaces), 1);
        assert_eq!(af.len(), 2);
        assert_relative_eq!(surfaces[1].area, 3.0);
        assert_relative_eq!(af.get(1, 0), 0.5);
        assert_relative_eq!(af.get(1, 1), 0.2);
    }

    #[test]
    fn unit_cube_volume() {
        let faces: [[[f64; 3]; 4]; 6] = [
            [[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]],
            [[0., 0., 1.], [0., 1., 1.], [1., 1., 1.], [1., 0., 1.]],
            [[0., 0., 0.], [0., 1., 0.], [0., 1., 1.], [0., 0., 1.]],
            [[1., 0., 0.], [1., 0., 1.], [1., 1., 1.], [1., 1., 0.]],
            [[0., 0., 0.], [0., 0., 1.], [1., 0., 1.], [1., 0., 0.]],
            [[0., 1., 0.], [1., 1., 0.], [1., 1., 1.], [0., 1., 1.]],
        ];
        let surfaces: Vec<Surface> = faces
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let vertices = f.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect();
                Surface::new(i, format!("f{}", i), vertices, Role::Rad).unwrap()
            })
            .collect();
        assert_relative_eq!(enclosure_volume(&surfaces), 1.0, epsilon = 1e-12);
    }
}

/// Deviation of the row sums of `F` from one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RowErrors {
    pub max: f64,
    pub rms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Normalisation {
    pub iterations: usize,
    pub converged: bool,
}

/// What the post-processing passes did.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PostReport {
    pub nulls_removed: usize,
    pub subsurfaces: usize,
    pub combined: usize,
    pub before: RowErrors,
    pub after: Option<RowErrors>,
    pub normalisation: Option<Normalisation>,
}

/// Deletes surface `k` and renumbers references to later surfaces.
fn remove_surface(af: &mut ViewFactorMatrix, surfaces: &mut Vec<SurfaceInfo>, k: usize) {
    af.remove(k);
    surfaces.remove(k);
    let shift = |r: Option<usize>| match r {
        Some(j) if j == k => None,
        Some(j) if j > k => Some(j - 1),
        r => r,
    };
    for s in surfaces.iter_mut() {
        s.base = shift(s.base);
        s.cmbn = shift(s.cmbn);
    }
}

pub fn clear_mask_bases(surfaces: &mut [SurfaceInfo]) {
    for s in surfaces.iter_mut().filter(|s| s.role == Role::Mask) {
        s.base = None;
    }
}

/// Deletes null surfaces and takes their area from their base.
pub fn remove_nulls(af: &mut ViewFactorMatrix, surfaces: &mut Vec<SurfaceInfo>) -> usize {
    let mut removed = 0;
    for k in (0..surfaces.len()).rev() {
        if surfaces[k].role != Role::Null {
            continue;
        }
        if let Some(b) = surfaces[k].base {
            surfaces[b].area -= surfaces[k].area;
        }
        remove_surface(af, surfaces, k);
        removed += 1;
    }
    removed
}

/// Subtracts each subsurface's factors and area from its base.
pub fn separate_subsurfaces(af: &mut ViewFactorMatrix, surfaces: &mut [SurfaceInfo]) -> usize {
    let mut separated = 0;
    for k in 0..surfaces.len() {
        let Some(b) = surfaces[k].base else {
            continue;
        };
        surfaces[b].area -= surfaces[k].area;
        for m in 0..surfaces.len() {
            if m == k {
                continue;
            }
            let v = af.get(b, m) - af.get(k, m);
            af.set(b, m, v.max(0.0));
        }
        separated += 1;
    }
    for s in surfaces.iter_mut() {
        s.base = None;
    }
    separated
}

/// Merges every surface with a `cmbn` target into that target.
pub fn combine_surfaces(af: &mut ViewFactorMatrix, surfaces: &mut Vec<SurfaceInfo>) -> usize {
    let mut combined = 0;
    for k in (0..surfaces.len()).rev() {
        let Some(t) = surfaces[k].cmbn else {
            continue;
        };
        surfaces[t].area += surfaces[k].area;
        let self_view = af.get(t, t) + af.get(k, k) + 2.0 * af.get(t, k);
        for m in 0..surfaces.len() {
            if m != t && m != k {
                af.add(t, m, af.get(k, m));
            }
        }
        af.set(t, t, self_view);
        remove_surface(af, surfaces, k);
        combined += 1;
    }
    combined
}

pub fn row_errors(af: &ViewFactorMatrix, surfaces: &[SurfaceInfo]) -> RowErrors {
    let errors: Vec<f64> = surfaces
        .iter()
        .enumerate()
        .filter(|(_, s)| s.area > 0.0)
        .map(|(n, s)| af.row_sum(n) / s.area - 1.0)
        .collect();
    if errors.is_empty() {
        return RowErrors::default();
    }
    RowErrors {
        max: errors.iter().fold(0.0, |max: f64, e| max.max(e.abs())),
        rms: (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt(),
    }
}

/// Scales `AF` symmetrically until every row sum equals its area.
///
/// Each pass multiplies `AF[n][m]` by the mean of the corrections of rows
/// `n` and `m`, which keeps reciprocity exact.
pub fn normalise(
    af: &mut ViewFactorMatrix,
    areas: &[f64],
    tolerance: f64,
    max_iterations: usize,
) -> Normalisation {
    for iteration in 0..max_iterations {
        let sums: Vec<f64> = (0..af.len()).map(|n| af.row_sum(n)).collect();
        let error = sums
            .iter()
            .zip(areas)
            .filter(|&(&s, &a)| s > 0.0 && a > 0.0)
            .fold(0.0, |max: f64, (s, a)| max.max((s / a - 1.0).abs()));
        if error < tolerance {
            return Normalisation {
                iterations: iteration,
                converged: true,
            };
        }
        let scale: Vec<f64> = sums
            .iter()
            .zip(areas)
            .map(|(&s, &a)| if s > 0.0 && a > 0.0 { a / s } else { 1.0 })
            .collect();
        af.scale_with(|n, m| 0.5 * (scale[n] + scale[m]));
    }
    Normalisation {
        iterations: max_iterations,
        converged: false,
    }
}

/// Runs every pass in order.
pub fn post_process(
    af: &mut ViewFactorMatrix,
    surfaces: &mut Vec<SurfaceInfo>,
    enclosure: bool,
    tolerance: f64,
    max_iterations: usize,
) -> PostReport {
    clear_mask_bases(surfaces);
    let nulls_removed = remove_nulls(af, surfaces);
    let subsurfaces = separate_subsurfaces(af, surfaces);
    let combined = combine_surfaces(af, surfaces);
    let before = row_errors(af, surfaces);

    let (after, normalisation) = if enclosure {
        let areas: Vec<f64> = surfaces.iter().map(|s| s.area).collect();
        let norm = normalise(af, &areas, tolerance, max_iterations);
        (Some(row_errors(af, surfaces)), Some(norm))
    } else {
        (None, None)
    };

    PostReport {
        nulls_removed,
        subsurfaces,
        combined,
        before,
        after,
        normalisation,
    }
}

/// Volume enclosed by the surfaces, by the divergence theorem. Surfaces
/// face into the enclosure; subsurfaces are skipped.
pub fn enclosure_volume(surfaces: &[Surface]) -> f64 {
    let prism = |a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>| a.coords.dot(&b.coords.cross(&c.coords));
    let sum: f64 = surfaces
        .iter()
        .filter(|s| s.role != Role::Subs)
        .map(|s| {
            let v = &s.facet.vertices;
            (1..v.len() - 1).map(|k| prism(&v[0], &v[k], &v[k + 1])).sum::<f64>()
        })
        .sum();
    -sum / 6.0
}
