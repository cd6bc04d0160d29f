//! Fills the view factor matrix pair by pair and post-processes it.
//!
//! Rows are distributed over rayon workers. Each worker owns its polygon
//! arena and counters, so pairs share only the read-only scene. Errors in
//! geometry abort the run; pairs that fail to converge keep their best
//! estimate and are listed in the result.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config;
use crate::cull::{self, Culled, Culler};
use crate::error::{Result, ViewError};
use crate::geom::Surface;
use crate::matrix::ViewFactorMatrix;
use crate::obstructed::{self, Params};
use crate::polygon::PolygonArena;
use crate::postprocess;
use crate::result::{Factors, ViewFactorResult};
use crate::scene::{Geometry, Scene};
use crate::settings::Settings;
use crate::stats::{Counters, PairKind, PairOutcome};
use crate::unobstructed::{self, Method, MethodThresholds};
use crate::view2d::Engine2D;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic;
    use crate::geom::Role;
    use crate::scene::SurfaceRecord;
    use approx::assert_relative_eq;

    fn square(z: f64, up: bool) -> SurfaceRecord {
        let mut vertices = vec![
            vec![0.0, 0.0, z],
            vec![1.0, 0.0, z],
            vec![1.0, 1.0, z],
            vec![0.0, 1.0, z],
        ];
        if !up {
            vertices.reverse();
        }
        SurfaceRecord {
            name: None,
            vertices,
            role: Role::Rad,
            base: None,
            cmbn: None,
            emit: None,
            trns: None,
        }
    }

    fn two_squares() -> Scene {
        Scene::from_records("plates", 3, false, vec![square(0.0, true), square(1.0, false)]).unwrap()
    }

    #[test]
    fn facing_squares() {
        let result = compute(&two_squares(), &Settings::default()).unwrap();
        assert_relative_eq!(
            result.factor(0, 1),
            analytic::parallel_rectangles(1.0, 1.0, 1.0),
            epsilon = 1e-4
        );
        assert_eq!(result.factor(0, 0), 0.0);
        assert_eq!(result.counters.pairs_unobstructed, 1);
        assert!(result.converged());
    }

    #[test]
    fn every_method_agrees() {
        let exact = analytic::parallel_rectangles(1.0, 1.0, 1.0);
        for method in Method::ALL {
            let settings = Settings {
                method_override: Some(method),
                ..Settings::default()
            };
            let result = compute(&two_squares(), &settings).unwrap();
            assert_relative_eq!(result.factor(0, 1), exact, epsilon = 1e-3);
        }
    }

    #[test]
    fn back_to_back_squares_are_hidden() {
        let scene =
            Scene::from_records("b", 3, false, vec![square(0.0, false), square(1.0, true)]).unwrap();
        let result = compute(&scene, &Settings::default()).unwrap();
        assert_eq!(result.factor(0, 1), 0.0);
        assert_eq!(result.counters.pairs_zero, 1);
    }

    #[test]
    fn single_row() {
        let settings = Settings {
            row: 2,
            ..Settings::default()
        };
        let result = compute(&two_squares(), &settings).unwrap();
        assert!(result.matrix().is_none());
        assert!(result.post.is_none());
        assert_relative_eq!(
            result.factor(1, 0),
            analytic::parallel_rectangles(1.0, 1.0, 1.0),
            epsilon = 1e-4
        );
    }

    #[test]
    fn row_out_of_range() {
        let settings = Settings {
            row: 3,
            ..Settings::default()
        };
        assert!(matches!(
            compute(&two_squares(), &settings),
            Err(ViewError::InvalidInput(_))
        ));
    }

    #[test]
    fn mask_sees_its_base() {
        let mut mask = square(0.0, true);
        mask.vertices = vec![
            vec![0.25, 0.25, 0.0],
            vec![0.75, 0.25, 0.0],
            vec![0.75, 0.75, 0.0],
            vec![0.25, 0.75, 0.0],
        ];
        mask.role = Role::Mask;
        mask.base = Some(1);
        let scene =
            Scene::from_records("m", 3, false, vec![square(0.0, true), square(1.0, false), mask]).unwrap();
        let settings = Settings {
            threads: 1,
            ..Settings::default()
        };
        let result = compute(&scene, &settings).unwrap();
        let af = result.matrix().unwrap();
        assert_relative_eq!(af.get(2, 0), 0.25);
        assert_eq!(af.get(2, 1), 0.0);
        // the masked part of the floor no longer sees the ceiling
        assert!(af.get(1, 0) < analytic::parallel_rectangles(1.0, 1.0, 1.0));
    }

    #[test]
    fn null_row_sees_its_base() {
        let mut hole = square(0.0, true);
        hole.vertices = vec![
            vec![0.25, 0.25, 0.0],
            vec![0.75, 0.25, 0.0],
            vec![0.75, 0.75, 0.0],
            vec![0.25, 0.75, 0.0],
        ];
        hole.role = Role::Null;
        hole.base = Some(1);
        let scene =
            Scene::from_records("n", 3, false, vec![square(0.0, true), square(1.0, false), hole]).unwrap();
        let settings = Settings {
            row: 3,
            threads: 1,
            ..Settings::default()
        };
        let result = compute(&scene, &settings).unwrap();
        assert!(result.post.is_none());
        assert_relative_eq!(result.factor(2, 0), 1.0);
        assert_eq!(result.factor(2, 1), 0.0);
    }
}

/// Computes every factor of `scene` and post-processes the matrix.
pub fn compute(scene: &Scene, settings: &Settings) -> Result<ViewFactorResult> {
    if settings.threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .build()
            .map_err(|e| ViewError::InvalidInput(format!("thread pool: {}", e)))?;
        pool.install(|| Assembler::new(scene, settings).run())
    } else {
        Assembler::new(scene, settings).run()
    }
}

/// Pair evaluation for either dimension.
enum Engine<'a> {
    ThreeD(Engine3D<'a>),
    TwoD(Engine2D<'a>),
}

impl Engine<'_> {
    fn pair(
        &self,
        n: usize,
        m: usize,
        row: &[usize],
        arena: &mut PolygonArena,
        counters: &mut Counters,
    ) -> Result<PairOutcome> {
        match self {
            Engine::ThreeD(e) => e.pair(n, m, row, arena, counters),
            Engine::TwoD(e) => e.pair(n, m, counters),
        }
    }

    /// Obstructions that may matter for pairs in row `n`.
    fn row(&self, n: usize) -> Vec<usize> {
        match self {
            Engine::ThreeD(e) => cull::facing_row(e.surfaces, n, &e.possible),
            Engine::TwoD(_) => Vec::new(),
        }
    }
}

struct Engine3D<'a> {
    surfaces: &'a [Surface],
    possible: Vec<usize>,
    culler: Culler<'a>,
    params: Params,
    thresholds: MethodThresholds,
    method_override: Option<Method>,
    max_recurs_ali: usize,
}

impl<'a> Engine3D<'a> {
    fn new(surfaces: &'a [Surface], settings: &Settings) -> Self {
        Self {
            surfaces,
            possible: cull::possible_obstructions(surfaces),
            culler: Culler::new(surfaces),
            params: settings.params(),
            thresholds: MethodThresholds::for_tolerance(settings.eps_adap),
            method_override: settings.method_override,
            max_recurs_ali: settings.max_recurs_ali,
        }
    }

    fn pair(
        &self,
        n: usize,
        m: usize,
        row: &[usize],
        arena: &mut PolygonArena,
        counters: &mut Counters,
    ) -> Result<PairOutcome> {
        let (sn, sm) = (&self.surfaces[n], &self.surfaces[m]);
        if sn.role.is_mask() || sm.role.is_mask() {
            let af = if sn.role.is_mask() && sn.base == Some(m) {
                sn.area()
            } else if sm.role.is_mask() && sm.base == Some(n) {
                sm.area()
            } else {
                0.0
            };
            return Ok(PairOutcome {
                af,
                kind: PairKind::Fixed,
                converged: true,
            });
        }

        let Some((srf_n, srf_m)) = cull::self_obstruction(n, &sn.facet, m, &sm.facet)? else {
            return Ok(PairOutcome::zero(PairKind::Hidden));
        };
        let dist = (srf_n.centroid - srf_m.centroid).norm();
        if dist < config::COINCIDENT_CENTROIDS * (srf_n.rc + srf_m.rc) {
            return Err(ViewError::CoincidentCentroids(n + 1, m + 1));
        }

        // a sliver left by clipping cannot be shadowed meaningfully
        let extreme = srf_n.area < config::EXTREME_CLIP * sn.area() || srf_m.area < config::EXTREME_CLIP * sm.area();
        let candidates = if extreme {
            Vec::new()
        } else {
            match self.culler.cull(row, n, m, &srf_n, &srf_m, dist) {
                Culled::Blocked(j) => return Ok(PairOutcome::zero(PairKind::Blocked(j))),
                Culled::Candidates(c) => c,
            }
        };

        let outcome = if candidates.is_empty() {
            let (srf1, srf2) = if srf_n.rc <= srf_m.rc {
                (&srf_n, &srf_m)
            } else {
                (&srf_m, &srf_n)
            };
            let method = self.method_override.unwrap_or_else(|| {
                unobstructed::select_method(srf1, srf2, dist, self.params.eps_adap, &self.thresholds).method
            });
            let eps_af = self.params.eps_adap * srf1.area.min(srf2.area);
            let view = unobstructed::view_unobstructed(srf1, srf2, method, eps_af, self.max_recurs_ali, counters);
            PairOutcome {
                af: view.af,
                kind: PairKind::Unobstructed {
                    method: view.method,
                    n_edge_div: view.n_edge_div,
                },
                converged: view.converged,
            }
        } else {
            let min_area = sn.area().min(sm.area());
            let view = obstructed::obstructed_factor(
                self.surfaces,
                n,
                &srf_n,
                m,
                &srf_m,
                &candidates,
                min_area,
                &self.params,
                arena,
                counters,
            )?;
            PairOutcome {
                af: view.af,
                kind: PairKind::Obstructed {
                    source: view.source,
                    obstructions: view.obstructions,
                },
                converged: view.converged,
            }
        };
        Ok(outcome)
    }
}

/// One computed row: `(column, outcome)` for each pair.
struct RowWork {
    n: usize,
    pairs: Vec<(usize, PairOutcome)>,
    counters: Counters,
}

struct Assembler<'a> {
    scene: &'a Scene,
    settings: &'a Settings,
    engine: Engine<'a>,
    areas: Vec<f64>,
}

impl<'a> Assembler<'a> {
    fn new(scene: &'a Scene, settings: &'a Settings) -> Self {
        let (engine, areas) = match &scene.geometry {
            Geometry::ThreeD(surfaces) => (
                Engine::ThreeD(Engine3D::new(surfaces, settings)),
                surfaces.iter().map(|s| s.area()).collect(),
            ),
            Geometry::TwoD(surfaces) => (
                Engine::TwoD(Engine2D::new(surfaces, settings.params_2d())),
                surfaces.iter().map(|s| s.area()).collect(),
            ),
        };
        Self {
            scene,
            settings,
            engine,
            areas,
        }
    }

    /// Internal index of a 1-based input number, if it is a matrix row.
    fn index_of(&self, number: usize) -> Result<usize> {
        self.scene.numbers[..self.scene.n_rad]
            .iter()
            .position(|&k| k == number)
            .ok_or_else(|| ViewError::InvalidInput(format!("surface {} is not a radiating surface", number)))
    }

    fn run(&self) -> Result<ViewFactorResult> {
        let start = Instant::now();
        let n_rad = self.scene.n_rad;
        let verbosity = self.settings.verbosity;

        // (row, columns) to compute
        let (rows, restricted): (Vec<(usize, Vec<usize>)>, bool) = if self.settings.row > 0 {
            let n = self.index_of(self.settings.row)?;
            let cols = if self.settings.col > 0 {
                vec![self.index_of(self.settings.col)?]
            } else {
                (0..n_rad).filter(|&m| m != n).collect()
            };
            (vec![(n, cols)], true)
        } else {
            ((1..n_rad).map(|n| (n, (0..n).collect())).collect(), false)
        };

        if verbosity > 0 {
            println!("Computing view factors for {} surfaces...", n_rad);
        }
        let pb = if verbosity > 0 {
            ProgressBar::new(rows.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg} ETA: {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▇▆▅▄▃▂▁"),
        );
        pb.set_message("rows".to_string());

        let work: Vec<RowWork> = rows
            .par_iter()
            .map_init(
                || PolygonArena::new(config::EPS, config::EPS2),
                |arena, (n, cols)| -> Result<RowWork> {
                    let row = self.engine.row(*n);
                    let mut counters = Counters::new();
                    let mut pairs = Vec::with_capacity(cols.len());
                    for &m in cols {
                        let mut outcome = self
                            .engine
                            .pair(*n, m, &row, arena, &mut counters)
                            .map_err(|e| self.renumber(e))?;
                        if outcome.af < config::TINY_FACTOR * self.areas[*n].max(self.areas[m]) {
                            outcome.af = 0.0;
                        }
                        counters.record(&outcome);
                        if verbosity > 1 {
                            let line = format!(
                                "{:>5} {:>5}  {:<24} {:.6e}{}",
                                self.scene.numbers[*n],
                                self.scene.numbers[m],
                                outcome.kind.to_string(),
                                outcome.af,
                                if outcome.converged { "" } else { "  not converged" }
                            );
                            if pb.is_hidden() {
                                println!("{}", line);
                            } else {
                                pb.println(line);
                            }
                        }
                        pairs.push((m, outcome));
                    }
                    pb.inc(1);
                    Ok(RowWork {
                        n: *n,
                        pairs,
                        counters,
                    })
                },
            )
            .collect::<Result<Vec<_>>>()?;
        pb.finish_and_clear();

        let mut counters = Counters::new();
        let mut non_converged = Vec::new();
        for w in &work {
            counters += w.counters;
            for (m, outcome) in &w.pairs {
                if !outcome.converged {
                    non_converged.push((self.scene.numbers[w.n], self.scene.numbers[*m]));
                }
            }
        }
        if verbosity > 0 && !non_converged.is_empty() {
            eprintln!(
                "Warning: {} calculations did not converge",
                non_converged.len()
            );
        }

        let mut surfaces = self.scene.infos();
        let enclosure = self.scene.enclosure || self.settings.enclosure;
        let (factors, post) = if restricted {
            let w = &work[0];
            let mut af = vec![0.0; n_rad];
            for (m, outcome) in &w.pairs {
                af[*m] = outcome.af;
            }
            (Factors::Row { row: w.n, af }, None)
        } else {
            let mut af = ViewFactorMatrix::new(n_rad);
            for w in &work {
                for (m, outcome) in &w.pairs {
                    af.set(w.n, *m, outcome.af);
                }
            }
            let max_iterations = match self.scene.geometry {
                Geometry::ThreeD(_) => config::NORM_ITERATIONS_3D,
                Geometry::TwoD(_) => config::NORM_ITERATIONS_2D,
            };
            let report = postprocess::post_process(
                &mut af,
                &mut surfaces,
                enclosure,
                config::NORM_TOLERANCE,
                max_iterations,
            );
            (Factors::Matrix(af), Some(report))
        };

        let volume = match &self.scene.geometry {
            Geometry::ThreeD(all) if enclosure => Some(postprocess::enclosure_volume(&all[..n_rad])),
            _ => None,
        };

        Ok(ViewFactorResult {
            title: self.scene.title.clone(),
            dimension: self.scene.dimension(),
            surfaces,
            factors,
            counters,
            post,
            volume,
            non_converged,
            elapsed: start.elapsed(),
        })
    }

    /// Replaces internal surface numbers in `e` by input numbers.
    fn renumber(&self, e: ViewError) -> ViewError {
        let number = |k: usize| self.scene.numbers.get(k.wrapping_sub(1)).copied().unwrap_or(k);
        match e {
            ViewError::CoincidentCentroids(a, b) => ViewError::CoincidentCentroids(number(a), number(b)),
            ViewError::SurfacesIntersect(a, b) => ViewError::SurfacesIntersect(number(a), number(b)),
            ViewError::ZeroArea(a) => ViewError::ZeroArea(number(a)),
            e => e,
        }
    }
}
