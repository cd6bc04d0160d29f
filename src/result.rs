use std::fmt;
use std::time::Duration;

use ndarray::Array2;
use serde::Serialize;

use crate::matrix::{SurfaceInfo, ViewFactorMatrix};
use crate::postprocess::PostReport;
use crate::stats::Counters;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Role;
    use approx::assert_relative_eq;

    fn info(number: usize, area: f64) -> SurfaceInfo {
        SurfaceInfo {
            name: format!("s{}", number),
            number,
            area,
            emit: 0.9,
            role: Role::Rad,
            base: None,
            cmbn: None,
        }
    }

    fn result(factors: Factors) -> ViewFactorResult {
        ViewFactorResult {
            title: String::new(),
            dimension: 3,
            surfaces: vec![info(1, 1.0), info(2, 2.0)],
            factors,
            counters: Counters::new(),
            post: None,
            volume: None,
            non_converged: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn factors_from_matrix() {
        let mut af = ViewFactorMatrix::new(2);
        af.set(1, 0, 0.5);
        let r = result(Factors::Matrix(af));
        assert_relative_eq!(r.factor(0, 1), 0.5);
        assert_relative_eq!(r.factor(1, 0), 0.25);
        assert_eq!(r.row_sums(), vec![0.5, 0.25]);
        assert!(r.view_factors().is_some());
    }

    #[test]
    fn factors_from_single_row() {
        let r = result(Factors::Row {
            row: 1,
            af: vec![0.5, 0.0],
        });
        assert_relative_eq!(r.factor(1, 0), 0.25);
        assert_eq!(r.factor(0, 1), 0.0);
        assert!(r.view_factors().is_none());
    }
}

/// Computed factors: the whole triangle, or one row when restricted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Factors {
    Matrix(ViewFactorMatrix),
    /// Area-weighted factors from surface `row` to every surface.
    Row { row: usize, af: Vec<f64> },
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewFactorResult {
    pub title: String,
    pub dimension: usize,
    /// Rows of the matrix after post-processing.
    pub surfaces: Vec<SurfaceInfo>,
    pub factors: Factors,
    pub counters: Counters,
    pub post: Option<PostReport>,
    /// Enclosed volume of a 3-D enclosure.
    pub volume: Option<f64>,
    /// Input numbers of the pairs that did not converge.
    pub non_converged: Vec<(usize, usize)>,
    pub elapsed: Duration,
}

impl ViewFactorResult {
    pub fn matrix(&self) -> Option<&ViewFactorMatrix> {
        match &self.factors {
            Factors::Matrix(af) => Some(af),
            Factors::Row { .. } => None,
        }
    }

    /// View factor `F[n][m]` between matrix rows `n` and `m`.
    pub fn factor(&self, n: usize, m: usize) -> f64 {
        let area = self.surfaces[n].area;
        if area <= 0.0 {
            return 0.0;
        }
        let af = match &self.factors {
            Factors::Matrix(af) => af.get(n, m),
            Factors::Row { row, af } if *row == n => af[m],
            Factors::Row { .. } => 0.0,
        };
        af / area
    }

    /// Full matrix of view factors.
    pub fn view_factors(&self) -> Option<Array2<f64>> {
        let areas: Vec<f64> = self.surfaces.iter().map(|s| s.area).collect();
        self.matrix().map(|af| af.factors(&areas))
    }

    pub fn row_sums(&self) -> Vec<f64> {
        let n = self.surfaces.len();
        (0..n).map(|i| (0..n).map(|j| self.factor(i, j)).sum()).collect()
    }

    pub fn converged(&self) -> bool {
        self.non_converged.is_empty()
    }

    pub fn print(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for ViewFactorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}-D geometry, {} surfaces", self.dimension, self.surfaces.len())?;
        write!(f, "{}", self.counters)?;
        if let Some(post) = &self.post {
            writeln!(f, "Post-processing:")?;
            writeln!(f, "  Nulls removed: {}", post.nulls_removed)?;
            writeln!(f, "  Subsurfaces:   {}", post.subsurfaces)?;
            writeln!(f, "  Combined:      {}", post.combined)?;
            writeln!(
                f,
                "  Row sum error: max {:.3e}, rms {:.3e}",
                post.before.max, post.before.rms
            )?;
            if let (Some(after), Some(norm)) = (&post.after, &post.normalisation) {
                writeln!(
                    f,
                    "  Normalised in {} iterations{}: max {:.3e}, rms {:.3e}",
                    norm.iterations,
                    if norm.converged { "" } else { " (not converged)" },
                    after.max,
                    after.rms
                )?;
            }
        }
        if let Some(volume) = self.volume {
            writeln!(f, "Enclosed volume: {:.6}", volume)?;
        }
        if !self.converged() {
            writeln!(
                f,
                "Warning: {} calculations did not converge",
                self.non_converged.len()
            )?;
        }
        write!(f, "Time taken: {:.2?}", self.elapsed)
    }
}
