//! Triangular store of area-weighted view factors.
//!
//! Only `AF[n][m]` with `m <= n` is kept; reading `(m, n)` returns the same
//! value, so reciprocity `A_n F_nm = A_m F_mn` holds by construction.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::geom::Role;

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> ViewFactorMatrix {
        let mut af = ViewFactorMatrix::new(n);
        for i in 0..n {
            for j in 0..i {
                af.set(i, j, (10 * i + j) as f64);
            }
        }
        af
    }

    #[test]
    fn lookup_is_symmetric() {
        let af = filled(4);
        assert_eq!(af.get(3, 1), 31.0);
        assert_eq!(af.get(1, 3), 31.0);
        assert_eq!(af.get(2, 2), 0.0);
        assert_eq!(af.row(1), vec![10.0, 0.0, 21.0, 31.0]);
        assert_eq!(af.row_sum(0), 10.0 + 20.0 + 30.0);
    }

    #[test]
    fn removal_shifts_later_surfaces() {
        let mut af = filled(4);
        af.remove(1);
        assert_eq!(af.len(), 3);
        assert_eq!(af.get(1, 0), 20.0);
        assert_eq!(af.get(2, 0), 30.0);
        assert_eq!(af.get(2, 1), 32.0);
    }

    #[test]
    fn factors_divide_by_row_area() {
        let mut af = ViewFactorMatrix::new(2);
        af.set(1, 0, 0.5);
        let f = af.factors(&[1.0, 2.0]);
        assert_eq!(f[[0, 1]], 0.5);
        assert_eq!(f[[1, 0]], 0.25);
        let full = af.to_full();
        assert_eq!(full[[0, 1]], full[[1, 0]]);
        assert_eq!(full[[0, 0]], 0.0);
    }
}

/// Area-weighted factors `AF[n][m] = A_n F_nm` for `m <= n`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewFactorMatrix {
    rows: Vec<Vec<f64>>,
}

impl ViewFactorMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            rows: (0..n).map(|i| vec![0.0; i + 1]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, n: usize, m: usize) -> f64 {
        if m <= n {
            self.rows[n][m]
        } else {
            self.rows[m][n]
        }
    }

    pub fn set(&mut self, n: usize, m: usize, af: f64) {
        if m <= n {
            self.rows[n][m] = af;
        } else {
            self.rows[m][n] = af;
        }
    }

    pub fn add(&mut self, n: usize, m: usize, af: f64) {
        let v = self.get(n, m);
        self.set(n, m, v + af);
    }

    /// Multiplies every stored value by `f(n, m)`.
    pub fn scale_with<F>(&mut self, f: F)
    where
        F: Fn(usize, usize) -> f64,
    {
        for (n, row) in self.rows.iter_mut().enumerate() {
            for (m, af) in row.iter_mut().enumerate() {
                *af *= f(n, m);
            }
        }
    }

    /// Full row `n`, read through the symmetry.
    pub fn row(&self, n: usize) -> Vec<f64> {
        (0..self.len()).map(|m| self.get(n, m)).collect()
    }

    pub fn row_sum(&self, n: usize) -> f64 {
        (0..self.len()).map(|m| self.get(n, m)).sum()
    }

    /// Deletes row and column `k`.
    pub fn remove(&mut self, k: usize) {
        self.rows.remove(k);
        for row in self.rows.iter_mut().skip(k) {
            row.remove(k);
        }
    }

    /// Square matrix of area-weighted factors.
    pub fn to_full(&self) -> Array2<f64> {
        let n = self.len();
        Array2::from_shape_fn((n, n), |(i, j)| self.get(i, j))
    }

    /// Square matrix of view factors `F[n][m] = AF[n][m] / A_n`.
    pub fn factors(&self, areas: &[f64]) -> Array2<f64> {
        let n = self.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if areas[i] > 0.0 {
                self.get(i, j) / areas[i]
            } else {
                0.0
            }
        })
    }
}

/// What post-processing and output need to know about a matrix row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    pub name: String,
    /// 1-based number in the input.
    pub number: usize,
    pub area: f64,
    pub emit: f64,
    pub role: Role,
    pub base: Option<usize>,
    pub cmbn: Option<usize>,
}
