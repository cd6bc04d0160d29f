//! Run-level diagnostics for a view factor computation.
//!
//! Counters are accumulated per worker and summed at the end, so the
//! quadrature routines never touch shared state. The summary includes:
//! - pairs with zero, unobstructed and obstructed factors
//! - the average number of probable obstructions per obstructed pair
//! - a histogram of unobstructed method against edge divisions
//! - point-function evaluations used and wasted by adaptive integration
//! - the number of pairs whose adaptive integration did not converge

use std::{fmt, ops::*};

use serde::Serialize;

use crate::unobstructed::Method;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_add() {
        let mut a = Counters::new();
        a.pairs_obstructed = 2;
        a.obstructions = 5;
        a.record_method(Method::Ali, 2);
        let mut b = Counters::new();
        b.pairs_obstructed = 1;
        b.obstructions = 1;
        b.record_method(Method::Ali, 2);
        b.record_method(Method::Dai, 1);
        a += b;
        assert_eq!(a.pairs_obstructed, 3);
        assert_eq!(a.bins[Method::Ali.index()][2], 2);
        assert_eq!(a.bins[Method::Dai.index()][1], 1);
        assert!((a.mean_obstructions() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn display_lists_methods() {
        let mut c = Counters::new();
        c.record_method(Method::Sli, 3);
        let text = format!("{}", c);
        assert!(text.contains("SLI"));
        assert!(text.contains("Non-converged"));
    }

    #[test]
    fn outcomes_are_tallied() {
        let mut c = Counters::new();
        c.record(&PairOutcome::zero(PairKind::Hidden));
        c.record(&PairOutcome::zero(PairKind::Blocked(4)));
        c.record(&PairOutcome {
            af: 0.2,
            kind: PairKind::Unobstructed {
                method: Method::Sli,
                n_edge_div: 2,
            },
            converged: true,
        });
        c.record(&PairOutcome {
            af: 0.1,
            kind: PairKind::Obstructed {
                source: 0,
                obstructions: 3,
            },
            converged: false,
        });
        c.record(&PairOutcome::zero(PairKind::Fixed));
        assert_eq!(c.pairs_zero, 2);
        assert_eq!(c.pairs_blocked, 1);
        assert_eq!(c.pairs_unobstructed, 1);
        assert_eq!(c.pairs_obstructed, 1);
        assert_eq!(c.obstructions, 3);
        assert_eq!(c.non_converged, 1);
        assert_eq!(c.bins[Method::Sli.index()][2], 1);
        assert_eq!(c.pairs_total(), 4);
    }
}

/// How the factor of one surface pair was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairKind {
    /// Set by convention (masks, subsurfaces on their base).
    Fixed,
    /// The surfaces cannot see each other.
    Hidden,
    /// A single obstruction covers the whole view.
    Blocked(usize),
    /// Integrated without obstructions.
    Unobstructed { method: Method, n_edge_div: usize },
    /// Hottel's crossed strings, 2-D only.
    CrossedStrings,
    /// Integrated with shadows cast from `source`.
    Obstructed { source: usize, obstructions: usize },
}

impl fmt::Display for PairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairKind::Fixed => write!(f, "fixed"),
            PairKind::Hidden => write!(f, "hidden"),
            PairKind::Blocked(k) => write!(f, "blocked by {}", k + 1),
            PairKind::Unobstructed { method, n_edge_div } => {
                write!(f, "{} ({} div)", method, n_edge_div)
            }
            PairKind::CrossedStrings => write!(f, "crossed strings"),
            PairKind::Obstructed {
                source,
                obstructions,
            } => write!(f, "from {}, {} obstructions", source + 1, obstructions),
        }
    }
}

/// Area-weighted factor of one pair and how it was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairOutcome {
    pub af: f64,
    pub kind: PairKind,
    pub converged: bool,
}

impl PairOutcome {
    pub fn zero(kind: PairKind) -> Self {
        Self {
            af: 0.0,
            kind,
            converged: true,
        }
    }
}

/// Counts of pair outcomes and integration effort.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Counters {
    pub pairs_zero: usize,          // pairs that cannot see each other
    pub pairs_unobstructed: usize,  // computed without obstructions
    pub pairs_obstructed: usize,    // computed with shadowing
    pub pairs_blocked: usize,       // fully blocked by a single obstruction
    pub obstructions: usize,        // probable obstructions over obstructed pairs
    pub bins: [[usize; 6]; 5],      // unobstructed method × edge divisions (5 = fell back to ALI)
    pub line_points: usize,         // line integral point evaluations
    pub used_points: usize,         // obstructed point evaluations kept
    pub wasted_points: usize,       // obstructed point evaluations discarded on refinement
    pub non_converged: usize,       // pairs flagged as not converged
}

impl Add for Counters {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, other: Self) {
        self.pairs_zero += other.pairs_zero;
        self.pairs_unobstructed += other.pairs_unobstructed;
        self.pairs_obstructed += other.pairs_obstructed;
        self.pairs_blocked += other.pairs_blocked;
        self.obstructions += other.obstructions;
        for (row, other_row) in self.bins.iter_mut().zip(other.bins.iter()) {
            for (a, b) in row.iter_mut().zip(other_row.iter()) {
                *a += b;
            }
        }
        self.line_points += other.line_points;
        self.used_points += other.used_points;
        self.wasted_points += other.wasted_points;
        self.non_converged += other.non_converged;
    }
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one pair outcome to the tallies.
    pub fn record(&mut self, outcome: &PairOutcome) {
        match outcome.kind {
            PairKind::Fixed => {}
            PairKind::Hidden => self.pairs_zero += 1,
            PairKind::Blocked(_) => {
                self.pairs_zero += 1;
                self.pairs_blocked += 1;
            }
            PairKind::Unobstructed { method, n_edge_div } => {
                self.pairs_unobstructed += 1;
                self.record_method(method, n_edge_div);
            }
            PairKind::CrossedStrings => self.pairs_unobstructed += 1,
            PairKind::Obstructed { obstructions, .. } => {
                self.pairs_obstructed += 1;
                self.obstructions += obstructions;
            }
        }
        if !outcome.converged {
            self.non_converged += 1;
        }
    }

    pub fn record_method(&mut self, method: Method, n_edge_div: usize) {
        self.bins[method.index()][n_edge_div.min(5)] += 1;
    }

    pub fn mean_obstructions(&self) -> f64 {
        if self.pairs_obstructed == 0 {
            0.0
        } else {
            self.obstructions as f64 / self.pairs_obstructed as f64
        }
    }

    pub fn pairs_total(&self) -> usize {
        self.pairs_zero + self.pairs_unobstructed + self.pairs_obstructed
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pairs:")?;
        writeln!(f, "  Zero factor:      {}", self.pairs_zero)?;
        writeln!(f, "  Fully blocked:    {}", self.pairs_blocked)?;
        writeln!(f, "  Unobstructed:     {}", self.pairs_unobstructed)?;
        writeln!(f, "  Obstructed:       {}", self.pairs_obstructed)?;
        writeln!(f, "  Avg. obstructions: {:.2}", self.mean_obstructions())?;
        writeln!(f, "Methods (edge divisions 1-4, fix):")?;
        for method in Method::ALL {
            let row = &self.bins[method.index()];
            writeln!(
                f,
                "  {:<4} {:>7} {:>7} {:>7} {:>7} {:>7}",
                method, row[1], row[2], row[3], row[4], row[5]
            )?;
        }
        writeln!(f, "  Line integral points: {}", self.line_points)?;
        writeln!(
            f,
            "  Obstructed points:    {} used, {} wasted",
            self.used_points, self.wasted_points
        )?;
        writeln!(f, "  Non-converged:        {}", self.non_converged)
    }
}
