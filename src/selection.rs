//! Choice of the (threshold, Q) pair from a solution surface.

use float_cmp::approx_eq;
use serde::{Deserialize, Serialize};

use crate::config::Orientation;
use crate::error::GspcrError;
use crate::results::SolutionSurface;

/// Rule used to pick a cell from the solution surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionRule {
    /// Best mean fit measure.
    Standard,
    /// Most parsimonious cell within one standard error of the best.
    OneSe,
}

/// A selected cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolutionRow {
    /// Threshold value on the full-data grid.
    pub threshold_value: f64,
    pub threshold_index: usize,
    pub n_components: usize,
    /// Raw (not oriented) mean fit measure across folds.
    pub mean: f64,
    pub standard_error: f64,
}

/// Selected solutions, one row per rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionTable {
    pub standard: SolutionRow,
    pub one_se: Option<SolutionRow>,
}

impl SolutionTable {
    pub fn get(&self, rule: SelectionRule) -> Option<&SolutionRow> {
        match rule {
            SelectionRule::Standard => Some(&self.standard),
            SelectionRule::OneSe => self.one_se.as_ref(),
        }
    }
}

/// Selects the standard and (optionally) the one-standard-error solution.
///
/// The standard solution maximizes the oriented mean; ties go to the smaller
/// Q, then the smaller threshold index. The one-SE solution is the smallest Q
/// (then smallest threshold index) whose oriented mean is at least the best
/// oriented mean minus the best cell's standard error.
///
/// # Errors
/// [`GspcrError::NoValidSolution`] if no cell is defined.
pub fn select(
    surface: &SolutionSurface,
    orientation: Orientation,
    one_se: bool,
) -> Result<SolutionTable, GspcrError> {
    let mean = surface.mean();
    let (n_thresholds, n_q) = mean.dim();
    let oriented = |t: usize, q: usize| orientation.orient(mean[(t, q)]);

    // Q-major scan: the first cell reaching the maximum wins ties.
    let mut best: Option<(usize, usize)> = None;
    for q in 0..n_q {
        for t in 0..n_thresholds {
            if !surface.is_defined(t, q) {
                continue;
            }
            let candidate = oriented(t, q);
            match best {
                Some((bt, bq)) => {
                    let incumbent = oriented(bt, bq);
                    if candidate > incumbent && !approx_eq!(f64, candidate, incumbent, ulps = 4) {
                        best = Some((t, q));
                    }
                }
                None => best = Some((t, q)),
            }
        }
    }
    let (bt, bq) = best.ok_or(GspcrError::NoValidSolution)?;
    let standard = row(surface, bt, bq);

    let one_se = if one_se {
        let cutoff = oriented(bt, bq) - surface.standard_error()[(bt, bq)];
        let mut chosen = (bt, bq);
        'scan: for q in 0..n_q {
            for t in 0..n_thresholds {
                if !surface.is_defined(t, q) {
                    continue;
                }
                let value = oriented(t, q);
                if value >= cutoff || approx_eq!(f64, value, cutoff, ulps = 4) {
                    chosen = (t, q);
                    break 'scan;
                }
            }
        }
        Some(row(surface, chosen.0, chosen.1))
    } else {
        None
    };

    Ok(SolutionTable {
        standard,
        one_se,
    })
}

fn row(surface: &SolutionSurface, t: usize, q: usize) -> SolutionRow {
    SolutionRow {
        threshold_value: surface.thresholds()[t],
        threshold_index: t,
        n_components: surface.components()[q],
        mean: surface.mean()[(t, q)],
        standard_error: surface.standard_error()[(t, q)],
    }
}
