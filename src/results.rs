//! Per-fold results cube and its aggregation into a solution surface.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::GspcrError;

/// State of a single (fold, threshold, Q) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellStatus {
    /// The fit measure was computed.
    Scored,
    /// The cell was not attempted: degenerate fold grid, retained count outside
    /// the feature band, or Q above the available components.
    Skipped,
    /// The extractor, the outcome fit or the measure failed.
    Failed,
}

/// Counts of cell states across the cube.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCounts {
    pub scored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Raw fit-measure values indexed by (fold, threshold index, Q index).
///
/// Values of cells that are not [`CellStatus::Scored`] are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsCube {
    values: Array3<f64>,
    status: Array3<CellStatus>,
}

impl ResultsCube {
    /// Cube with every cell skipped.
    pub fn new(n_folds: usize, n_thresholds: usize, n_components: usize) -> Self {
        let shape = (n_folds, n_thresholds, n_components);
        ResultsCube {
            values: Array3::from_elem(shape, f64::NAN),
            status: Array3::from_elem(shape, CellStatus::Skipped),
        }
    }

    pub fn values(&self) -> ArrayView3<'_, f64> {
        self.values.view()
    }

    pub fn status(&self) -> ArrayView3<'_, CellStatus> {
        self.status.view()
    }

    /// (folds, thresholds, component counts)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn get(&self, fold: usize, threshold: usize, q: usize) -> Option<f64> {
        match self.status.get((fold, threshold, q)) {
            Some(CellStatus::Scored) => self.values.get((fold, threshold, q)).copied(),
            _ => None,
        }
    }

    pub(crate) fn record_score(&mut self, fold: usize, threshold: usize, q: usize, value: f64) {
        self.values[(fold, threshold, q)] = value;
        self.status[(fold, threshold, q)] = CellStatus::Scored;
    }

    pub(crate) fn record(&mut self, fold: usize, threshold: usize, q: usize, status: CellStatus) {
        self.values[(fold, threshold, q)] = f64::NAN;
        self.status[(fold, threshold, q)] = status;
    }

    pub fn counts(&self) -> CellCounts {
        self.status.iter().fold(CellCounts::default(), |mut c, s| {
            match s {
                CellStatus::Scored => c.scored += 1,
                CellStatus::Skipped => c.skipped += 1,
                CellStatus::Failed => c.failed += 1,
            }
            c
        })
    }

    /// Mean and standard error across folds of every (threshold, Q) cell.
    ///
    /// A cell is undefined (NaN) unless it was scored in every fold. The
    /// standard error is the sample standard deviation over `sqrt(K)`, and 0
    /// with a single fold.
    pub fn aggregate(&self, thresholds: ArrayView1<f64>, components: &[usize]) -> SolutionSurface {
        let (n_folds, n_thresholds, n_q) = self.dim();
        let mut mean = Array2::<f64>::from_elem((n_thresholds, n_q), f64::NAN);
        let mut standard_error = Array2::<f64>::from_elem((n_thresholds, n_q), f64::NAN);
        for t in 0..n_thresholds {
            for q in 0..n_q {
                let fold_values: Option<Vec<f64>> = (0..n_folds).map(|f| self.get(f, t, q)).collect();
                let Some(fold_values) = fold_values else {
                    continue;
                };
                if fold_values.is_empty() {
                    continue;
                }
                let k = fold_values.len() as f64;
                let m = fold_values.iter().sum::<f64>() / k;
                let se = if fold_values.len() > 1 {
                    let var = fold_values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (k - 1.0);
                    var.sqrt() / k.sqrt()
                } else {
                    0.0
                };
                mean[(t, q)] = m;
                standard_error[(t, q)] = se;
            }
        }
        SolutionSurface {
            mean,
            standard_error,
            thresholds: thresholds.to_owned(),
            components: components.to_vec(),
        }
    }
}

/// Cross-fold summary indexed by (threshold index, Q index). NaN marks an
/// undefined cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSurface {
    mean: Array2<f64>,
    standard_error: Array2<f64>,
    thresholds: Array1<f64>,
    components: Vec<usize>,
}

impl SolutionSurface {
    /// Builds a surface from precomputed means and standard errors.
    ///
    /// # Errors
    /// Returns [`GspcrError::InvalidData`] if the shapes of `mean`,
    /// `standard_error`, `thresholds` and `components` disagree.
    pub fn new(
        mean: Array2<f64>,
        standard_error: Array2<f64>,
        thresholds: Array1<f64>,
        components: Vec<usize>,
    ) -> Result<Self, GspcrError> {
        let expected = (thresholds.len(), components.len());
        if mean.dim() != expected || standard_error.dim() != expected {
            return Err(GspcrError::InvalidData(format!(
                "surface of shape {:?} / {:?} does not match {} thresholds and {} component counts",
                mean.dim(),
                standard_error.dim(),
                expected.0,
                expected.1
            )));
        }
        Ok(SolutionSurface {
            mean,
            standard_error,
            thresholds,
            components,
        })
    }

    pub fn mean(&self) -> ArrayView2<'_, f64> {
        self.mean.view()
    }

    pub fn standard_error(&self) -> ArrayView2<'_, f64> {
        self.standard_error.view()
    }

    /// Threshold value of each row.
    pub fn thresholds(&self) -> ArrayView1<'_, f64> {
        self.thresholds.view()
    }

    /// Component count of each column.
    pub fn components(&self) -> &[usize] {
        &self.components
    }

    pub fn is_defined(&self, threshold: usize, q: usize) -> bool {
        self.mean.get((threshold, q)).is_some_and(|v| v.is_finite())
    }

    pub fn n_defined(&self) -> usize {
        self.mean.iter().filter(|v| v.is_finite()).count()
    }
}
