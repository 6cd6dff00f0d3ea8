//! Candidate inclusion thresholds laid out over the range of a score vector.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::GspcrError;
use crate::screening::ScoreVector;

/// Strictly increasing sequence of thresholds, from the smallest to the
/// largest eligible score. The smallest threshold retains every eligible
/// predictor and the largest retains only the best-scoring one(s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdGrid {
    values: Array1<f64>,
}

impl ThresholdGrid {
    /// Lays `n_thresholds` evenly spaced values over `[min, max]` of the finite scores.
    ///
    /// # Errors
    /// [`GspcrError::InvalidConfig`] when `n_thresholds < 2`;
    /// [`GspcrError::DegenerateGrid`] when fewer than two distinct finite scores exist.
    pub fn build(scores: &ScoreVector, n_thresholds: usize) -> Result<Self, GspcrError> {
        if n_thresholds < 2 {
            return Err(GspcrError::config("n_thresholds must be at least 2"));
        }
        let (min, max) = scores
            .finite_values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if !(min.is_finite() && max.is_finite()) || max <= min {
            return Err(GspcrError::DegenerateGrid);
        }
        let step = (max - min) / (n_thresholds - 1) as f64;
        let mut values = Array1::from_shape_fn(n_thresholds, |i| min + step * i as f64);
        // Pin the top end so the best predictor is always retained despite rounding.
        values[n_thresholds - 1] = max;
        Ok(ThresholdGrid { values })
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdType;
    use crate::screening::EXCLUDED;
    use ndarray::array;

    fn scores(values: Array1<f64>) -> ScoreVector {
        ScoreVector::new(values, 100, ThresholdType::Normalized)
    }

    #[test]
    fn grid_is_strictly_increasing_with_requested_length() {
        let s = scores(array![0.3, 2.0, EXCLUDED, 1.1, 0.7]);
        for n in [2usize, 3, 10, 20] {
            let grid = ThresholdGrid::build(&s, n).unwrap();
            assert_eq!(grid.len(), n);
            assert!(grid.values().windows(2).into_iter().all(|w| w[0] < w[1]));
            assert_eq!(grid.get(0), Some(0.3));
            assert_eq!(grid.get(n - 1), Some(2.0));
        }
    }

    #[test]
    fn extreme_thresholds_retain_all_and_best() {
        let s = scores(array![0.3, 2.0, EXCLUDED, 1.1, 0.7]);
        let grid = ThresholdGrid::build(&s, 5).unwrap();
        assert_eq!(s.retained(grid.get(0).unwrap()), vec![0, 1, 3, 4]);
        assert_eq!(s.retained(grid.get(4).unwrap()), vec![1]);
    }

    #[test]
    fn reproduces_reference_grid_to_three_decimals() {
        // Normalized scores spanning [0.0507, 6.6504] give the published
        // 20-point grid 0.051, 0.398, 0.745, ..., 6.650.
        let s = scores(array![0.0507, 3.2, 6.6504, 1.7, 0.9]);
        let grid = ThresholdGrid::build(&s, 20).unwrap();
        let rounded: Vec<f64> = grid.values().iter().map(|v| (v * 1000.0).round() / 1000.0).collect();
        assert_eq!(rounded.len(), 20);
        assert_eq!(rounded[0], 0.051);
        assert_eq!(rounded[1], 0.398);
        assert_eq!(rounded[2], 0.745);
        assert_eq!(rounded[19], 6.650);
    }

    #[test]
    fn single_distinct_score_is_degenerate() {
        let s = scores(array![0.4, EXCLUDED, 0.4]);
        assert!(matches!(
            ThresholdGrid::build(&s, 5),
            Err(GspcrError::DegenerateGrid)
        ));
        let s = scores(array![0.1, 0.4]);
        assert!(ThresholdGrid::build(&s, 1).is_err());
    }
}
