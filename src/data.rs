//! Dataset representation and measurement-scale tags.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::GspcrError;

/// Measurement scale of a single variable (outcome or predictor column).
///
/// Discrete variables store integer level codes `0..levels` as `f64`.
/// `Binary` is the two-level case coded `0/1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Continuous,
    Binary,
    Nominal { levels: usize },
    Ordinal { levels: usize },
}

impl VariableType {
    pub fn is_discrete(&self) -> bool {
        !matches!(self, VariableType::Continuous)
    }

    /// Number of levels for discrete variables, `None` for continuous ones.
    pub fn n_levels(&self) -> Option<usize> {
        match *self {
            VariableType::Continuous => None,
            VariableType::Binary => Some(2),
            VariableType::Nominal { levels } | VariableType::Ordinal { levels } => Some(levels),
        }
    }

    /// Whether the values enter linear algebra as one numeric column (`true`) or
    /// as a set of indicator columns (`false`). Ordinal codes are treated as scores.
    pub fn is_numeric_coded(&self) -> bool {
        !matches!(self, VariableType::Nominal { .. })
    }
}

/// Outcome vector plus typed predictor matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    y: Array1<f64>,
    y_type: VariableType,
    x: Array2<f64>,
    x_types: Vec<VariableType>,
}

impl Dataset {
    /// Builds a dataset after checking shapes, finiteness and level codes.
    ///
    /// # Errors
    /// Returns an error if `x` and `y` disagree on the number of observations,
    /// `x_types` does not have one entry per column, there are no predictors,
    /// a value is non-finite, or a discrete value is not a valid level code.
    pub fn new(
        y: Array1<f64>,
        y_type: VariableType,
        x: Array2<f64>,
        x_types: Vec<VariableType>,
    ) -> Result<Self, GspcrError> {
        if x.nrows() != y.len() {
            return Err(GspcrError::DimensionMismatch {
                x_rows: x.nrows(),
                y_len: y.len(),
            });
        }
        if x.ncols() == 0 {
            return Err(GspcrError::config("predictor matrix has no columns"));
        }
        if x_types.len() != x.ncols() {
            return Err(GspcrError::InvalidData(format!(
                "{} predictor types supplied for {} columns",
                x_types.len(),
                x.ncols()
            )));
        }
        validate_column(y.view(), y_type, "outcome")?;
        for (j, (column, &column_type)) in x.axis_iter(Axis(1)).zip(x_types.iter()).enumerate() {
            validate_column(column, column_type, &format!("predictor {}", j))?;
        }
        Ok(Self {
            y,
            y_type,
            x,
            x_types,
        })
    }

    /// All-continuous dataset.
    pub fn continuous(y: Array1<f64>, x: Array2<f64>) -> Result<Self, GspcrError> {
        let x_types = vec![VariableType::Continuous; x.ncols()];
        Self::new(y, VariableType::Continuous, x, x_types)
    }

    pub fn y(&self) -> ArrayView1<'_, f64> {
        self.y.view()
    }

    pub fn y_type(&self) -> VariableType {
        self.y_type
    }

    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn x_types(&self) -> &[VariableType] {
        &self.x_types
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_predictors(&self) -> usize {
        self.x.ncols()
    }

    /// Row subset, preserving types. Used to materialise training and test folds.
    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            y: self.y.select(Axis(0), rows),
            y_type: self.y_type,
            x: self.x.select(Axis(0), rows),
            x_types: self.x_types.clone(),
        }
    }
}

fn validate_column(
    values: ArrayView1<f64>,
    column_type: VariableType,
    label: &str,
) -> Result<(), GspcrError> {
    if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
        return Err(GspcrError::InvalidData(format!(
            "{} has a non-finite value at row {}",
            label, bad
        )));
    }
    if let Some(levels) = column_type.n_levels() {
        if levels < 2 {
            return Err(GspcrError::InvalidData(format!(
                "{} is declared discrete with {} level(s); at least 2 are required",
                label, levels
            )));
        }
        for (row, &v) in values.iter().enumerate() {
            if v < 0.0 || v.fract() != 0.0 || v >= levels as f64 {
                return Err(GspcrError::InvalidData(format!(
                    "{} row {}: value {} is not a level code in 0..{}",
                    label, row, v, levels
                )));
            }
        }
    }
    Ok(())
}

/// Level code of a validated discrete value.
#[inline]
pub(crate) fn level_of(value: f64) -> usize {
    value as usize
}

/// Counts per level for a validated discrete column.
pub(crate) fn level_counts(values: ArrayView1<f64>, levels: usize) -> Vec<usize> {
    let mut counts = vec![0usize; levels];
    for &v in values.iter() {
        counts[level_of(v)] += 1;
    }
    counts
}

/// Treatment (reference level 0) coding of a nominal column.
pub(crate) fn dummy_encode(values: ArrayView1<f64>, levels: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((values.len(), levels.saturating_sub(1)));
    for (i, &v) in values.iter().enumerate() {
        let level = level_of(v);
        if level > 0 {
            out[[i, level - 1]] = 1.0;
        }
    }
    out
}

/// Numeric design block for one predictor: the column itself, or its dummy
/// coding when nominal.
pub(crate) fn design_block(values: ArrayView1<f64>, column_type: VariableType) -> Array2<f64> {
    match column_type {
        VariableType::Nominal { levels } => dummy_encode(values, levels),
        _ => values.to_owned().insert_axis(Axis(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_row_mismatch() {
        let err = Dataset::continuous(array![1.0, 2.0], array![[1.0], [2.0], [3.0]]).unwrap_err();
        assert!(matches!(
            err,
            GspcrError::DimensionMismatch { x_rows: 3, y_len: 2 }
        ));
    }

    #[test]
    fn rejects_empty_predictor_set() {
        let x = Array2::<f64>::zeros((3, 0));
        let err = Dataset::continuous(array![1.0, 2.0, 3.0], x).unwrap_err();
        assert!(matches!(err, GspcrError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_bad_level_code() {
        let err = Dataset::new(
            array![0.0, 1.0, 2.0],
            VariableType::Binary,
            array![[1.0], [2.0], [3.0]],
            vec![VariableType::Continuous],
        )
        .unwrap_err();
        assert!(matches!(err, GspcrError::InvalidData(_)));
    }

    #[test]
    fn dummy_coding_drops_reference_level() {
        let d = dummy_encode(array![0.0, 2.0, 1.0, 2.0].view(), 3);
        assert_eq!(d, array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn select_rows_keeps_types() {
        let data = Dataset::new(
            array![0.0, 1.0, 1.0],
            VariableType::Binary,
            array![[1.0, 0.0], [2.0, 1.0], [3.0, 2.0]],
            vec![VariableType::Continuous, VariableType::Nominal { levels: 3 }],
        )
        .unwrap();
        let sub = data.select_rows(&[2, 0]);
        assert_eq!(sub.y(), array![1.0, 0.0].view());
        assert_eq!(sub.x(), array![[3.0, 2.0], [1.0, 0.0]].view());
        assert_eq!(sub.x_types(), data.x_types());
    }
}
