// Principal component extraction for mixed-type predictor blocks

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};

use crate::data::{level_of, VariableType};
use crate::error::GspcrError;

/// Extracts principal components from the predictors that survive a threshold.
///
/// Implementations must be deterministic for a given input matrix and return
/// components ordered by decreasing explained variance.
pub trait ComponentExtractor: Sync {
    fn extract(
        &self,
        x: ArrayView2<f64>,
        max_components: usize,
        column_types: &[VariableType],
    ) -> Result<Box<dyn ComponentProjection>, GspcrError>;
}

/// Components fitted on a training block, able to score new rows.
pub trait ComponentProjection: Send + Sync {
    /// Component scores of the training rows, shape (n_samples, k_components).
    fn scores(&self) -> ArrayView2<'_, f64>;

    /// Loadings in the encoded feature space, shape (n_encoded_features, k_components).
    fn loadings(&self) -> ArrayView2<'_, f64>;

    /// Variance of each component (eigenvalue of the correlation-type matrix).
    fn explained_variance(&self) -> ArrayView1<'_, f64>;

    /// Component scores of new rows with the same columns as the training block.
    fn project(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, GspcrError>;

    fn n_components(&self) -> usize {
        self.scores().ncols()
    }
}

/// How a raw predictor column enters the PCA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ColumnEncoding {
    /// One standardized column (continuous, binary and ordinal scores).
    Numeric,
    /// One indicator per level, weighted by `1/sqrt(level share)`.
    Indicators { levels: usize },
}

impl ColumnEncoding {
    fn of(t: VariableType) -> Self {
        match t {
            VariableType::Nominal { levels } => ColumnEncoding::Indicators { levels },
            _ => ColumnEncoding::Numeric,
        }
    }

    fn width(&self) -> usize {
        match *self {
            ColumnEncoding::Numeric => 1,
            ColumnEncoding::Indicators { levels } => levels,
        }
    }
}

/// PCA for mixed data (PCAmix-style).
///
/// Numeric columns are centred and scaled to unit variance. Nominal columns are
/// expanded to level indicators, centred, and divided by the square root of
/// the level share, which makes the decomposition an MCA on the nominal block
/// and a standardized PCA on the numeric block.
#[derive(Debug, Clone, Copy)]
pub struct MixedPca {
    /// Components with eigenvalue at or below `tolerance * largest` are dropped.
    pub tolerance: f64,
}

impl Default for MixedPca {
    fn default() -> Self {
        MixedPca { tolerance: 1e-10 }
    }
}

/// Fitted [`MixedPca`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MixedPcaModel {
    encodings: Vec<ColumnEncoding>,
    /// Mean of every encoded column. Shape: (n_encoded_features)
    mean: Array1<f64>,
    /// Positive divisor of every encoded column. Shape: (n_encoded_features)
    scale: Array1<f64>,
    /// Principal axes as unit columns. Shape: (n_encoded_features, k_components)
    rotation: Array2<f64>,
    /// Eigenvalue of each kept component. Shape: (k_components)
    explained_variance: Array1<f64>,
    /// Training scores; not persisted.
    #[serde(skip)]
    scores: Array2<f64>,
}

impl MixedPca {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fits up to `max_components` components on `x`.
    ///
    /// Uses the feature covariance when there are no more encoded features than
    /// samples, and the sample Gram matrix otherwise.
    ///
    /// # Errors
    /// Returns an error if `x` has fewer than 2 rows or no columns, the type list
    /// does not match the columns, or the eigen-decomposition fails.
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        max_components: usize,
        column_types: &[VariableType],
    ) -> Result<MixedPcaModel, GspcrError> {
        let n_samples = x.nrows();
        if n_samples < 2 || x.ncols() == 0 {
            return Err(GspcrError::Extraction(format!(
                "need at least 2 samples and 1 feature, got {}x{}",
                n_samples,
                x.ncols()
            )));
        }
        if column_types.len() != x.ncols() {
            return Err(GspcrError::Extraction(format!(
                "{} column types for {} columns",
                column_types.len(),
                x.ncols()
            )));
        }

        let encodings: Vec<ColumnEncoding> = column_types.iter().map(|&t| ColumnEncoding::of(t)).collect();
        let mut data_matrix = encode(x, &encodings);
        let n_features = data_matrix.ncols();

        let mean_vector = data_matrix
            .mean_axis(Axis(0))
            .ok_or_else(|| GspcrError::Extraction("failed to compute column means".to_string()))?;
        let scale_vector = column_scales(data_matrix.view(), mean_vector.view(), &encodings);
        data_matrix -= &mean_vector;
        data_matrix /= &scale_vector;

        let (eigenvalues, mut rotation) = if n_features <= n_samples {
            let mut cov_matrix = data_matrix.t().dot(&data_matrix);
            cov_matrix /= (n_samples - 1) as f64;
            let (vals, vecs) = cov_matrix
                .eigh(UPLO::Upper)
                .map_err(|e| GspcrError::Extraction(format!("eigen decomposition of covariance failed: {}", e)))?;
            let order = descending_order(&vals);
            let rank = self.rank(&vals, &order, max_components);
            let mut rotation = Array2::<f64>::zeros((n_features, rank));
            for (c, &idx) in order.iter().take(rank).enumerate() {
                rotation.column_mut(c).assign(&vecs.column(idx));
            }
            (order.iter().take(rank).map(|&i| vals[i].max(0.0)).collect::<Vec<_>>(), rotation)
        } else {
            // Gram trick: eigenvectors u of ZZ'/(n-1) map to axes Z'u / sqrt(lambda (n-1)).
            let mut gram_matrix = data_matrix.dot(&data_matrix.t());
            gram_matrix /= (n_samples - 1) as f64;
            let (vals, u_vecs) = gram_matrix
                .eigh(UPLO::Upper)
                .map_err(|e| GspcrError::Extraction(format!("eigen decomposition of Gram matrix failed: {}", e)))?;
            let order = descending_order(&vals);
            let rank = self.rank(&vals, &order, max_components);
            let mut rotation = Array2::<f64>::zeros((n_features, rank));
            for (c, &idx) in order.iter().take(rank).enumerate() {
                let mut axis = data_matrix.t().dot(&u_vecs.column(idx));
                let norm = axis.dot(&axis).sqrt();
                if norm > 1e-12 {
                    axis.mapv_inplace(|v| v / norm);
                }
                rotation.column_mut(c).assign(&axis);
            }
            (order.iter().take(rank).map(|&i| vals[i].max(0.0)).collect::<Vec<_>>(), rotation)
        };

        orient_columns(&mut rotation);
        let scores = data_matrix.dot(&rotation);

        Ok(MixedPcaModel {
            encodings,
            mean: mean_vector,
            scale: scale_vector,
            rotation,
            explained_variance: Array1::from(eigenvalues),
            scores,
        })
    }

    /// Number of components to keep: eigenvalues above the tolerance, capped.
    fn rank(&self, vals: &Array1<f64>, order: &[usize], max_components: usize) -> usize {
        let largest = order.first().map_or(0.0, |&i| vals[i]);
        if largest <= 1e-12 {
            return 0;
        }
        let threshold = largest * self.tolerance.clamp(0.0, 1.0);
        order
            .iter()
            .take_while(|&&i| vals[i] > threshold)
            .count()
            .min(max_components)
    }
}

impl ComponentExtractor for MixedPca {
    fn extract(
        &self,
        x: ArrayView2<f64>,
        max_components: usize,
        column_types: &[VariableType],
    ) -> Result<Box<dyn ComponentProjection>, GspcrError> {
        Ok(Box::new(self.fit(x, max_components, column_types)?))
    }
}

impl MixedPcaModel {
    pub fn rotation(&self) -> ArrayView2<'_, f64> {
        self.rotation.view()
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn scale(&self) -> ArrayView1<'_, f64> {
        self.scale.view()
    }

    /// Number of raw (unencoded) predictor columns the model expects.
    pub fn n_input_columns(&self) -> usize {
        self.encodings.len()
    }

    /// Keeps only the first `k` components.
    pub fn truncate(&mut self, k: usize) {
        let k = k.min(self.rotation.ncols());
        self.rotation = self.rotation.slice(s![.., ..k]).to_owned();
        self.explained_variance = self.explained_variance.slice(s![..k]).to_owned();
        if self.scores.ncols() >= k {
            self.scores = self.scores.slice(s![.., ..k]).to_owned();
        }
    }

    /// Projects raw rows onto the components.
    ///
    /// # Errors
    /// Returns an error if the number of columns differs from the training block.
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, GspcrError> {
        if x.ncols() != self.encodings.len() {
            return Err(GspcrError::Extraction(format!(
                "input has {} columns, model was fitted on {}",
                x.ncols(),
                self.encodings.len()
            )));
        }
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, self.rotation.ncols())));
        }
        let mut encoded = encode(x, &self.encodings);
        encoded -= &self.mean;
        encoded /= &self.scale;
        Ok(encoded.dot(&self.rotation))
    }
}

impl ComponentProjection for MixedPcaModel {
    fn scores(&self) -> ArrayView2<'_, f64> {
        self.scores.view()
    }

    fn loadings(&self) -> ArrayView2<'_, f64> {
        self.rotation.view()
    }

    fn explained_variance(&self) -> ArrayView1<'_, f64> {
        self.explained_variance.view()
    }

    fn project(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, GspcrError> {
        self.transform(x)
    }
}

/// Expands nominal columns into level indicators.
fn encode(x: ArrayView2<f64>, encodings: &[ColumnEncoding]) -> Array2<f64> {
    let width: usize = encodings.iter().map(|e| e.width()).sum();
    let mut out = Array2::<f64>::zeros((x.nrows(), width));
    let mut offset = 0;
    for (j, encoding) in encodings.iter().enumerate() {
        match *encoding {
            ColumnEncoding::Numeric => out.column_mut(offset).assign(&x.column(j)),
            ColumnEncoding::Indicators { levels } => {
                for (i, &v) in x.column(j).iter().enumerate() {
                    let level = level_of(v);
                    if level < levels {
                        out[[i, offset + level]] = 1.0;
                    }
                }
            }
        }
        offset += encoding.width();
    }
    out
}

/// Standard deviation for numeric columns and `sqrt(share)` for indicators.
/// Non-positive or tiny divisors become 1.0.
fn column_scales(data: ArrayView2<f64>, mean: ArrayView1<f64>, encodings: &[ColumnEncoding]) -> Array1<f64> {
    let mut scale = Array1::<f64>::ones(data.ncols());
    let mut offset = 0;
    for encoding in encodings {
        match *encoding {
            ColumnEncoding::Numeric => {
                scale[offset] = data.column(offset).std(0.0);
            }
            ColumnEncoding::Indicators { levels } => {
                for k in 0..levels {
                    scale[offset + k] = mean[offset + k].sqrt();
                }
            }
        }
        offset += encoding.width();
    }
    scale.mapv(|v| if v.is_finite() && v > 1e-9 { v } else { 1.0 })
}

fn descending_order(vals: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..vals.len()).collect();
    order.sort_by(|&a, &b| vals[b].partial_cmp(&vals[a]).unwrap_or(std::cmp::Ordering::Equal));
    order
}

/// Flips each axis so that its largest-magnitude loading is positive.
fn orient_columns(rotation: &mut Array2<f64>) {
    for mut column in rotation.columns_mut() {
        let pivot = column
            .iter()
            .cloned()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }
}
