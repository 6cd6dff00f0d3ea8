//! Fit measures evaluated on held-out rows.
//!
//! Every measure uses the parameters estimated on the training rows. When the
//! test rows are the training rows (K = 1) the measures reduce to their
//! in-sample versions.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::config::FitMeasure;
use crate::error::FitError;
use crate::glm::FittedGlm;

/// Scores `full` on `(x, y)`.
///
/// `null` is the intercept-only model fitted on the same training rows; it is
/// required by [`FitMeasure::Lrt`], [`FitMeasure::PseudoR2`] and [`FitMeasure::F`].
///
/// # Errors
/// Returns a [`FitError`] when a log-likelihood or prediction is not finite,
/// the F statistic has no residual degrees of freedom, or a required null
/// model is missing.
pub fn score(
    measure: FitMeasure,
    full: &FittedGlm,
    null: Option<&FittedGlm>,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
) -> Result<f64, FitError> {
    let n = y.len();
    if n == 0 {
        return Err(FitError::DegenerateOutcome("no rows to score".to_string()));
    }
    if measure.needs_null_model() && null.is_none() {
        return Err(FitError::DegenerateOutcome(format!(
            "{:?} needs the intercept-only model",
            measure
        )));
    }
    let no_predictors = Array2::<f64>::zeros((n, 0));

    let value = match measure {
        FitMeasure::Lrt => {
            let delta = log_likelihood_gain(full, null, x, y, no_predictors.view())?;
            2.0 * delta
        }
        FitMeasure::PseudoR2 => {
            let delta = log_likelihood_gain(full, null, x, y, no_predictors.view())?;
            1.0 - (-2.0 * delta / n as f64).exp()
        }
        FitMeasure::Mse => {
            let residuals = full.residuals(x, y)?;
            residuals.mapv(|r| r * r).sum() / n as f64
        }
        FitMeasure::F => {
            let q = full.n_predictors();
            let df_residual = n as f64 - q as f64 - 1.0;
            if q == 0 || df_residual <= 0.0 {
                return Err(FitError::DegenerateOutcome(format!(
                    "F statistic needs more than {} test rows",
                    q + 1
                )));
            }
            let rss_full = full.residuals(x, y)?.mapv(|r| r * r).sum();
            let rss_null = match null {
                Some(null) => null.residuals(no_predictors.view(), y)?.mapv(|r| r * r).sum(),
                None => return Err(FitError::DegenerateOutcome("missing null model".to_string())),
            };
            ((rss_null - rss_full) / q as f64) / (rss_full / df_residual)
        }
        FitMeasure::Aic => {
            let ll = full.log_likelihood(x, y)?;
            -2.0 * ll + 2.0 * full.n_parameters() as f64
        }
        FitMeasure::Bic => {
            let ll = full.log_likelihood(x, y)?;
            -2.0 * ll + (n as f64).ln() * full.n_parameters() as f64
        }
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(FitError::NonFinite(format!("{:?}", measure)))
    }
}

fn log_likelihood_gain(
    full: &FittedGlm,
    null: Option<&FittedGlm>,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    no_predictors: ArrayView2<f64>,
) -> Result<f64, FitError> {
    let null = null.ok_or_else(|| FitError::DegenerateOutcome("missing null model".to_string()))?;
    Ok(full.log_likelihood(x, y)? - null.log_likelihood(no_predictors, y)?)
}
