//! Outcome models fitted on principal component scores.
//!
//! Gaussian models are solved directly from the normal equations. Binomial and
//! Poisson models use IRLS. Multinomial and cumulative-logit models are fitted
//! by Newton–Raphson in [`crate::multicategory`]. Every model carries an
//! intercept (or ordered cut-points), so a design with zero columns is the
//! intercept-only null model.

use log::trace;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::config::Family;
use crate::data::{level_counts, VariableType};
use crate::error::FitError;
use crate::multicategory;

/// Maximum IRLS / Newton iterations.
pub(crate) const MAX_ITERATIONS: usize = 100;
/// Relative change in deviance below which an iterative fit has converged.
pub(crate) const CONVERGENCE_TOLERANCE: f64 = 1e-10;
/// Lower bound applied to fitted probabilities before taking logs.
pub(crate) const PROB_FLOOR: f64 = 1e-12;
/// Linear predictor magnitude at which a fitted probability is numerically 0 or 1.
pub(crate) const SEPARATION_ETA: f64 = 25.0;

/// Family plus the number of outcome levels (meaningful for discrete families).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    pub family: Family,
    pub n_levels: usize,
}

impl OutcomeSpec {
    pub fn new(family: Family, y_type: VariableType) -> Self {
        OutcomeSpec {
            family,
            n_levels: y_type.n_levels().unwrap_or(0),
        }
    }
}

/// Estimated parameters, one variant per family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GlmParameters {
    /// Intercept first, then slopes; `sigma2` is the maximum-likelihood residual variance.
    Gaussian { beta: Array1<f64>, sigma2: f64 },
    Binomial { beta: Array1<f64> },
    Poisson { beta: Array1<f64> },
    /// One row per non-baseline level (level 0 is the baseline), intercept in column 0.
    Multinomial { beta: Array2<f64> },
    /// `P(Y <= k) = logistic(cutpoints[k] - x·beta)`.
    Cumulative {
        cutpoints: Array1<f64>,
        beta: Array1<f64>,
    },
}

/// Prediction on new rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Expected outcome (mean, success probability or rate).
    Mean(Array1<f64>),
    /// Class probabilities, one column per level.
    Probabilities(Array2<f64>),
}

/// A fitted outcome model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedGlm {
    spec: OutcomeSpec,
    params: GlmParameters,
    n_predictors: usize,
    n_train: usize,
    iterations: usize,
    train_log_likelihood: f64,
}

/// Fits the outcome model of `spec` on design `x` (no intercept column).
///
/// # Errors
/// Returns a [`FitError`] when an iterative fit does not converge, the normal
/// equations are singular, a discrete outcome level is absent from `y`, or the
/// fit produces non-finite values.
pub fn fit(spec: OutcomeSpec, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<FittedGlm, FitError> {
    if x.nrows() != y.len() {
        return Err(FitError::DegenerateOutcome(format!(
            "design has {} rows but outcome has {}",
            x.nrows(),
            y.len()
        )));
    }
    if y.len() <= x.ncols() + 1 {
        return Err(FitError::DegenerateOutcome(format!(
            "{} observations cannot identify {} slopes and an intercept",
            y.len(),
            x.ncols()
        )));
    }

    let (params, iterations) = match spec.family {
        Family::Gaussian => (fit_gaussian(x, y)?, 1),
        Family::Binomial => {
            check_levels(y, 2)?;
            let (beta, iterations) = fit_irls(spec.family, x, y)?;
            (GlmParameters::Binomial { beta }, iterations)
        }
        Family::Poisson => {
            if y.iter().all(|&v| v == 0.0) {
                return Err(FitError::DegenerateOutcome(
                    "all counts are zero".to_string(),
                ));
            }
            let (beta, iterations) = fit_irls(spec.family, x, y)?;
            (GlmParameters::Poisson { beta }, iterations)
        }
        Family::Multinomial => {
            check_levels(y, spec.n_levels)?;
            let (beta, iterations) = multicategory::fit_multinomial(x, y, spec.n_levels)?;
            (GlmParameters::Multinomial { beta }, iterations)
        }
        Family::Cumulative => {
            check_levels(y, spec.n_levels)?;
            let (cutpoints, beta, iterations) = multicategory::fit_cumulative(x, y, spec.n_levels)?;
            (GlmParameters::Cumulative { cutpoints, beta }, iterations)
        }
    };

    let mut fitted = FittedGlm {
        spec,
        params,
        n_predictors: x.ncols(),
        n_train: y.len(),
        iterations,
        train_log_likelihood: f64::NAN,
    };
    let ll = fitted.log_likelihood(x, y)?;
    fitted.train_log_likelihood = ll;
    trace!(
        "{:?} fit with {} predictor(s): logLik={:.4} after {} iteration(s)",
        spec.family,
        x.ncols(),
        ll,
        iterations
    );
    Ok(fitted)
}

/// Intercept-only model.
pub fn fit_null(spec: OutcomeSpec, y: ArrayView1<f64>) -> Result<FittedGlm, FitError> {
    let empty = Array2::<f64>::zeros((y.len(), 0));
    fit(spec, empty.view(), y)
}

impl FittedGlm {
    pub fn spec(&self) -> OutcomeSpec {
        self.spec
    }

    pub fn parameters(&self) -> &GlmParameters {
        &self.params
    }

    /// Number of predictor columns the model was fitted on.
    pub fn n_predictors(&self) -> usize {
        self.n_predictors
    }

    pub fn n_train(&self) -> usize {
        self.n_train
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Log-likelihood on the training data.
    pub fn train_log_likelihood(&self) -> f64 {
        self.train_log_likelihood
    }

    /// Number of estimated parameters, including intercepts, cut-points and
    /// the Gaussian residual variance.
    pub fn n_parameters(&self) -> usize {
        let p = self.n_predictors;
        match &self.params {
            GlmParameters::Gaussian { .. } => p + 2,
            GlmParameters::Binomial { .. } | GlmParameters::Poisson { .. } => p + 1,
            GlmParameters::Multinomial { beta } => beta.len(),
            GlmParameters::Cumulative { cutpoints, .. } => cutpoints.len() + p,
        }
    }

    fn check_columns(&self, x: ArrayView2<f64>) -> Result<(), FitError> {
        if x.ncols() != self.n_predictors {
            return Err(FitError::DegenerateOutcome(format!(
                "model expects {} predictor column(s), got {}",
                self.n_predictors,
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Predicted means (Gaussian, binomial, Poisson) or class probabilities
    /// (multinomial, cumulative).
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Prediction, FitError> {
        self.check_columns(x)?;
        let prediction = match &self.params {
            GlmParameters::Gaussian { beta, .. } => Prediction::Mean(linear_predictor(x, beta.view())),
            GlmParameters::Binomial { beta } => {
                Prediction::Mean(linear_predictor(x, beta.view()).mapv(logistic))
            }
            GlmParameters::Poisson { beta } => {
                Prediction::Mean(linear_predictor(x, beta.view()).mapv(f64::exp))
            }
            GlmParameters::Multinomial { beta } => {
                Prediction::Probabilities(multicategory::multinomial_probabilities(x, beta.view()))
            }
            GlmParameters::Cumulative { cutpoints, beta } => Prediction::Probabilities(
                multicategory::cumulative_probabilities(x, cutpoints.view(), beta.view()),
            ),
        };
        Ok(prediction)
    }

    /// Predicted means. Defined for the Gaussian, binomial and Poisson families.
    pub fn predict_mean(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, FitError> {
        match self.predict(x)? {
            Prediction::Mean(mu) => Ok(mu),
            Prediction::Probabilities(_) => Err(FitError::DegenerateOutcome(format!(
                "the {:?} family has no scalar mean prediction",
                self.spec.family
            ))),
        }
    }

    /// Response residuals `y - mu` on arbitrary rows.
    pub fn residuals(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Array1<f64>, FitError> {
        let mu = self.predict_mean(x)?;
        Ok(&y - &mu)
    }

    /// Log-likelihood of `y` given `x` under the fitted parameters.
    ///
    /// Evaluated on held-out rows this is the predictive log-likelihood used by
    /// the cross-validated fit measures.
    pub fn log_likelihood(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<f64, FitError> {
        self.check_columns(x)?;
        let ll = match &self.params {
            GlmParameters::Gaussian { beta, sigma2 } => {
                let mu = linear_predictor(x, beta.view());
                let ln_norm = -0.5 * (2.0 * std::f64::consts::PI * sigma2).ln();
                y.iter()
                    .zip(mu.iter())
                    .map(|(&yi, &mi)| ln_norm - (yi - mi).powi(2) / (2.0 * sigma2))
                    .sum()
            }
            GlmParameters::Binomial { beta } => {
                let eta = linear_predictor(x, beta.view());
                y.iter()
                    .zip(eta.iter())
                    .map(|(&yi, &ei)| {
                        let mu = logistic(ei).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
                        yi * mu.ln() + (1.0 - yi) * (1.0 - mu).ln()
                    })
                    .sum()
            }
            GlmParameters::Poisson { beta } => {
                let eta = linear_predictor(x, beta.view());
                y.iter()
                    .zip(eta.iter())
                    .map(|(&yi, &ei)| yi * ei - ei.exp() - ln_gamma(yi + 1.0))
                    .sum()
            }
            GlmParameters::Multinomial { beta } => {
                let probs = multicategory::multinomial_probabilities(x, beta.view());
                categorical_log_likelihood(probs.view(), y)
            }
            GlmParameters::Cumulative { cutpoints, beta } => {
                let probs = multicategory::cumulative_probabilities(x, cutpoints.view(), beta.view());
                categorical_log_likelihood(probs.view(), y)
            }
        };
        if ll.is_finite() {
            Ok(ll)
        } else {
            Err(FitError::NonFinite("log-likelihood".to_string()))
        }
    }
}

/// `[1, x]`.
pub(crate) fn with_intercept(x: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::ones((x.nrows(), x.ncols() + 1));
    out.slice_mut(s![.., 1..]).assign(&x);
    out
}

/// `beta[0] + x·beta[1..]`.
pub(crate) fn linear_predictor(x: ArrayView2<f64>, beta: ArrayView1<f64>) -> Array1<f64> {
    x.dot(&beta.slice(s![1..])) + beta[0]
}

#[inline]
pub(crate) fn logistic(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

pub(crate) fn categorical_log_likelihood(probs: ArrayView2<f64>, y: ArrayView1<f64>) -> f64 {
    y.iter()
        .enumerate()
        .map(|(i, &yi)| probs[[i, yi as usize]].max(PROB_FLOOR).ln())
        .sum()
}

fn check_levels(y: ArrayView1<f64>, n_levels: usize) -> Result<(), FitError> {
    if n_levels < 2 {
        return Err(FitError::DegenerateOutcome(
            "discrete outcome needs at least two levels".to_string(),
        ));
    }
    let counts = level_counts(y, n_levels);
    if let Some(missing) = counts.iter().position(|&c| c == 0) {
        return Err(FitError::DegenerateOutcome(format!(
            "outcome level {} does not occur in the training data",
            missing
        )));
    }
    Ok(())
}

/// Solves the symmetric system `a · b = rhs`, mapping failure to [`FitError::Singular`].
pub(crate) fn solve_symmetric(a: Array2<f64>, rhs: Array1<f64>) -> Result<Array1<f64>, FitError> {
    let solution = a.solve_into(rhs).map_err(|_| FitError::Singular)?;
    if solution.iter().all(|v| v.is_finite()) {
        Ok(solution)
    } else {
        Err(FitError::Singular)
    }
}

fn fit_gaussian(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<GlmParameters, FitError> {
    let x1 = with_intercept(x);
    let xtx = x1.t().dot(&x1);
    let xty = x1.t().dot(&y);
    let beta = solve_symmetric(xtx, xty)?;
    let fitted = x1.dot(&beta);
    let rss: f64 = y
        .iter()
        .zip(fitted.iter())
        .map(|(&yi, &fi)| (yi - fi).powi(2))
        .sum();
    let sigma2 = rss / y.len() as f64;
    if !(sigma2 > 0.0) {
        return Err(FitError::DegenerateOutcome(
            "zero residual variance".to_string(),
        ));
    }
    Ok(GlmParameters::Gaussian { beta, sigma2 })
}

/// Iteratively reweighted least squares for the canonical binomial and Poisson links.
fn fit_irls(family: Family, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(Array1<f64>, usize), FitError> {
    let x1 = with_intercept(x);

    let mut mu: Array1<f64> = match family {
        Family::Binomial => y.mapv(|v| (v + 0.5) / 2.0),
        _ => y.mapv(|v| v + 0.1),
    };
    let mut eta: Array1<f64> = match family {
        Family::Binomial => mu.mapv(|m| (m / (1.0 - m)).ln()),
        _ => mu.mapv(f64::ln),
    };
    let mut deviance_old = f64::INFINITY;
    let mut beta = Array1::<f64>::zeros(x1.ncols());

    for iteration in 1..=MAX_ITERATIONS {
        // Working weights equal dmu/deta for canonical links.
        let weights = match family {
            Family::Binomial => mu.mapv(|m| (m * (1.0 - m)).max(PROB_FLOOR)),
            _ => mu.mapv(|m| m.max(PROB_FLOOR)),
        };
        let z: Array1<f64> = ndarray::Zip::from(&eta)
            .and(&y)
            .and(&mu)
            .and(&weights)
            .map_collect(|&e, &yi, &m, &w| e + (yi - m) / w);

        let xw = &x1 * &weights.view().insert_axis(Axis(1));
        let xtwx = xw.t().dot(&x1);
        let xtwz = xw.t().dot(&z);
        beta = solve_symmetric(xtwx, xtwz)?;

        eta = x1.dot(&beta);
        mu = match family {
            Family::Binomial => eta.mapv(|e| logistic(e).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)),
            _ => eta.mapv(f64::exp),
        };
        if mu.iter().any(|m| !m.is_finite()) {
            return Err(FitError::NonFinite("fitted mean".to_string()));
        }

        let deviance = irls_deviance(family, y, mu.view());
        if ((deviance - deviance_old).abs() / (deviance.abs() + 0.1)) < CONVERGENCE_TOLERANCE {
            if family == Family::Binomial && eta.iter().any(|e| e.abs() > SEPARATION_ETA) {
                return Err(FitError::Separation);
            }
            return Ok((beta, iteration));
        }
        deviance_old = deviance;
    }
    Err(FitError::ConvergenceFailed {
        iterations: MAX_ITERATIONS,
    })
}

fn irls_deviance(family: Family, y: ArrayView1<f64>, mu: ArrayView1<f64>) -> f64 {
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| match family {
            Family::Binomial => {
                let a = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
                let b = if yi < 1.0 {
                    (1.0 - yi) * ((1.0 - yi) / (1.0 - mi)).ln()
                } else {
                    0.0
                };
                2.0 * (a + b)
            }
            _ => {
                let a = if yi > 0.0 { yi * (yi / mi).ln() } else { 0.0 };
                2.0 * (a - (yi - mi))
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn spec(family: Family, n_levels: usize) -> OutcomeSpec {
        OutcomeSpec { family, n_levels }
    }

    #[test]
    fn gaussian_recovers_exact_line_up_to_noise() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.1, 2.9, 5.2, 7.0, 8.9, 11.1];
        let fitted = fit(spec(Family::Gaussian, 0), x.view(), y.view()).unwrap();
        match fitted.parameters() {
            GlmParameters::Gaussian { beta, .. } => {
                assert_abs_diff_eq!(beta[1], 1.994_285_714, epsilon = 1e-6);
                assert_abs_diff_eq!(beta[0], 1.047_619_048, epsilon = 1e-6);
            }
            other => panic!("unexpected parameters {:?}", other),
        }
        assert_eq!(fitted.n_parameters(), 3);
        let resid = fitted.residuals(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(resid.sum(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn gaussian_null_log_likelihood_matches_closed_form() {
        let y = array![1.0, 2.0, 4.0, 7.0];
        let fitted = fit_null(spec(Family::Gaussian, 0), y.view()).unwrap();
        let n = 4.0;
        let mean = 3.5;
        let sigma2 = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let expected = -0.5 * n * ((2.0 * std::f64::consts::PI * sigma2).ln() + 1.0);
        assert_abs_diff_eq!(fitted.train_log_likelihood(), expected, epsilon = 1e-10);
    }

    #[test]
    fn logistic_null_model_matches_base_rate() {
        let y = array![0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0];
        let fitted = fit_null(spec(Family::Binomial, 2), y.view()).unwrap();
        let empty = Array2::<f64>::zeros((1, 0));
        let mu = fitted.predict_mean(empty.view()).unwrap();
        assert_abs_diff_eq!(mu[0], 5.0 / 8.0, epsilon = 1e-8);
    }

    #[test]
    fn logistic_fit_improves_on_null() {
        let x = array![[-2.0], [-1.5], [-1.0], [-0.5], [0.0], [0.5], [1.0], [1.5], [2.0], [2.5]];
        let y = array![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
        let full = fit(spec(Family::Binomial, 2), x.view(), y.view()).unwrap();
        let null = fit_null(spec(Family::Binomial, 2), y.view()).unwrap();
        assert!(full.train_log_likelihood() > null.train_log_likelihood());
        match full.parameters() {
            GlmParameters::Binomial { beta } => assert!(beta[1] > 0.0),
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn perfectly_separated_logistic_fit_fails_to_converge() {
        let x = array![[-3.0], [-2.0], [-1.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let err = fit(spec(Family::Binomial, 2), x.view(), y.view()).unwrap_err();
        assert!(matches!(
            err,
            FitError::Separation | FitError::ConvergenceFailed { .. }
        ));
    }

    #[test]
    fn poisson_null_rate_is_sample_mean() {
        let y = array![0.0, 2.0, 3.0, 1.0, 4.0];
        let fitted = fit_null(spec(Family::Poisson, 0), y.view()).unwrap();
        let empty = Array2::<f64>::zeros((1, 0));
        assert_abs_diff_eq!(fitted.predict_mean(empty.view()).unwrap()[0], 2.0, epsilon = 1e-8);
    }

    #[test]
    fn poisson_log_likelihood_includes_log_factorials() {
        let y = array![0.0, 2.0, 3.0, 1.0, 4.0];
        let fitted = fit_null(spec(Family::Poisson, 0), y.view()).unwrap();
        // Rate 2: sum(y) ln 2 - n * 2 - ln(0! 2! 3! 1! 4!)
        let expected = 10.0 * 2f64.ln() - 10.0 - 288f64.ln();
        assert_abs_diff_eq!(fitted.train_log_likelihood(), expected, epsilon = 1e-8);
    }

    #[test]
    fn poisson_log_likelihood_handles_very_large_counts() {
        let rate: f64 = 2e8;
        let fitted = FittedGlm {
            spec: spec(Family::Poisson, 0),
            params: GlmParameters::Poisson {
                beta: array![rate.ln()],
            },
            n_predictors: 0,
            n_train: 5,
            iterations: 1,
            train_log_likelihood: 0.0,
        };
        let y = Array1::from_elem(5, rate);
        let empty = Array2::<f64>::zeros((5, 0));
        let ll = fitted.log_likelihood(empty.view(), y.view()).unwrap();
        // Stirling: at y = mu each term is -0.5 ln(2 pi y) - 1 / (12 y).
        let expected = -2.5 * (2.0 * std::f64::consts::PI * rate).ln();
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-3);
    }

    #[test]
    fn missing_training_level_is_a_fit_error() {
        let x = array![[0.1], [0.4], [0.3], [0.9], [0.5]];
        let y = array![0.0, 0.0, 2.0, 2.0, 0.0];
        let err = fit(spec(Family::Multinomial, 3), x.view(), y.view()).unwrap_err();
        assert!(matches!(err, FitError::DegenerateOutcome(_)));
    }

    #[test]
    fn held_out_log_likelihood_uses_training_estimates() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let y = array![0.2, 0.9, 2.1, 2.9, 4.2];
        let fitted = fit(spec(Family::Gaussian, 0), x.view(), y.view()).unwrap();
        let same = fitted.log_likelihood(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(same, fitted.train_log_likelihood(), epsilon = 1e-12);
        let shifted = y.mapv(|v| v + 3.0);
        assert!(fitted.log_likelihood(x.view(), shifted.view()).unwrap() < same);
    }
}
