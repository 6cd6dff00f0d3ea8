//! Run configuration: outcome family, fit measure, threshold semantics and the
//! cross-validation layout.

use serde::{Deserialize, Serialize};

use crate::data::{Dataset, VariableType};
use crate::error::GspcrError;

/// Outcome model family used by the outcome fitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    /// Linear model, continuous outcome.
    Gaussian,
    /// Logistic model, binary outcome.
    Binomial,
    /// Log-linear model, non-negative integer counts.
    Poisson,
    /// Baseline-category logit, nominal outcome.
    Multinomial,
    /// Proportional-odds (cumulative logit), ordinal outcome.
    Cumulative,
}

impl Family {
    /// Default family for an outcome of the given type.
    pub fn infer(y_type: VariableType) -> Family {
        match y_type {
            VariableType::Continuous => Family::Gaussian,
            VariableType::Binary => Family::Binomial,
            VariableType::Nominal { levels: 2 } => Family::Binomial,
            VariableType::Nominal { .. } => Family::Multinomial,
            VariableType::Ordinal { .. } => Family::Cumulative,
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            Family::Binomial | Family::Multinomial | Family::Cumulative
        )
    }

    fn check_outcome(&self, data: &Dataset) -> Result<(), GspcrError> {
        let y_type = data.y_type();
        let ok = match self {
            Family::Gaussian => y_type == VariableType::Continuous,
            Family::Poisson => {
                y_type == VariableType::Continuous
                    && data.y().iter().all(|&v| v >= 0.0 && v.fract() == 0.0)
            }
            Family::Binomial => y_type.n_levels() == Some(2),
            Family::Multinomial => y_type.is_discrete(),
            Family::Cumulative => matches!(
                y_type,
                VariableType::Ordinal { .. } | VariableType::Binary
            ),
        };
        if ok {
            Ok(())
        } else {
            Err(GspcrError::config(format!(
                "family {:?} cannot model an outcome of type {:?}",
                self, y_type
            )))
        }
    }
}

/// Direction in which a fit measure improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    HigherIsBetter,
    LowerIsBetter,
}

impl Orientation {
    /// Maps a raw measure value onto the "higher is better" scale used by the selector.
    pub fn orient(&self, value: f64) -> f64 {
        match self {
            Orientation::HigherIsBetter => value,
            Orientation::LowerIsBetter => -value,
        }
    }
}

/// Fit measure computed for every (fold, threshold, Q) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitMeasure {
    /// Likelihood-ratio statistic against the intercept-only model.
    Lrt,
    /// Cox–Snell pseudo-R².
    PseudoR2,
    /// Mean squared prediction error.
    Mse,
    /// F statistic of the nested linear-model comparison.
    F,
    Aic,
    Bic,
}

impl FitMeasure {
    pub fn orientation(&self) -> Orientation {
        match self {
            FitMeasure::Lrt | FitMeasure::PseudoR2 | FitMeasure::F => Orientation::HigherIsBetter,
            FitMeasure::Mse | FitMeasure::Aic | FitMeasure::Bic => Orientation::LowerIsBetter,
        }
    }

    /// Whether the measure compares against the intercept-only model.
    pub fn needs_null_model(&self) -> bool {
        matches!(self, FitMeasure::Lrt | FitMeasure::PseudoR2 | FitMeasure::F)
    }

    fn check_family(&self, family: Family) -> Result<(), GspcrError> {
        let ok = match self {
            FitMeasure::F => family == Family::Gaussian,
            FitMeasure::Mse => matches!(family, Family::Gaussian | Family::Poisson),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(GspcrError::config(format!(
                "fit measure {:?} is not defined for the {:?} family",
                self, family
            )))
        }
    }
}

/// Scale on which predictors are screened and thresholds are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdType {
    /// Bivariate association statistic in `[0, 1]`.
    Raw,
    /// Association statistic rescaled to a t-like statistic with a median fudge factor.
    Normalized,
    /// Log-likelihood of the univariate outcome model.
    LogLikelihood,
    /// Cox–Snell pseudo-R² of the univariate outcome model.
    PseudoR2,
}

/// Configuration of a cross-validated GSPCR run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GspcrConfig {
    /// Outcome family. `None` infers it from the outcome type.
    pub family: Option<Family>,
    pub fit_measure: FitMeasure,
    pub threshold_type: ThresholdType,
    /// Number of candidate thresholds per fold.
    pub n_thresholds: usize,
    /// Candidate numbers of components, strictly increasing, all >= 1.
    pub components: Vec<usize>,
    /// Number of folds. `1` disables cross-validation.
    pub n_folds: usize,
    /// Thresholds retaining fewer predictors than this are skipped.
    pub min_features: usize,
    /// Thresholds retaining more predictors than this are skipped. `None` means no upper bound.
    pub max_features: Option<usize>,
    /// Whether the solution table carries the one-standard-error row.
    pub one_se: bool,
    /// Seed for fold assignment.
    pub seed: u64,
}

impl Default for GspcrConfig {
    fn default() -> Self {
        GspcrConfig {
            family: None,
            fit_measure: FitMeasure::Bic,
            threshold_type: ThresholdType::Normalized,
            n_thresholds: 10,
            components: vec![1, 2, 3],
            n_folds: 5,
            min_features: 1,
            max_features: None,
            one_se: true,
            seed: 2025,
        }
    }
}

impl GspcrConfig {
    /// Family after inference from the outcome type.
    pub fn resolve_family(&self, data: &Dataset) -> Family {
        self.family.unwrap_or_else(|| Family::infer(data.y_type()))
    }

    pub fn max_components(&self) -> usize {
        self.components.last().copied().unwrap_or(0)
    }

    /// Upper bound on retained predictors for a dataset with `n_predictors` columns.
    pub fn max_features_for(&self, n_predictors: usize) -> usize {
        self.max_features.unwrap_or(n_predictors).min(n_predictors)
    }

    /// Checks the configuration against a dataset before any computation.
    ///
    /// # Errors
    /// Returns [`GspcrError::InvalidConfig`] for structurally impossible settings:
    /// more folds than observations, an empty or unordered component range, a
    /// component count above the number of predictors, an empty feature band, or
    /// a family/measure combination that is not defined for the outcome.
    pub fn validate(&self, data: &Dataset) -> Result<Family, GspcrError> {
        let n = data.n_obs();
        let p = data.n_predictors();

        if self.n_folds == 0 {
            return Err(GspcrError::config("n_folds must be at least 1"));
        }
        if self.n_folds > n {
            return Err(GspcrError::config(format!(
                "n_folds ({}) exceeds the number of observations ({})",
                self.n_folds, n
            )));
        }
        let smallest_training_fold = if self.n_folds == 1 {
            n
        } else {
            n - n.div_ceil(self.n_folds)
        };
        if smallest_training_fold < 3 {
            return Err(GspcrError::config(format!(
                "training folds would hold {} observation(s); at least 3 are required",
                smallest_training_fold
            )));
        }
        if self.n_thresholds < 2 {
            return Err(GspcrError::config("n_thresholds must be at least 2"));
        }
        if self.components.is_empty() {
            return Err(GspcrError::config("component range is empty"));
        }
        if self.components[0] == 0 {
            return Err(GspcrError::config("component counts must be at least 1"));
        }
        if self.components.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GspcrError::config(
                "component range must be strictly increasing",
            ));
        }
        if self.max_components() > p {
            return Err(GspcrError::config(format!(
                "largest component count ({}) exceeds the number of predictors ({})",
                self.max_components(),
                p
            )));
        }
        if self.min_features == 0 {
            return Err(GspcrError::config("min_features must be at least 1"));
        }
        if self.min_features > self.max_features_for(p) {
            return Err(GspcrError::config(format!(
                "min_features ({}) exceeds max_features ({})",
                self.min_features,
                self.max_features_for(p)
            )));
        }

        let family = self.resolve_family(data);
        family.check_outcome(data)?;
        self.fit_measure.check_family(family)?;
        Ok(family)
    }
}
