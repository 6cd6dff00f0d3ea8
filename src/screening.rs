//! Univariate screening of predictors against the outcome.
//!
//! The statistic is chosen from a table keyed by the measurement scales of the
//! outcome and the predictor:
//!
//! | outcome \ predictor | continuous          | discrete            |
//! |---------------------|---------------------|---------------------|
//! | continuous          | \|Pearson r\|       | correlation ratio η |
//! | discrete            | correlation ratio η | Cramér's V          |
//!
//! All three coincide with |r| for a binary/continuous pair, so the scores of
//! mixed-type predictors live on one `[0, 1]` scale. Columns that carry no
//! information (constant, single observed level) get [`EXCLUDED`], which no
//! threshold retains.

use log::debug;
use ndarray::{Array1, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::config::ThresholdType;
use crate::data::{design_block, level_counts, level_of, Dataset, VariableType};
use crate::glm::{self, OutcomeSpec};

/// Score of a predictor that must never pass a threshold.
pub const EXCLUDED: f64 = f64::NEG_INFINITY;

/// One association score per predictor column, in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    values: Array1<f64>,
    n_obs: usize,
    threshold_type: ThresholdType,
}

impl ScoreVector {
    pub fn new(values: Array1<f64>, n_obs: usize, threshold_type: ThresholdType) -> Self {
        ScoreVector {
            values,
            n_obs,
            threshold_type,
        }
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    /// Number of observations the scores were computed on.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn threshold_type(&self) -> ThresholdType {
        self.threshold_type
    }

    /// Scores of columns that are eligible for retention.
    pub fn finite_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|v| v.is_finite())
    }

    /// Column indices whose score is at least `threshold`.
    pub fn retained(&self, threshold: f64) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s.is_finite() && s >= threshold)
            .map(|(j, _)| j)
            .collect()
    }
}

/// Scores every predictor of `data` against its outcome.
///
/// Columns are scored independently and in parallel.
pub fn screen(data: &Dataset, spec: OutcomeSpec, threshold_type: ThresholdType) -> ScoreVector {
    let y = data.y();
    let y_scale = Scale::of(data.y_type());
    let x = data.x();
    let x_types = data.x_types();

    let values: Vec<f64> = match threshold_type {
        ThresholdType::Raw | ThresholdType::Normalized => {
            let raw: Vec<f64> = (0..x.ncols())
                .into_par_iter()
                .map(|j| {
                    let statistic = association_for(y_scale, Scale::of(x_types[j]));
                    statistic(y, y_scale, x.column(j), Scale::of(x_types[j])).unwrap_or(EXCLUDED)
                })
                .collect();
            if threshold_type == ThresholdType::Normalized {
                normalize(&raw, data.n_obs())
            } else {
                raw
            }
        }
        ThresholdType::LogLikelihood | ThresholdType::PseudoR2 => {
            univariate_model_scores(data, spec, threshold_type)
        }
    };

    let scores = ScoreVector::new(Array1::from(values), data.n_obs(), threshold_type);
    debug!(
        "Screened {} predictors on {} rows ({:?}): {} eligible",
        x.ncols(),
        data.n_obs(),
        threshold_type,
        scores.finite_values().count()
    );
    scores
}

/// Measurement scale used by the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Continuous,
    Discrete(usize),
}

impl Scale {
    fn of(t: VariableType) -> Scale {
        match t.n_levels() {
            Some(levels) => Scale::Discrete(levels),
            None => Scale::Continuous,
        }
    }
}

type AssociationFn = fn(ArrayView1<f64>, Scale, ArrayView1<f64>, Scale) -> Option<f64>;

fn association_for(outcome: Scale, predictor: Scale) -> AssociationFn {
    match (outcome, predictor) {
        (Scale::Continuous, Scale::Continuous) => linear_association,
        (Scale::Continuous, Scale::Discrete(_)) | (Scale::Discrete(_), Scale::Continuous) => {
            anova_association
        }
        (Scale::Discrete(_), Scale::Discrete(_)) => categorical_association,
    }
}

fn linear_association(y: ArrayView1<f64>, _: Scale, x: ArrayView1<f64>, _: Scale) -> Option<f64> {
    pearson_correlation(y, x).map(f64::abs)
}

fn anova_association(y: ArrayView1<f64>, y_scale: Scale, x: ArrayView1<f64>, x_scale: Scale) -> Option<f64> {
    match (y_scale, x_scale) {
        (Scale::Discrete(levels), _) => correlation_ratio(y, levels, x),
        (_, Scale::Discrete(levels)) => correlation_ratio(x, levels, y),
        _ => None,
    }
}

fn categorical_association(y: ArrayView1<f64>, y_scale: Scale, x: ArrayView1<f64>, x_scale: Scale) -> Option<f64> {
    match (y_scale, x_scale) {
        (Scale::Discrete(ly), Scale::Discrete(lx)) => cramers_v(y, ly, x, lx),
        _ => None,
    }
}

/// Pearson correlation; `None` when either variable is constant.
pub(crate) fn pearson_correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let n = a.len() as f64;
    if n < 2.0 {
        return None;
    }
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&va, &vb) in a.iter().zip(b.iter()) {
        let da = va - mean_a;
        let db = vb - mean_b;
        sab += da * db;
        saa += da * da;
        sbb += db * db;
    }
    if negligible(saa, a) || negligible(sbb, b) {
        return None;
    }
    Some((sab / (saa.sqrt() * sbb.sqrt())).clamp(-1.0, 1.0))
}

/// Whether a centred sum of squares is rounding noise relative to the raw one.
fn negligible(centred_ss: f64, values: ArrayView1<f64>) -> bool {
    let raw_ss: f64 = values.iter().map(|v| v * v).sum();
    centred_ss <= 1e-12 * raw_ss
}

/// Correlation ratio η = sqrt(SS_between / SS_total) of `values` grouped by the
/// discrete `groups`. Equivalent to the one-way ANOVA effect size.
pub(crate) fn correlation_ratio(groups: ArrayView1<f64>, levels: usize, values: ArrayView1<f64>) -> Option<f64> {
    let n = values.len() as f64;
    let grand_mean = values.sum() / n;
    let mut sums = vec![0.0; levels];
    let counts = level_counts(groups, levels);
    if counts.iter().filter(|&&c| c > 0).count() < 2 {
        return None;
    }
    for (&g, &v) in groups.iter().zip(values.iter()) {
        sums[level_of(g)] += v;
    }
    let ss_total: f64 = values.iter().map(|&v| (v - grand_mean).powi(2)).sum();
    if negligible(ss_total, values) {
        return None;
    }
    let ss_between: f64 = sums
        .iter()
        .zip(counts.iter())
        .filter(|&(_, &c)| c > 0)
        .map(|(&s, &c)| c as f64 * (s / c as f64 - grand_mean).powi(2))
        .sum();
    Some((ss_between / ss_total).clamp(0.0, 1.0).sqrt())
}

/// Cramér's V from the Pearson χ² statistic of the contingency table.
/// Empty rows and columns are dropped before computing the degrees of freedom.
pub(crate) fn cramers_v(a: ArrayView1<f64>, levels_a: usize, b: ArrayView1<f64>, levels_b: usize) -> Option<f64> {
    let n = a.len() as f64;
    let mut table = vec![vec![0.0; levels_b]; levels_a];
    for (&va, &vb) in a.iter().zip(b.iter()) {
        table[level_of(va)][level_of(vb)] += 1.0;
    }
    let row_totals: Vec<f64> = table.iter().map(|r| r.iter().sum()).collect();
    let col_totals: Vec<f64> = (0..levels_b).map(|c| table.iter().map(|r| r[c]).sum()).collect();
    let r = row_totals.iter().filter(|&&t| t > 0.0).count();
    let c = col_totals.iter().filter(|&&t| t > 0.0).count();
    if r < 2 || c < 2 {
        return None;
    }
    let mut chi2 = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_totals[i] * col_totals[j] / n;
            if expected > 0.0 {
                chi2 += (observed - expected).powi(2) / expected;
            }
        }
    }
    let k = (r.min(c) - 1) as f64;
    Some((chi2 / (n * k)).clamp(0.0, 1.0).sqrt())
}

/// Rescales association statistics `e` to `e / (d + s0)` with
/// `d = sqrt((1 - e²) / (n - 2))` and `s0` the median of `d`. For a continuous
/// pair this is the slope t-statistic stabilised by a median fudge factor.
/// The map is increasing in `e`, so the ranking of predictors is unchanged.
pub fn normalize(raw: &[f64], n_obs: usize) -> Vec<f64> {
    let dof = (n_obs as f64 - 2.0).max(1.0);
    let spread = |e: f64| ((1.0 - e * e).max(0.0) / dof).sqrt();
    let spreads: Vec<f64> = raw.iter().filter(|v| v.is_finite()).map(|&e| spread(e)).collect();
    if spreads.is_empty() {
        return raw.to_vec();
    }
    let s0 = Data::new(spreads).median().max(f64::EPSILON);
    raw.iter()
        .map(|&e| if e.is_finite() { e / (spread(e) + s0) } else { EXCLUDED })
        .collect()
}

/// Log-likelihood or Cox–Snell pseudo-R² of `y ~ x_j` for every column.
fn univariate_model_scores(data: &Dataset, spec: OutcomeSpec, threshold_type: ThresholdType) -> Vec<f64> {
    let y = data.y();
    let n = data.n_obs() as f64;
    let null_ll = match glm::fit_null(spec, y) {
        Ok(null) => null.train_log_likelihood(),
        Err(e) => {
            debug!("Null model failed during screening ({}); all predictors excluded", e);
            return vec![EXCLUDED; data.n_predictors()];
        }
    };
    let x = data.x();
    let x_types = data.x_types();
    (0..x.ncols())
        .into_par_iter()
        .map(|j| {
            let column = x.column(j);
            if !is_informative(column, x_types[j]) {
                return EXCLUDED;
            }
            let design = design_block(column, x_types[j]);
            match glm::fit(spec, design.view(), y) {
                Ok(model) => {
                    let ll = model.train_log_likelihood();
                    match threshold_type {
                        ThresholdType::PseudoR2 => 1.0 - (-2.0 / n * (ll - null_ll)).exp(),
                        _ => ll,
                    }
                }
                Err(_) => EXCLUDED,
            }
        })
        .collect()
}

fn is_informative(column: ArrayView1<f64>, column_type: VariableType) -> bool {
    match column_type.n_levels() {
        Some(levels) => level_counts(column, levels).iter().filter(|&&c| c > 0).count() >= 2,
        None => {
            let first = column[0];
            column.iter().any(|&v| v != first)
        }
    }
}

/// Column-wise helper for callers that need the bare association statistic.
pub fn association(data: &Dataset, column: usize) -> Option<f64> {
    let y_scale = Scale::of(data.y_type());
    let x_scale = Scale::of(data.x_types()[column]);
    association_for(y_scale, x_scale)(data.y(), y_scale, data.x().index_axis(Axis(1), column), x_scale)
}
