//! Final GSPCR model estimated on the full data at a chosen (threshold, Q).

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{GspcrConfig, ThresholdType};
use crate::cv::CvSolution;
use crate::data::{Dataset, VariableType};
use crate::error::GspcrError;
use crate::glm::{self, FittedGlm, OutcomeSpec, Prediction};
use crate::pca::{ComponentProjection, MixedPca, MixedPcaModel};
use crate::screening::screen;
use crate::selection::SelectionRule;

/// Screening, projection and outcome model of a selected GSPCR solution.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GspcrModel {
    spec: OutcomeSpec,
    threshold_type: ThresholdType,
    threshold_value: f64,
    n_predictors: usize,
    /// Indices of the predictors passing the threshold on the full data.
    retained: Vec<usize>,
    retained_types: Vec<VariableType>,
    projection: MixedPcaModel,
    outcome_model: FittedGlm,
}

impl GspcrModel {
    /// Screens all predictors of `data`, keeps those scoring at least
    /// `threshold_value`, extracts `n_components` components and fits the
    /// outcome model on them.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid for `data`, no predictor
    /// passes the threshold, fewer than `n_components` components can be
    /// extracted, or the outcome model fails to fit.
    pub fn fit(
        data: &Dataset,
        config: &GspcrConfig,
        threshold_value: f64,
        n_components: usize,
    ) -> Result<Self, GspcrError> {
        let family = config.validate(data)?;
        if n_components == 0 {
            return Err(GspcrError::config("n_components must be at least 1"));
        }
        let spec = OutcomeSpec::new(family, data.y_type());
        let scores = screen(data, spec, config.threshold_type);
        let retained = scores.retained(threshold_value);
        if retained.len() < n_components {
            return Err(GspcrError::config(format!(
                "threshold {:.4} retains {} predictor(s), fewer than {} component(s)",
                threshold_value,
                retained.len(),
                n_components
            )));
        }
        let retained_types: Vec<VariableType> = retained.iter().map(|&j| data.x_types()[j]).collect();
        let x_retained = data.x().select(Axis(1), &retained);

        let mut projection = MixedPca::default().fit(x_retained.view(), n_components, &retained_types)?;
        if projection.n_components() < n_components {
            return Err(GspcrError::Extraction(format!(
                "only {} component(s) available, {} requested",
                projection.n_components(),
                n_components
            )));
        }
        projection.truncate(n_components);
        let outcome_model = glm::fit(spec, projection.scores(), data.y())?;

        info!(
            "Fitted GSPCR model: {} of {} predictors at threshold {:.4}, {} component(s), logLik={:.4}",
            retained.len(),
            data.n_predictors(),
            threshold_value,
            n_components,
            outcome_model.train_log_likelihood()
        );

        Ok(GspcrModel {
            spec,
            threshold_type: config.threshold_type,
            threshold_value,
            n_predictors: data.n_predictors(),
            retained,
            retained_types,
            projection,
            outcome_model,
        })
    }

    /// Fits the model at the cell chosen by `rule` in a cross-validated solution.
    ///
    /// # Errors
    /// Returns [`GspcrError::InvalidConfig`] if the solution carries no row for
    /// `rule`, plus the errors of [`GspcrModel::fit`].
    pub fn from_solution(
        data: &Dataset,
        config: &GspcrConfig,
        solution: &CvSolution,
        rule: SelectionRule,
    ) -> Result<Self, GspcrError> {
        let row = solution
            .table()
            .get(rule)
            .ok_or_else(|| GspcrError::config(format!("solution has no {:?} row", rule)))?;
        Self::fit(data, config, row.threshold_value, row.n_components)
    }

    /// Predicted means or class probabilities for new rows with all original predictors.
    ///
    /// # Errors
    /// Returns an error if `x` does not have the training number of columns.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Prediction, GspcrError> {
        let pcs = self.components(x)?;
        Ok(self.outcome_model.predict(pcs.view())?)
    }

    /// Component scores of new rows.
    pub fn components(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, GspcrError> {
        if x.ncols() != self.n_predictors {
            return Err(GspcrError::InvalidData(format!(
                "model was fitted on {} predictors, input has {}",
                self.n_predictors,
                x.ncols()
            )));
        }
        let x_retained = x.select(Axis(1), &self.retained);
        self.projection.transform(x_retained.view())
    }

    pub fn spec(&self) -> OutcomeSpec {
        self.spec
    }

    pub fn threshold_type(&self) -> ThresholdType {
        self.threshold_type
    }

    pub fn threshold_value(&self) -> f64 {
        self.threshold_value
    }

    pub fn retained(&self) -> &[usize] {
        &self.retained
    }

    pub fn n_components(&self) -> usize {
        self.projection.rotation().ncols()
    }

    pub fn projection(&self) -> &MixedPcaModel {
        &self.projection
    }

    pub fn outcome_model(&self) -> &FittedGlm {
        &self.outcome_model
    }

    /// Saves the model to `path` with bincode.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or serialization fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), GspcrError> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| GspcrError::Serialization(format!("failed to serialize GSPCR model: {}", e)))?;
        Ok(())
    }

    /// Loads a model previously written by [`GspcrModel::save_model`].
    ///
    /// # Errors
    /// Returns an error if file I/O or deserialization fails, or if the loaded
    /// model is internally inconsistent.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, GspcrError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let model: GspcrModel = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| GspcrError::Serialization(format!("failed to deserialize GSPCR model: {}", e)))?;

        if model.retained.len() != model.retained_types.len()
            || model.retained.len() != model.projection.n_input_columns()
            || model.retained.iter().any(|&j| j >= model.n_predictors)
        {
            return Err(GspcrError::Serialization(
                "loaded model has inconsistent predictor indices".to_string(),
            ));
        }
        if model.outcome_model.n_predictors() != model.n_components() {
            return Err(GspcrError::Serialization(format!(
                "loaded outcome model expects {} component(s) but the projection has {}",
                model.outcome_model.n_predictors(),
                model.n_components()
            )));
        }
        if model.projection.scale().iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(GspcrError::Serialization(
                "loaded projection contains non-positive scale factors".to_string(),
            ));
        }
        Ok(model)
    }
}
