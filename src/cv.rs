//! Cross-validated search over inclusion thresholds and component counts.
//!
//! For every fold the predictors are screened on the training rows, a
//! threshold grid is laid over the training scores, and for each threshold the
//! retained predictors are reduced to principal components. Outcome models on
//! the first Q components are fitted on the training rows and scored on the
//! held-out rows. Fold preparation and the (fold, threshold) tasks run on the
//! rayon pool; their cell outcomes are written into the results cube once all
//! tasks have finished.

use std::time::Instant;

use log::{debug, info, trace, warn};
use ndarray::{s, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Family, FitMeasure, GspcrConfig, ThresholdType};
use crate::data::{Dataset, VariableType};
use crate::error::{FitError, GspcrError};
use crate::folds::{make_folds, FoldAssignment};
use crate::glm::{self, FittedGlm, OutcomeSpec};
use crate::measures;
use crate::pca::{ComponentExtractor, MixedPca};
use crate::results::{CellCounts, CellStatus, ResultsCube, SolutionSurface};
use crate::screening::screen;
use crate::selection::{select, SolutionTable};
use crate::thresholds::ThresholdGrid;

/// Outcome of a cross-validated GSPCR run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvSolution {
    family: Family,
    fit_measure: FitMeasure,
    threshold_type: ThresholdType,
    components: Vec<usize>,
    folds: FoldAssignment,
    thresholds: ThresholdGrid,
    fold_thresholds: Vec<Option<ThresholdGrid>>,
    cube: ResultsCube,
    surface: SolutionSurface,
    table: SolutionTable,
}

impl CvSolution {
    pub fn family(&self) -> Family {
        self.family
    }

    pub fn fit_measure(&self) -> FitMeasure {
        self.fit_measure
    }

    pub fn threshold_type(&self) -> ThresholdType {
        self.threshold_type
    }

    /// Candidate component counts (columns of the surface).
    pub fn components(&self) -> &[usize] {
        &self.components
    }

    pub fn folds(&self) -> &FoldAssignment {
        &self.folds
    }

    /// Threshold grid computed on the full data; the reported threshold values.
    pub fn thresholds(&self) -> &ThresholdGrid {
        &self.thresholds
    }

    /// Grid used inside each fold, `None` where the fold's scores were degenerate.
    pub fn fold_thresholds(&self) -> &[Option<ThresholdGrid>] {
        &self.fold_thresholds
    }

    pub fn cube(&self) -> &ResultsCube {
        &self.cube
    }

    pub fn surface(&self) -> &SolutionSurface {
        &self.surface
    }

    pub fn table(&self) -> &SolutionTable {
        &self.table
    }

    pub fn cell_counts(&self) -> CellCounts {
        self.cube.counts()
    }
}

/// Runs cross-validated GSPCR with the default mixed-data PCA extractor.
///
/// # Errors
/// Configuration problems are reported before any fold is evaluated. This
/// includes a full dataset whose scores cannot span a threshold grid (a single
/// predictor, or all finite scores tied). [`GspcrError::NoValidSolution`] is
/// returned when every cell is undefined.
pub fn cv_gspcr(data: &Dataset, config: &GspcrConfig) -> Result<CvSolution, GspcrError> {
    cv_gspcr_with(data, config, &MixedPca::default())
}

/// Runs cross-validated GSPCR with a caller-supplied component extractor.
pub fn cv_gspcr_with(
    data: &Dataset,
    config: &GspcrConfig,
    extractor: &dyn ComponentExtractor,
) -> Result<CvSolution, GspcrError> {
    let family = config.validate(data)?;
    let spec = OutcomeSpec::new(family, data.y_type());
    let folds = make_folds(data.n_obs(), config.n_folds, config.seed)?;

    info!(
        "GSPCR: {} observations, {} predictors, family={:?}, measure={:?}, thresholds={} ({:?}), Q={:?}, folds={}",
        data.n_obs(),
        data.n_predictors(),
        family,
        config.fit_measure,
        config.n_thresholds,
        config.threshold_type,
        config.components,
        folds.n_folds()
    );
    if folds.is_no_cv() {
        warn!("Single fold: fit measures are evaluated on the training data");
    }
    let start = Instant::now();

    let full_scores = screen(data, spec, config.threshold_type);
    let thresholds = ThresholdGrid::build(&full_scores, config.n_thresholds).map_err(|e| match e {
        GspcrError::DegenerateGrid => GspcrError::config(format!(
            "the {} predictor(s) do not yield two distinct {:?} scores, so no threshold grid exists",
            data.n_predictors(),
            config.threshold_type
        )),
        other => other,
    })?;

    let run = FoldRun {
        data,
        config,
        spec,
        extractor,
        max_features: config.max_features_for(data.n_predictors()),
    };
    let fold_results: Vec<FoldResult> = (0..folds.n_folds())
        .into_par_iter()
        .map(|fold| run.evaluate(&folds, fold))
        .collect();

    let mut cube = ResultsCube::new(folds.n_folds(), config.n_thresholds, config.components.len());
    let mut fold_thresholds = Vec::with_capacity(fold_results.len());
    for result in fold_results {
        for (t, cells) in result.cells.iter().enumerate() {
            for (q, cell) in cells.iter().enumerate() {
                match *cell {
                    Cell::Scored(value) => cube.record_score(result.fold, t, q, value),
                    Cell::Skipped => cube.record(result.fold, t, q, CellStatus::Skipped),
                    Cell::Failed => cube.record(result.fold, t, q, CellStatus::Failed),
                }
            }
        }
        fold_thresholds.push(result.grid);
    }

    let counts = cube.counts();
    if counts.failed > 0 {
        warn!("{} of {} cells failed to fit", counts.failed, cube.values().len());
    }
    let surface = cube.aggregate(thresholds.values(), &config.components);
    let table = select(&surface, config.fit_measure.orientation(), config.one_se)?;

    info!(
        "GSPCR finished in {:.2?}: {} scored, {} skipped, {} failed cells; standard solution threshold={:.4} Q={}",
        start.elapsed(),
        counts.scored,
        counts.skipped,
        counts.failed,
        table.standard.threshold_value,
        table.standard.n_components
    );

    Ok(CvSolution {
        family,
        fit_measure: config.fit_measure,
        threshold_type: config.threshold_type,
        components: config.components.clone(),
        folds,
        thresholds,
        fold_thresholds,
        cube,
        surface,
        table,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell {
    Scored(f64),
    Skipped,
    Failed,
}

struct FoldResult {
    fold: usize,
    grid: Option<ThresholdGrid>,
    /// Indexed by (threshold, Q).
    cells: Vec<Vec<Cell>>,
}

/// Shared, read-only state of one run.
struct FoldRun<'a> {
    data: &'a Dataset,
    config: &'a GspcrConfig,
    spec: OutcomeSpec,
    extractor: &'a dyn ComponentExtractor,
    max_features: usize,
}

/// Training and test rows of one fold.
struct FoldData<'a> {
    train: &'a Dataset,
    test: &'a Dataset,
    null_model: Option<&'a FittedGlm>,
}

impl FoldRun<'_> {
    fn uniform(&self, fold: usize, grid: Option<ThresholdGrid>, cell: Cell) -> FoldResult {
        FoldResult {
            fold,
            grid,
            cells: vec![vec![cell; self.config.components.len()]; self.config.n_thresholds],
        }
    }

    fn evaluate(&self, folds: &FoldAssignment, fold: usize) -> FoldResult {
        let train = self.data.select_rows(&folds.train_indices(fold));
        let test = self.data.select_rows(&folds.test_indices(fold));

        let scores = screen(&train, self.spec, self.config.threshold_type);
        let grid = match ThresholdGrid::build(&scores, self.config.n_thresholds) {
            Ok(grid) => grid,
            Err(e) => {
                warn!("Fold {}: {}; skipping fold", fold, e);
                return self.uniform(fold, None, Cell::Skipped);
            }
        };

        let null_model = if self.config.fit_measure.needs_null_model() {
            match glm::fit_null(self.spec, train.y()) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!("Fold {}: intercept-only model failed: {}", fold, e);
                    return self.uniform(fold, Some(grid), Cell::Failed);
                }
            }
        } else {
            None
        };

        let fold_data = FoldData {
            train: &train,
            test: &test,
            null_model: null_model.as_ref(),
        };
        let cells: Vec<Vec<Cell>> = grid
            .values()
            .to_vec()
            .into_par_iter()
            .enumerate()
            .map(|(t, threshold)| self.evaluate_threshold(&fold_data, &scores.retained(threshold), fold, t))
            .collect();

        let n_scored: usize = cells.iter().flatten().filter(|c| matches!(c, Cell::Scored(_))).count();
        debug!(
            "Fold {}: {} training / {} test rows, grid [{:.4}, {:.4}], {} cells scored",
            fold,
            train.n_obs(),
            test.n_obs(),
            grid.values()[0],
            grid.values()[grid.len() - 1],
            n_scored
        );
        FoldResult {
            fold,
            grid: Some(grid),
            cells,
        }
    }

    fn evaluate_threshold(&self, fold_data: &FoldData<'_>, retained: &[usize], fold: usize, t: usize) -> Vec<Cell> {
        let n_q = self.config.components.len();
        if retained.len() < self.config.min_features || retained.len() > self.max_features {
            trace!(
                "Fold {} threshold {}: {} predictors retained, outside [{}, {}]",
                fold,
                t,
                retained.len(),
                self.config.min_features,
                self.max_features
            );
            return vec![Cell::Skipped; n_q];
        }

        let train_x = fold_data.train.x().select(Axis(1), retained);
        let test_x = fold_data.test.x().select(Axis(1), retained);
        let types: Vec<VariableType> = retained.iter().map(|&j| fold_data.train.x_types()[j]).collect();
        let max_components = self.config.max_components().min(retained.len());

        let projection = match self.extractor.extract(train_x.view(), max_components, &types) {
            Ok(projection) => projection,
            Err(e) => {
                warn!("Fold {} threshold {}: extraction failed: {}", fold, t, e);
                return vec![Cell::Failed; n_q];
            }
        };
        let test_scores = match projection.project(test_x.view()) {
            Ok(scores) => scores,
            Err(e) => {
                warn!("Fold {} threshold {}: projection failed: {}", fold, t, e);
                return vec![Cell::Failed; n_q];
            }
        };
        let train_scores = projection.scores();
        let available = projection.n_components().min(test_scores.ncols());

        self.config
            .components
            .iter()
            .map(|&q| {
                if q > available {
                    return Cell::Skipped;
                }
                let train_pcs = train_scores.slice(s![.., ..q]);
                let test_pcs = test_scores.slice(s![.., ..q]);
                match self.score_cell(fold_data, train_pcs, test_pcs) {
                    Ok(value) => {
                        trace!("Fold {} threshold {} Q={}: {:.6}", fold, t, q, value);
                        Cell::Scored(value)
                    }
                    Err(e) => {
                        debug!("Fold {} threshold {} Q={}: {}", fold, t, q, e);
                        Cell::Failed
                    }
                }
            })
            .collect()
    }

    fn score_cell(
        &self,
        fold_data: &FoldData<'_>,
        train_pcs: ArrayView2<f64>,
        test_pcs: ArrayView2<f64>,
    ) -> Result<f64, FitError> {
        let model = glm::fit(self.spec, train_pcs, fold_data.train.y())?;
        measures::score(
            self.config.fit_measure,
            &model,
            fold_data.null_model,
            test_pcs,
            fold_data.test.y(),
        )
    }
}
