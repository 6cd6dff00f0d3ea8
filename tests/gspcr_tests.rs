use approx::assert_abs_diff_eq;
use gspcr::glm::{self, OutcomeSpec};
use gspcr::measures;
use gspcr::screening::screen;
use gspcr::thresholds::ThresholdGrid;
use gspcr::{
    cv_gspcr, cv_gspcr_with, CellStatus, ComponentExtractor, ComponentProjection, Dataset, Family,
    FitMeasure, GspcrConfig, GspcrError, GspcrModel, MixedPca, Prediction, SelectionRule,
    ThresholdType, VariableType,
};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// One latent factor `z`; the first `n_signal` predictors are noisy copies of it,
/// the rest are pure noise. Returns `(z, x)`.
fn latent_block(n: usize, p: usize, n_signal: usize, seed: u64) -> (Array1<f64>, Array2<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let z = Array1::from_shape_fn(n, |_| normal.sample(&mut rng));
    let x = Array2::from_shape_fn((n, p), |(i, j)| {
        let noise = normal.sample(&mut rng);
        if j < n_signal {
            z[i] + 0.6 * noise
        } else {
            noise
        }
    });
    (z, x)
}

fn gaussian_data(n: usize, p: usize, seed: u64) -> Dataset {
    let (z, x) = latent_block(n, p, 4, seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed + 1000);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let y = z.mapv(|v| 1.5 * v + normal.sample(&mut rng));
    Dataset::continuous(y, x).unwrap()
}

fn config(measure: FitMeasure, n_folds: usize) -> GspcrConfig {
    GspcrConfig {
        fit_measure: measure,
        n_thresholds: 8,
        components: vec![1, 2, 3],
        n_folds,
        ..GspcrConfig::default()
    }
}

fn same_bits(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits()
}

#[test]
fn repeated_runs_are_identical() {
    let data = gaussian_data(90, 10, 1);
    let cfg = config(FitMeasure::Bic, 5);
    let a = cv_gspcr(&data, &cfg).unwrap();
    let b = cv_gspcr(&data, &cfg).unwrap();

    assert_eq!(a.cube().status(), b.cube().status());
    assert!(a
        .cube()
        .values()
        .iter()
        .zip(b.cube().values().iter())
        .all(|(&x, &y)| same_bits(x, y)));
    assert_eq!(a.table(), b.table());
    assert_eq!(a.folds(), b.folds());
}

#[test]
fn different_seeds_change_the_folds() {
    let data = gaussian_data(90, 10, 1);
    let mut cfg = config(FitMeasure::Bic, 5);
    let a = cv_gspcr(&data, &cfg).unwrap();
    cfg.seed += 1;
    let b = cv_gspcr(&data, &cfg).unwrap();
    assert_ne!(a.folds().fold_of(), b.folds().fold_of());
}

#[test]
fn single_fold_matches_a_direct_full_data_fit() {
    let data = gaussian_data(80, 8, 2);
    let cfg = config(FitMeasure::Lrt, 1);
    let solution = cv_gspcr(&data, &cfg).unwrap();
    assert_eq!(solution.cube().dim().0, 1);

    let spec = OutcomeSpec::new(Family::Gaussian, VariableType::Continuous);
    let scores = screen(&data, spec, ThresholdType::Normalized);
    let grid = ThresholdGrid::build(&scores, cfg.n_thresholds).unwrap();
    assert_eq!(&grid, solution.thresholds());

    let t = 2;
    let retained = scores.retained(grid.get(t).unwrap());
    let x = data.x().select(Axis(1), &retained);
    let types = vec![VariableType::Continuous; retained.len()];
    let pca = MixedPca::default().fit(x.view(), 3, &types).unwrap();
    let null = glm::fit_null(spec, data.y()).unwrap();

    for (qi, &q) in cfg.components.iter().enumerate() {
        if q > pca.n_components() {
            assert_eq!(solution.cube().status()[(0, t, qi)], CellStatus::Skipped);
            continue;
        }
        let pcs = pca.scores().slice(s![.., ..q]).to_owned();
        let full = glm::fit(spec, pcs.view(), data.y()).unwrap();
        let expected = measures::score(FitMeasure::Lrt, &full, Some(&null), pcs.view(), data.y()).unwrap();
        let cell = solution.cube().get(0, t, qi).unwrap();
        assert_abs_diff_eq!(cell, expected, epsilon = 1e-8);
        assert_eq!(solution.surface().standard_error()[(t, qi)], 0.0);
    }
}

#[test]
fn in_sample_fit_never_worsens_with_more_components() {
    let data = gaussian_data(100, 10, 3);
    for measure in [FitMeasure::Lrt, FitMeasure::PseudoR2, FitMeasure::Mse] {
        let solution = cv_gspcr(&data, &config(measure, 1)).unwrap();
        let orientation = measure.orientation();
        let mean = solution.surface().mean();
        for row in mean.rows() {
            let defined: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
            for pair in defined.windows(2) {
                assert!(
                    orientation.orient(pair[1]) >= orientation.orient(pair[0]) - 1e-9,
                    "{:?}: {:?}",
                    measure,
                    row
                );
            }
        }
    }
}

#[test]
fn without_held_out_data_only_penalized_measures_prefer_fewer_components() {
    // One latent signal in 7 of 30 predictors: components beyond the first are
    // noise with respect to the outcome.
    let (z, x) = latent_block(150, 30, 7, 12);
    let mut rng = ChaCha8Rng::seed_from_u64(1012);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let y = z.mapv(|v| 1.5 * v + normal.sample(&mut rng));
    let data = Dataset::continuous(y, x).unwrap();

    // Every evaluated threshold keeps at least 20 predictors, so Q = 20 is always available.
    let no_cv = |measure| GspcrConfig {
        fit_measure: measure,
        n_thresholds: 10,
        components: (1..=20).collect(),
        n_folds: 1,
        min_features: 20,
        ..GspcrConfig::default()
    };
    for measure in [FitMeasure::Lrt, FitMeasure::PseudoR2, FitMeasure::Mse] {
        let solution = cv_gspcr(&data, &no_cv(measure)).unwrap();
        assert_eq!(solution.table().standard.n_components, 20, "{:?}", measure);
    }
    for measure in [FitMeasure::Aic, FitMeasure::Bic, FitMeasure::F] {
        let solution = cv_gspcr(&data, &no_cv(measure)).unwrap();
        assert!(solution.table().standard.n_components < 20, "{:?}", measure);
    }
}

#[test]
fn one_se_never_uses_more_components_than_standard() {
    for seed in 10..14 {
        let data = gaussian_data(90, 12, seed);
        let solution = cv_gspcr(&data, &config(FitMeasure::Bic, 5)).unwrap();
        let table = solution.table();
        let one_se = table.one_se.unwrap();
        assert!(one_se.n_components <= table.standard.n_components);

        // Within one standard error of the best cell.
        let orientation = FitMeasure::Bic.orientation();
        let best = orientation.orient(table.standard.mean);
        assert!(orientation.orient(one_se.mean) >= best - table.standard.standard_error - 1e-9);
    }
}

#[test]
fn reported_solution_is_the_best_defined_cell() {
    let data = gaussian_data(90, 10, 4);
    let solution = cv_gspcr(&data, &config(FitMeasure::Aic, 3)).unwrap();
    let surface = solution.surface();
    let orientation = FitMeasure::Aic.orientation();
    let best = surface
        .mean()
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| orientation.orient(v))
        .fold(f64::NEG_INFINITY, f64::max);
    let standard = solution.table().standard;
    assert_abs_diff_eq!(orientation.orient(standard.mean), best, epsilon = 1e-12);
    let thresholds = solution.thresholds();
    assert_eq!(standard.threshold_value, thresholds.get(standard.threshold_index).unwrap());
}

/// Mixed PCA that fails on one particular training block size and width.
struct FailingExtractor {
    rows: usize,
    cols: usize,
}

impl ComponentExtractor for FailingExtractor {
    fn extract(
        &self,
        x: ArrayView2<f64>,
        max_components: usize,
        column_types: &[VariableType],
    ) -> Result<Box<dyn ComponentProjection>, GspcrError> {
        if x.nrows() == self.rows && x.ncols() == self.cols {
            return Err(GspcrError::Extraction("injected failure".to_string()));
        }
        MixedPca::default().extract(x, max_components, column_types)
    }
}

#[test]
fn a_failure_in_one_fold_makes_the_cell_undefined() {
    // 101 rows in 5 folds: fold 0 holds 21 rows, so only its training block has 80 rows.
    let data = gaussian_data(101, 10, 5);
    let cfg = config(FitMeasure::Bic, 5);
    let extractor = FailingExtractor { rows: 80, cols: 10 };
    let solution = cv_gspcr_with(&data, &cfg, &extractor).unwrap();

    assert_eq!(solution.folds().fold_sizes()[0], 21);
    for q in 0..cfg.components.len() {
        assert_eq!(solution.cube().status()[(0, 0, q)], CellStatus::Failed);
        assert_eq!(solution.cube().status()[(1, 0, q)], CellStatus::Scored);
        assert!(!solution.surface().is_defined(0, q));
    }
    assert_eq!(solution.cell_counts().failed, cfg.components.len());
    let table = solution.table();
    assert_ne!(table.standard.threshold_index, 0);
    assert_ne!(table.one_se.unwrap().threshold_index, 0);
}

#[test]
fn nothing_defined_is_no_valid_solution() {
    let data = gaussian_data(60, 6, 6);
    let cfg = config(FitMeasure::Bic, 3);
    struct AlwaysFails;
    impl ComponentExtractor for AlwaysFails {
        fn extract(
            &self,
            _x: ArrayView2<f64>,
            _max_components: usize,
            _column_types: &[VariableType],
        ) -> Result<Box<dyn ComponentProjection>, GspcrError> {
            Err(GspcrError::Extraction("always".to_string()))
        }
    }
    assert!(matches!(
        cv_gspcr_with(&data, &cfg, &AlwaysFails),
        Err(GspcrError::NoValidSolution)
    ));
}

#[test]
fn binary_outcome_with_mixed_predictors() {
    let n = 150;
    let (z, continuous) = latent_block(n, 6, 3, 7);
    let mut rng = ChaCha8Rng::seed_from_u64(77);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let y = z.mapv(|v| if v + normal.sample(&mut rng) > 0.0 { 1.0 } else { 0.0 });

    let mut x = Array2::<f64>::zeros((n, 8));
    x.slice_mut(s![.., ..6]).assign(&continuous);
    for i in 0..n {
        // Nominal predictor tied to z, binary predictor of pure noise.
        x[[i, 6]] = if z[i] < -0.5 { 0.0 } else if z[i] < 0.5 { 1.0 } else { 2.0 };
        x[[i, 7]] = (i % 2) as f64;
    }
    let mut types = vec![VariableType::Continuous; 6];
    types.push(VariableType::Nominal { levels: 3 });
    types.push(VariableType::Binary);
    let data = Dataset::new(y, VariableType::Binary, x.clone(), types).unwrap();

    let cfg = config(FitMeasure::Lrt, 5);
    let solution = cv_gspcr(&data, &cfg).unwrap();
    assert_eq!(solution.family(), Family::Binomial);
    assert!(solution.cell_counts().scored > 0);

    let model = GspcrModel::from_solution(&data, &cfg, &solution, SelectionRule::Standard).unwrap();
    match model.predict(x.slice(s![..5, ..])).unwrap() {
        Prediction::Mean(p) => assert!(p.iter().all(|&v| v > 0.0 && v < 1.0)),
        other => panic!("expected probabilities of success, got {:?}", other),
    }
}

fn three_level_outcome(z: &Array1<f64>, seed: u64) -> Array1<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.7).unwrap();
    z.mapv(|v| {
        let u = v + normal.sample(&mut rng);
        if u < -0.4 {
            0.0
        } else if u < 0.4 {
            1.0
        } else {
            2.0
        }
    })
}

#[test]
fn nominal_and_ordinal_outcomes() {
    let n = 180;
    let (z, x) = latent_block(n, 8, 4, 8);
    let y = three_level_outcome(&z, 88);
    let types = vec![VariableType::Continuous; 8];

    let nominal = Dataset::new(y.clone(), VariableType::Nominal { levels: 3 }, x.clone(), types.clone()).unwrap();
    let cfg = config(FitMeasure::Bic, 3);
    let solution = cv_gspcr(&nominal, &cfg).unwrap();
    assert_eq!(solution.family(), Family::Multinomial);
    assert!(solution.cell_counts().scored > 0);

    let ordinal = Dataset::new(y, VariableType::Ordinal { levels: 3 }, x.clone(), types).unwrap();
    let solution = cv_gspcr(&ordinal, &cfg).unwrap();
    assert_eq!(solution.family(), Family::Cumulative);

    let model = GspcrModel::from_solution(&ordinal, &cfg, &solution, SelectionRule::OneSe).unwrap();
    match model.predict(x.slice(s![..4, ..])).unwrap() {
        Prediction::Probabilities(p) => {
            assert_eq!(p.ncols(), 3);
            for row in p.rows() {
                assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-10);
            }
        }
        other => panic!("expected class probabilities, got {:?}", other),
    }
}

#[test]
fn saved_model_predicts_identically() {
    let data = gaussian_data(80, 8, 9);
    let cfg = config(FitMeasure::Bic, 4);
    let solution = cv_gspcr(&data, &cfg).unwrap();
    let model = GspcrModel::from_solution(&data, &cfg, &solution, SelectionRule::Standard).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gspcr_model.bin");
    model.save_model(&path).unwrap();
    let loaded = GspcrModel::load_model(&path).unwrap();

    let x_new = data.x().slice(s![..10, ..]).to_owned();
    assert_eq!(model.predict(x_new.view()).unwrap(), loaded.predict(x_new.view()).unwrap());
    assert_eq!(loaded.retained(), model.retained());
    assert_eq!(loaded.n_components(), solution.table().standard.n_components);
}

#[test]
fn invalid_configurations_are_rejected_up_front() {
    let data = gaussian_data(40, 4, 10);

    let too_many_folds = GspcrConfig {
        n_folds: 41,
        ..config(FitMeasure::Bic, 5)
    };
    assert!(matches!(cv_gspcr(&data, &too_many_folds), Err(GspcrError::InvalidConfig(_))));

    let too_many_components = GspcrConfig {
        components: vec![1, 5],
        ..config(FitMeasure::Bic, 5)
    };
    assert!(matches!(cv_gspcr(&data, &too_many_components), Err(GspcrError::InvalidConfig(_))));

    let f_on_binary = Dataset::new(
        data.y().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        VariableType::Binary,
        data.x().to_owned(),
        vec![VariableType::Continuous; 4],
    )
    .unwrap();
    assert!(matches!(cv_gspcr(&f_on_binary, &config(FitMeasure::F, 5)), Err(GspcrError::InvalidConfig(_))));
}

#[test]
fn constant_predictors_are_never_retained() {
    let (z, mut x) = latent_block(60, 6, 3, 11);
    x.column_mut(5).fill(2.5);
    let y = z.mapv(|v| 2.0 * v);
    let data = Dataset::continuous(y + Array1::linspace(0.0, 0.1, 60), x).unwrap();
    let solution = cv_gspcr(&data, &config(FitMeasure::Bic, 3)).unwrap();
    let model = GspcrModel::from_solution(&data, &config(FitMeasure::Bic, 3), &solution, SelectionRule::Standard).unwrap();
    assert!(!model.retained().contains(&5));
}
