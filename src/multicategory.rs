//! Newton–Raphson fits for outcomes with more than two categories:
//! baseline-category (multinomial) logit and proportional-odds cumulative logit.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::data::{level_counts, level_of};
use crate::error::FitError;
use crate::glm::{logistic, solve_symmetric, with_intercept, CONVERGENCE_TOLERANCE, MAX_ITERATIONS, SEPARATION_ETA};

/// Maximum number of step halvings per Newton iteration.
const MAX_HALVINGS: usize = 30;

/// Baseline-category logit: linear predictors for every non-baseline level,
/// shape (n, levels - 1).
fn multinomial_eta(x1: &Array2<f64>, beta: &Array2<f64>) -> Array2<f64> {
    x1.dot(&beta.t())
}

/// Softmax over `[0, eta_1, ..., eta_{L-1}]` for every row.
fn softmax_with_baseline(eta: &Array2<f64>) -> Array2<f64> {
    let (n, l_minus_1) = eta.dim();
    let mut probs = Array2::<f64>::zeros((n, l_minus_1 + 1));
    for (i, row) in eta.axis_iter(Axis(0)).enumerate() {
        let max = row.iter().cloned().fold(0.0_f64, f64::max);
        let base = (-max).exp();
        let denom: f64 = base + row.iter().map(|&e| (e - max).exp()).sum::<f64>();
        probs[[i, 0]] = base / denom;
        for (k, &e) in row.iter().enumerate() {
            probs[[i, k + 1]] = (e - max).exp() / denom;
        }
    }
    probs
}

fn multinomial_log_likelihood(eta: &Array2<f64>, y: ArrayView1<f64>) -> f64 {
    eta.axis_iter(Axis(0))
        .zip(y.iter())
        .map(|(row, &yi)| {
            let max = row.iter().cloned().fold(0.0_f64, f64::max);
            let log_denom = max + ((-max).exp() + row.iter().map(|&e| (e - max).exp()).sum::<f64>()).ln();
            let k = level_of(yi);
            let own = if k == 0 { 0.0 } else { row[k - 1] };
            own - log_denom
        })
        .sum()
}

/// Class probabilities of a multinomial model on rows `x` (no intercept column).
pub(crate) fn multinomial_probabilities(x: ArrayView2<f64>, beta: ArrayView2<f64>) -> Array2<f64> {
    let x1 = with_intercept(x);
    softmax_with_baseline(&x1.dot(&beta.t()))
}

/// Fits a baseline-category logit. Returns coefficients of shape
/// (levels - 1, p + 1) and the number of Newton iterations.
pub(crate) fn fit_multinomial(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    n_levels: usize,
) -> Result<(Array2<f64>, usize), FitError> {
    let x1 = with_intercept(x);
    let d = x1.ncols();
    let n_eq = n_levels - 1;
    let m = n_eq * d;

    // Start at the intercept-only maximum-likelihood estimate.
    let counts = level_counts(y, n_levels);
    let mut beta = Array2::<f64>::zeros((n_eq, d));
    for k in 1..n_levels {
        beta[[k - 1, 0]] = (counts[k] as f64 / counts[0] as f64).ln();
    }
    let mut eta = multinomial_eta(&x1, &beta);
    let mut ll = multinomial_log_likelihood(&eta, y);

    let indicators = {
        let mut ind = Array2::<f64>::zeros((y.len(), n_levels));
        for (i, &yi) in y.iter().enumerate() {
            ind[[i, level_of(yi)]] = 1.0;
        }
        ind
    };

    for iteration in 1..=MAX_ITERATIONS {
        let probs = softmax_with_baseline(&eta);

        let mut gradient = Array1::<f64>::zeros(m);
        for k in 1..n_levels {
            let residual = &indicators.column(k) - &probs.column(k);
            let g_k = x1.t().dot(&residual);
            gradient.slice_mut(s![(k - 1) * d..k * d]).assign(&g_k);
        }

        let mut information = Array2::<f64>::zeros((m, m));
        for k in 1..n_levels {
            for l in k..n_levels {
                let weights: Array1<f64> = if k == l {
                    probs.column(k).mapv(|p| p * (1.0 - p))
                } else {
                    (&probs.column(k) * &probs.column(l)).mapv(|v| -v)
                };
                let xw = &x1 * &weights.view().insert_axis(Axis(1));
                let block = xw.t().dot(&x1);
                information
                    .slice_mut(s![(k - 1) * d..k * d, (l - 1) * d..l * d])
                    .assign(&block);
                if k != l {
                    information
                        .slice_mut(s![(l - 1) * d..l * d, (k - 1) * d..k * d])
                        .assign(&block.t());
                }
            }
        }

        let step = solve_symmetric(information, gradient)?;
        let step = step
            .into_shape_with_order((n_eq, d))
            .map_err(|e| FitError::NonFinite(format!("step reshape: {}", e)))?;

        let (candidate, candidate_eta, candidate_ll) = halve_until_improved(ll, |t| {
            let candidate = &beta + &(&step * t);
            let candidate_eta = multinomial_eta(&x1, &candidate);
            let candidate_ll = multinomial_log_likelihood(&candidate_eta, y);
            (candidate, candidate_eta, candidate_ll)
        })?;

        let change = candidate_ll - ll;
        beta = candidate;
        eta = candidate_eta;
        ll = candidate_ll;

        if change.abs() < CONVERGENCE_TOLERANCE * (ll.abs() + 0.1) {
            if eta.iter().any(|e| e.abs() > SEPARATION_ETA) {
                return Err(FitError::Separation);
            }
            return Ok((beta, iteration));
        }
    }
    Err(FitError::ConvergenceFailed {
        iterations: MAX_ITERATIONS,
    })
}

/// Proportional-odds `P(Y = k)` for every row: differences of
/// `logistic(cut_k - x·beta)`.
pub(crate) fn cumulative_probabilities(
    x: ArrayView2<f64>,
    cutpoints: ArrayView1<f64>,
    beta: ArrayView1<f64>,
) -> Array2<f64> {
    let n_levels = cutpoints.len() + 1;
    let eta = x.dot(&beta);
    let mut probs = Array2::<f64>::zeros((x.nrows(), n_levels));
    for (i, &e) in eta.iter().enumerate() {
        let mut previous = 0.0;
        for k in 0..n_levels {
            let cumulative = if k + 1 < n_levels {
                logistic(cutpoints[k] - e)
            } else {
                1.0
            };
            probs[[i, k]] = (cumulative - previous).max(0.0);
            previous = cumulative;
        }
    }
    probs
}

fn cumulative_log_likelihood(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    cutpoints: ArrayView1<f64>,
    beta: ArrayView1<f64>,
) -> f64 {
    let n_levels = cutpoints.len() + 1;
    let eta = x.dot(&beta);
    let mut ll = 0.0;
    for (&yi, &e) in y.iter().zip(eta.iter()) {
        let k = level_of(yi);
        let upper = if k + 1 < n_levels { logistic(cutpoints[k] - e) } else { 1.0 };
        let lower = if k > 0 { logistic(cutpoints[k - 1] - e) } else { 0.0 };
        let pi = upper - lower;
        if !(pi > 0.0) {
            return f64::NEG_INFINITY;
        }
        ll += pi.ln();
    }
    ll
}

/// Fits a proportional-odds model. Returns (cut-points, slopes, iterations).
pub(crate) fn fit_cumulative(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    n_levels: usize,
) -> Result<(Array1<f64>, Array1<f64>, usize), FitError> {
    let n = y.len();
    let p = x.ncols();
    let n_cuts = n_levels - 1;
    let m = n_cuts + p;

    // Cut-points at the logits of the empirical cumulative proportions, slopes at zero.
    let counts = level_counts(y, n_levels);
    let mut theta = Array1::<f64>::zeros(m);
    let mut running = 0usize;
    for k in 0..n_cuts {
        running += counts[k];
        let c = running as f64 / n as f64;
        theta[k] = (c / (1.0 - c)).ln();
    }
    let log_lik = |theta: &Array1<f64>| {
        cumulative_log_likelihood(x, y, theta.slice(s![..n_cuts]), theta.slice(s![n_cuts..]))
    };
    let mut ll = log_lik(&theta);

    for iteration in 1..=MAX_ITERATIONS {
        let (gradient, information) = cumulative_score_and_information(x, y, theta.view(), n_cuts);
        let step = solve_symmetric(information, gradient)?;

        let (candidate, _, candidate_ll) = halve_until_improved(ll, |t| {
            let candidate = &theta + &(&step * t);
            let candidate_ll = log_lik(&candidate);
            (candidate, (), candidate_ll)
        })?;

        let change = candidate_ll - ll;
        theta = candidate;
        ll = candidate_ll;

        if change.abs() < CONVERGENCE_TOLERANCE * (ll.abs() + 0.1) {
            let probs = cumulative_probabilities(x, theta.slice(s![..n_cuts]), theta.slice(s![n_cuts..]));
            let collapsed = y
                .iter()
                .enumerate()
                .any(|(i, &yi)| probs[[i, level_of(yi)]] > 1.0 - 1e-11);
            if collapsed {
                return Err(FitError::Separation);
            }
            let cutpoints = theta.slice(s![..n_cuts]).to_owned();
            let beta = theta.slice(s![n_cuts..]).to_owned();
            return Ok((cutpoints, beta, iteration));
        }
    }
    Err(FitError::ConvergenceFailed {
        iterations: MAX_ITERATIONS,
    })
}

/// Gradient and observed information (negative Hessian) of the cumulative-logit
/// log-likelihood at `theta = [cutpoints, beta]`.
fn cumulative_score_and_information(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    theta: ArrayView1<f64>,
    n_cuts: usize,
) -> (Array1<f64>, Array2<f64>) {
    let p = x.ncols();
    let m = n_cuts + p;
    let cutpoints = theta.slice(s![..n_cuts]);
    let beta = theta.slice(s![n_cuts..]);
    let eta = x.dot(&beta);

    let mut gradient = Array1::<f64>::zeros(m);
    let mut hessian = Array2::<f64>::zeros((m, m));
    let mut d_pi = Array1::<f64>::zeros(m);
    let mut d2_pi = Array2::<f64>::zeros((m, m));

    for (i, &yi) in y.iter().enumerate() {
        let k = level_of(yi);
        let xi = x.row(i);
        // F, f and f' at the upper and lower boundary; zero outside the support.
        let boundary = |cut: Option<usize>| match cut {
            Some(c) => {
                let big_f = logistic(cutpoints[c] - eta[i]);
                let f = big_f * (1.0 - big_f);
                (big_f, f, f * (1.0 - 2.0 * big_f))
            }
            None => (0.0, 0.0, 0.0),
        };
        let upper_cut = if k < n_cuts { Some(k) } else { None };
        let lower_cut = if k > 0 { Some(k - 1) } else { None };
        let (f_upper_cdf, f_u, fp_u) = boundary(upper_cut);
        let (f_lower_cdf, f_l, fp_l) = boundary(lower_cut);
        let upper_cdf = if upper_cut.is_some() { f_upper_cdf } else { 1.0 };
        let pi = (upper_cdf - f_lower_cdf).max(f64::MIN_POSITIVE);

        d_pi.fill(0.0);
        d2_pi.fill(0.0);
        if let Some(u) = upper_cut {
            d_pi[u] = f_u;
            d2_pi[[u, u]] = fp_u;
            for j in 0..p {
                d2_pi[[u, n_cuts + j]] = -xi[j] * fp_u;
                d2_pi[[n_cuts + j, u]] = -xi[j] * fp_u;
            }
        }
        if let Some(l) = lower_cut {
            d_pi[l] = -f_l;
            d2_pi[[l, l]] = -fp_l;
            for j in 0..p {
                d2_pi[[l, n_cuts + j]] = xi[j] * fp_l;
                d2_pi[[n_cuts + j, l]] = xi[j] * fp_l;
            }
        }
        for j in 0..p {
            d_pi[n_cuts + j] = -xi[j] * (f_u - f_l);
            for h in 0..p {
                d2_pi[[n_cuts + j, n_cuts + h]] = xi[j] * xi[h] * (fp_u - fp_l);
            }
        }

        gradient.scaled_add(1.0 / pi, &d_pi);
        let outer = d_pi
            .view()
            .insert_axis(Axis(1))
            .dot(&d_pi.view().insert_axis(Axis(0)));
        hessian = hessian + &d2_pi / pi - &outer / (pi * pi);
    }
    (gradient, hessian.mapv(|v| -v))
}

/// Backtracking along a Newton direction: tries step sizes 1, 1/2, 1/4, ...
/// until the log-likelihood does not decrease.
fn halve_until_improved<P, E, F>(current_ll: f64, mut evaluate: F) -> Result<(P, E, f64), FitError>
where
    F: FnMut(f64) -> (P, E, f64),
{
    let mut t = 1.0;
    for _ in 0..MAX_HALVINGS {
        let (candidate, extra, candidate_ll) = evaluate(t);
        if candidate_ll.is_finite() && candidate_ll >= current_ll - 1e-12 * current_ll.abs() {
            return Ok((candidate, extra, candidate_ll));
        }
        t *= 0.5;
    }
    Err(FitError::ConvergenceFailed {
        iterations: MAX_HALVINGS,
    })
}
