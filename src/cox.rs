// src/cox.rs

use std::collections::BTreeMap;
use std::fmt;

use bincode::{Decode, Encode};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::{Inverse, Solve, SVD};
use ordered_float::OrderedFloat;

use crate::curve::{StepCurve, SurvivalModel};
use crate::data::SurvivalTarget;
use crate::error::{PipelineError, Result};

/// Step halvings tried before a Newton step is given up on.
const MAX_HALVINGS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoxConfig {
    /// Ridge penalty `0.5 * alpha * ||beta||^2`; 0 fits the plain partial likelihood.
    pub alpha: f64,
    pub max_iter: usize,
    /// Convergence threshold on the gain in penalised log-likelihood.
    pub tol: f64,
}

impl Default for CoxConfig {
    fn default() -> Self {
        CoxConfig {
            alpha: 1e-3,
            max_iter: 100,
            tol: 1e-9,
        }
    }
}

/// Cox model result
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CoxModel {
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    /// Training column means; the linear predictor is computed on centred rows.
    pub means: Vec<f64>,
    /// Unique training times, ascending.
    pub baseline_times: Vec<f64>,
    /// Breslow cumulative baseline hazard at `baseline_times`.
    pub baseline_cum_hazard: Vec<f64>,
    pub log_likelihood: f64,
    pub n_iter: usize,
    pub converged: bool,
}

struct NewtonState {
    loglik: f64,
    gradient: Array1<f64>,
    information: Array2<f64>,
}

fn outer(v: ArrayView1<f64>) -> Array2<f64> {
    v.insert_axis(Axis(1)).dot(&v.insert_axis(Axis(0)))
}

/// Row indices sorted by descending time.
fn descending_order(targets: &[SurvivalTarget]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..targets.len()).collect();
    indices.sort_by(|&i, &j| targets[j].time.total_cmp(&targets[i].time));
    indices
}

/// Penalised Breslow partial log-likelihood with its gradient and observed
/// information at `beta`. `x` must already be centred.
fn partial_likelihood(
    x: &Array2<f64>,
    targets: &[SurvivalTarget],
    order: &[usize],
    beta: &Array1<f64>,
    alpha: f64,
) -> NewtonState {
    let n_features = x.ncols();
    let eta = x.dot(beta);
    // exp(eta - shift) keeps the risk-set sums finite
    let shift = eta.iter().cloned().fold(f64::NEG_INFINITY, f64::max).max(0.0);
    let w = eta.mapv(|e| (e - shift).exp());

    let mut s0 = 0.0;
    let mut s1 = Array1::<f64>::zeros(n_features);
    let mut s2 = Array2::<f64>::zeros((n_features, n_features));

    let mut loglik = 0.0;
    let mut gradient = Array1::<f64>::zeros(n_features);
    let mut information = Array2::<f64>::zeros((n_features, n_features));

    let mut start = 0;
    while start < order.len() {
        let t = targets[order[start]].time;
        let mut end = start;
        // everybody tied at t joins the risk set before any event at t is scored
        while end < order.len() && targets[order[end]].time == t {
            let j = order[end];
            let row = x.row(j);
            s0 += w[j];
            s1.scaled_add(w[j], &row);
            s2.scaled_add(w[j], &outer(row));
            end += 1;
        }

        let mean = &s1 / s0;
        for &i in &order[start..end] {
            if !targets[i].event {
                continue;
            }
            loglik += eta[i] - (shift + s0.ln());
            gradient += &(&x.row(i) - &mean);
            information.scaled_add(1.0 / s0, &s2);
            information -= &outer(mean.view());
        }
        start = end;
    }

    if alpha > 0.0 {
        loglik -= 0.5 * alpha * beta.dot(beta);
        gradient.scaled_add(-alpha, beta);
        for k in 0..n_features {
            information[[k, k]] += alpha;
        }
    }

    NewtonState {
        loglik,
        gradient,
        information,
    }
}

fn validate_targets(targets: &[SurvivalTarget]) -> Result<()> {
    if let Some((i, reason)) = targets
        .iter()
        .enumerate()
        .find_map(|(i, t)| t.problem().map(|reason| (i, reason)))
    {
        return Err(PipelineError::InvalidTarget {
            patient: format!("row {i}"),
            reason,
        });
    }
    if !targets.iter().any(|t| t.event) {
        return Err(PipelineError::Fit("no events in the training data".into()));
    }
    Ok(())
}

fn check_rank(centred: &Array2<f64>) -> Result<()> {
    let (_, singular, _) = centred
        .svd(false, false)
        .map_err(|e| PipelineError::Fit(format!("svd of the design matrix failed: {e}")))?;
    let largest = singular.iter().cloned().fold(0.0, f64::max);
    let cutoff = largest * centred.nrows().max(centred.ncols()) as f64 * f64::EPSILON;
    let rank = singular.iter().filter(|&&s| s > cutoff).count();
    if rank < centred.ncols() {
        return Err(PipelineError::Fit(format!(
            "design matrix is rank deficient (rank {} for {} columns); use a ridge penalty",
            rank,
            centred.ncols()
        )));
    }
    Ok(())
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
            .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_prefix("Cox iterations");
    pb
}

/// Breslow estimate of the cumulative baseline hazard at every unique time.
fn breslow(
    centred: &Array2<f64>,
    targets: &[SurvivalTarget],
    beta: &Array1<f64>,
) -> (Vec<f64>, Vec<f64>) {
    let eta = centred.dot(beta);
    let shift = eta.iter().cloned().fold(f64::NEG_INFINITY, f64::max).max(0.0);

    // time -> (events, sum of exp(eta - shift) of everybody leaving at that time)
    let mut per_time: BTreeMap<OrderedFloat<f64>, (usize, f64)> = BTreeMap::new();
    for (target, &e) in targets.iter().zip(eta.iter()) {
        let entry = per_time.entry(OrderedFloat(target.time)).or_insert((0, 0.0));
        if target.event {
            entry.0 += 1;
        }
        entry.1 += (e - shift).exp();
    }

    let n_times = per_time.len();
    let mut increments = vec![0.0; n_times];
    let mut at_risk = 0.0;
    for (k, (_, &(deaths, leaving))) in per_time.iter().enumerate().rev() {
        at_risk += leaving;
        if deaths > 0 {
            increments[k] = deaths as f64 / at_risk * (-shift).exp();
        }
    }

    let times: Vec<f64> = per_time.keys().map(|t| t.into_inner()).collect();
    let mut cumulative = 0.0;
    let hazard = increments
        .into_iter()
        .map(|h| {
            cumulative += h;
            cumulative
        })
        .collect();
    (times, hazard)
}

impl CoxModel {
    /// Fit a Cox proportional hazards model by Newton-Raphson.
    ///
    /// # Arguments
    /// * `data` - encoded feature matrix (n_samples x n_features)
    /// * `targets` - event indicator and time per row
    /// * `feature_names` - names of the matrix columns
    pub fn fit(
        data: &Array2<f64>,
        targets: &[SurvivalTarget],
        feature_names: &[String],
        config: &CoxConfig,
    ) -> Result<Self> {
        if data.nrows() != targets.len() {
            return Err(PipelineError::Fit(format!(
                "{} feature rows but {} targets",
                data.nrows(),
                targets.len()
            )));
        }
        if data.ncols() != feature_names.len() {
            return Err(PipelineError::Fit(format!(
                "{} feature columns but {} names",
                data.ncols(),
                feature_names.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Fit("feature matrix contains non-finite values".into()));
        }
        validate_targets(targets)?;

        let n_features = data.ncols();
        let means = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let centred = data - &means;

        if config.alpha == 0.0 && n_features > 0 {
            check_rank(&centred)?;
        }

        let order = descending_order(targets);
        let mut beta = Array1::<f64>::zeros(n_features);
        let mut state = partial_likelihood(&centred, targets, &order, &beta, config.alpha);
        let mut converged = n_features == 0;
        let mut n_iter = 0;

        let pb = progress_bar(config.max_iter);
        while !converged && n_iter < config.max_iter {
            n_iter += 1;
            pb.inc(1);

            let delta = state
                .information
                .solve(&state.gradient)
                .map_err(|e| PipelineError::Fit(format!("singular information matrix: {e}")))?;
            if delta.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::Fit("Newton step is not finite".into()));
            }

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let candidate = &beta + &(&delta * step);
                let next = partial_likelihood(&centred, targets, &order, &candidate, config.alpha);
                if next.loglik.is_finite() && next.loglik >= state.loglik {
                    accepted = Some((candidate, next));
                    break;
                }
                step *= 0.5;
            }
            let Some((candidate, next)) = accepted else {
                debug!("no improving Newton step at iteration {n_iter}; stopping");
                converged = true;
                break;
            };

            let gain = next.loglik - state.loglik;
            debug!("iteration {n_iter}: log-likelihood {:.6} (gain {gain:.3e}, step {step})", next.loglik);
            beta = candidate;
            state = next;
            if gain < config.tol {
                converged = true;
            }
        }
        pb.finish_and_clear();

        if converged {
            info!("Cox model converged after {n_iter} iterations");
        } else {
            warn!(
                "Cox model did not converge within {} iterations; coefficients may be unreliable",
                config.max_iter
            );
        }

        let std_errors = if n_features == 0 {
            Vec::new()
        } else {
            match state.information.inv() {
                Ok(cov) => cov.diag().mapv(|v| if v > 0.0 { v.sqrt() } else { f64::NAN }).to_vec(),
                Err(_) => vec![f64::NAN; n_features],
            }
        };
        let (baseline_times, baseline_cum_hazard) = breslow(&centred, targets, &beta);

        Ok(CoxModel {
            feature_names: feature_names.to_vec(),
            coefficients: beta.to_vec(),
            std_errors,
            means: means.to_vec(),
            baseline_times,
            baseline_cum_hazard,
            log_likelihood: state.loglik,
            n_iter,
            converged,
        })
    }

    /// `(x - mean) . beta`
    pub fn linear_predictor(&self, row: ArrayView1<f64>) -> f64 {
        row.iter()
            .zip(self.means.iter())
            .zip(self.coefficients.iter())
            .map(|((x, m), b)| (x - m) * b)
            .sum()
    }
}

impl SurvivalModel for CoxModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// `S(t | x) = exp(-H0(t) * exp(eta))` at every training time.
    fn predict_survival(&self, row: ArrayView1<f64>) -> StepCurve {
        let risk = self.linear_predictor(row).exp();
        let probabilities = self
            .baseline_cum_hazard
            .iter()
            .map(|&h| if h == 0.0 { 1.0 } else { (-h * risk).exp() })
            .collect();
        StepCurve::from_parts(self.baseline_times.clone(), probabilities)
    }
}

impl fmt::Display for CoxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cox model ({} iterations, converged: {}, log-likelihood {:.4})",
            self.n_iter, self.converged, self.log_likelihood
        )?;
        writeln!(f, "  {:30} {:>12} {:>12} {:>12}", "feature", "coef", "HR", "se")?;
        for ((name, b), se) in self
            .feature_names
            .iter()
            .zip(self.coefficients.iter())
            .zip(self.std_errors.iter())
        {
            writeln!(f, "  {:30} {:>12.4} {:>12.4} {:>12.4}", name, b, b.exp(), se)?;
        }
        Ok(())
    }
}
