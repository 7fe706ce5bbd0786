// src/score.rs

//! Weighted Brier score for survival predictions.
//!
//! Censored patients are handled with inverse-probability-of-censoring
//! weights: a patient censored before month `t` carries no information about
//! `t` and gets weight 0; everybody else is up-weighted by `1 / G`, where `G`
//! is the Kaplan-Meier estimate of remaining uncensored.

use std::collections::BTreeMap;

use log::debug;
use ndarray::Array2;
use ordered_float::OrderedFloat;

use crate::curve::StepCurve;
use crate::data::SurvivalTarget;
use crate::error::{PipelineError, Result};
use crate::probability::ProbabilityTable;

pub const MONTHS_PER_YEAR: usize = 12;

/// Kaplan-Meier estimate of the censoring survival function `G(t)`.
///
/// Censoring is the "event" here; deaths tied with censorings are taken to
/// happen first and only shrink the risk set.
pub fn censoring_survival(targets: &[SurvivalTarget]) -> StepCurve {
    // time -> (deaths at t, censored at t)
    let mut per_time: BTreeMap<OrderedFloat<f64>, (usize, usize)> = BTreeMap::new();
    for target in targets {
        let entry = per_time.entry(OrderedFloat(target.time)).or_insert((0, 0));
        if target.event {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let mut at_risk = targets.len();
    let mut g = 1.0;
    let mut times = Vec::new();
    let mut probabilities = Vec::new();
    for (t, (deaths, censored)) in per_time {
        let exposed = at_risk - deaths;
        if censored > 0 && exposed > 0 {
            g *= 1.0 - censored as f64 / exposed as f64;
            times.push(t.into_inner());
            probabilities.push(g);
        }
        at_risk -= deaths + censored;
    }
    StepCurve::from_parts(times, probabilities)
}

/// Observed status at month `t`: `Some(1.0)` alive, `Some(0.0)` dead, `None`
/// when censored before `t`.
fn observed_status(target: &SurvivalTarget, t: f64) -> Option<f64> {
    if target.time > t {
        Some(1.0)
    } else if target.event {
        Some(0.0)
    } else {
        None
    }
}

/// Censoring distribution estimated from the training outcomes, turned into
/// per-observation weights on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct CensoringWeights {
    g: StepCurve,
}

impl CensoringWeights {
    pub fn censoring_survival(&self) -> &StepCurve {
        &self.g
    }

    /// Weight of one observed outcome at month `t`.
    pub fn weight(&self, target: &SurvivalTarget, t: f64) -> f64 {
        let inverse = |p: f64| if p > 0.0 { 1.0 / p } else { 0.0 };
        match observed_status(target, t) {
            Some(s) if s > 0.0 => inverse(self.g.at(t)),
            Some(_) => inverse(self.g.before(target.time)),
            None => 0.0,
        }
    }

    /// Patient x month `0..=horizon` weights for `actual`.
    pub fn matrix(&self, actual: &[SurvivalTarget], horizon: usize) -> Array2<f64> {
        Array2::from_shape_fn((actual.len(), horizon + 1), |(i, m)| {
            self.weight(&actual[i], m as f64)
        })
    }
}

pub fn calc_weights(training_targets: &[SurvivalTarget]) -> CensoringWeights {
    CensoringWeights {
        g: censoring_survival(training_targets),
    }
}

/// Weighted mean squared error between predicted survival and observed
/// status over the months `0..=12 * years_cutoff`. Lower is better.
pub fn brier_score_loss_weighted(
    pred: &ProbabilityTable,
    actual: &[SurvivalTarget],
    weights: &CensoringWeights,
    years_cutoff: f64,
) -> Result<f64> {
    if !(years_cutoff > 0.0) {
        return Err(PipelineError::Config(format!(
            "years cutoff must be positive, got {years_cutoff}"
        )));
    }
    let last_month = (years_cutoff * MONTHS_PER_YEAR as f64).floor() as usize;
    if pred.nrows() != actual.len() {
        return Err(PipelineError::Format(format!(
            "{} predictions for {} outcomes",
            pred.nrows(),
            actual.len()
        )));
    }
    if last_month > pred.horizon() {
        return Err(PipelineError::Format(format!(
            "cutoff of {years_cutoff} years ({last_month} months) is beyond the predicted horizon of {} months",
            pred.horizon()
        )));
    }

    let mut loss = 0.0;
    let mut total_weight = 0.0;
    for (i, target) in actual.iter().enumerate() {
        for m in 0..=last_month {
            let t = m as f64;
            let w = weights.weight(target, t);
            if w == 0.0 {
                continue;
            }
            let y = observed_status(target, t).unwrap_or(0.0);
            let p = pred.values[[i, m]];
            loss += w * (y - p).powi(2);
            total_weight += w;
        }
    }
    debug!("weighted brier: loss {loss:.6} over total weight {total_weight:.3}");
    if total_weight == 0.0 {
        return Ok(0.0);
    }
    Ok(loss / total_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn t(event: bool, time: f64) -> SurvivalTarget {
        SurvivalTarget { event, time }
    }

    fn table(values: Array2<f64>) -> ProbabilityTable {
        let ids = (0..values.nrows()).map(|i| format!("p{i}")).collect();
        let months = (0..values.ncols()).collect();
        ProbabilityTable::new("ID", ids, months, values).unwrap()
    }

    #[test]
    fn test_censoring_km() {
        // censored at 2 (4 at risk), death at 3, censored at 5 (2 at risk)
        let targets = vec![t(true, 1.0), t(false, 2.0), t(true, 3.0), t(false, 5.0), t(true, 6.0)];
        let g = censoring_survival(&targets);
        assert_eq!(g.times(), &[2.0, 5.0]);
        assert_abs_diff_eq!(g.at(2.0), 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(g.at(5.0), 0.375, epsilon = 1e-12);
        assert_eq!(g.at(1.0), 1.0);

        // a death and a censoring tied at 2: the death leaves first
        let tied = vec![t(true, 2.0), t(false, 2.0), t(true, 5.0)];
        let g = censoring_survival(&tied);
        assert_eq!(g.times(), &[2.0]);
        assert_abs_diff_eq!(g.at(2.0), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(g.at(5.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_zero_after_censoring() {
        let targets = vec![t(false, 2.0), t(true, 3.0), t(true, 10.0)];
        let w = calc_weights(&targets).matrix(&targets, 4);
        // censored patient: informative up to month 1 only
        assert!(w[[0, 1]] > 0.0);
        assert_eq!(w[[0, 2]], 0.0);
        assert_eq!(w[[0, 4]], 0.0);
        // died at 3: weighted by 1/G(3-) = 1/(2/3)
        assert_abs_diff_eq!(w[[1, 4]], 1.5, epsilon = 1e-12);
        // still alive at month 4: 1/G(4)
        assert_abs_diff_eq!(w[[2, 4]], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(w[[2, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_perfect_prediction_scores_zero() {
        let targets = vec![t(true, 2.0), t(true, 13.0)];
        let mut values = Array2::<f64>::ones((2, 13));
        for m in 2..13 {
            values[[0, m]] = 0.0;
        }
        let w = calc_weights(&targets);
        let score = brier_score_loss_weighted(&table(values), &targets, &w, 1.0).unwrap();
        assert_abs_diff_eq!(score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_half_scores_quarter() {
        let targets = vec![t(true, 1.0), t(false, 30.0), t(true, 4.0)];
        let values = Array2::<f64>::from_elem((3, 25), 0.5);
        let w = calc_weights(&targets);
        let score = brier_score_loss_weighted(&table(values), &targets, &w, 2.0).unwrap();
        assert_abs_diff_eq!(score, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_from_training_apply_to_other_outcomes() {
        let training = vec![t(false, 2.0), t(true, 3.0), t(true, 10.0), t(false, 12.0)];
        let weights = calc_weights(&training);
        let holdout = vec![t(true, 5.0)];
        // G(5-) = 3/4 from the training censoring at month 2
        assert_abs_diff_eq!(weights.weight(&holdout[0], 6.0), 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(weights.weight(&holdout[0], 1.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cutoff_beyond_horizon_fails() {
        let targets = vec![t(true, 1.0)];
        let values = Array2::<f64>::ones((1, 13));
        let w = calc_weights(&targets);
        assert!(brier_score_loss_weighted(&table(values.clone()), &targets, &w, 2.0).is_err());
        assert!(brier_score_loss_weighted(&table(values), &targets, &w, 0.0).is_err());
    }
}
