// src/curve.rs

use ndarray::{Array2, ArrayView1};

use crate::error::{PipelineError, Result};

/// Right-continuous step function of survival probability over time.
///
/// `probabilities[k]` holds on `[times[k], times[k + 1])`; before the first
/// breakpoint the probability is 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCurve {
    times: Vec<f64>,
    probabilities: Vec<f64>,
}

impl StepCurve {
    /// Checked constructor: strictly ascending finite times, probabilities in
    /// `[0, 1]` and non-increasing.
    pub fn new(times: Vec<f64>, probabilities: Vec<f64>) -> Result<Self> {
        if times.len() != probabilities.len() {
            return Err(PipelineError::Format(format!(
                "{} breakpoints but {} probabilities",
                times.len(),
                probabilities.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) || times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::Format(
                "curve breakpoints must be finite and strictly ascending".into(),
            ));
        }
        if probabilities.iter().any(|p| !(0.0..=1.0).contains(p))
            || probabilities.windows(2).any(|w| w[1] > w[0])
        {
            return Err(PipelineError::Format(
                "survival probabilities must lie in [0, 1] and never increase".into(),
            ));
        }
        Ok(StepCurve { times, probabilities })
    }

    /// For producers that already guarantee the invariants.
    pub(crate) fn from_parts(times: Vec<f64>, probabilities: Vec<f64>) -> Self {
        debug_assert!(times.len() == probabilities.len());
        StepCurve { times, probabilities }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Value at `t` (step held from the last breakpoint `<= t`).
    pub fn at(&self, t: f64) -> f64 {
        let k = self.times.partition_point(|&x| x <= t);
        if k == 0 {
            1.0
        } else {
            self.probabilities[k - 1]
        }
    }

    /// Left limit at `t` (last breakpoint strictly before `t`).
    pub fn before(&self, t: f64) -> f64 {
        let k = self.times.partition_point(|&x| x < t);
        if k == 0 {
            1.0
        } else {
            self.probabilities[k - 1]
        }
    }

    /// Evaluate on an arbitrary grid.
    pub fn resample(&self, grid: &[f64]) -> Vec<f64> {
        grid.iter().map(|&t| self.at(t)).collect()
    }
}

/// Anything that turns an encoded feature row into a survival curve.
pub trait SurvivalModel {
    /// Names of the encoded columns the model expects, in order.
    fn feature_names(&self) -> &[String];

    fn predict_survival(&self, row: ArrayView1<f64>) -> StepCurve;

    /// One curve per row of `x`.
    fn predict_survival_curves(&self, x: &Array2<f64>) -> Result<Vec<StepCurve>> {
        if x.ncols() != self.feature_names().len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "model expects {} columns, matrix has {}",
                self.feature_names().len(),
                x.ncols()
            )));
        }
        Ok(x.rows().into_iter().map(|row| self.predict_survival(row)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> StepCurve {
        StepCurve::new(vec![2.0, 5.0, 9.0], vec![0.9, 0.6, 0.2]).unwrap()
    }

    #[test]
    fn test_step_lookup() {
        let c = curve();
        assert_eq!(c.at(0.0), 1.0);
        assert_eq!(c.at(1.999), 1.0);
        assert_eq!(c.at(2.0), 0.9);
        assert_eq!(c.at(4.5), 0.9);
        assert_eq!(c.at(5.0), 0.6);
        assert_eq!(c.at(100.0), 0.2);
    }

    #[test]
    fn test_left_limit() {
        let c = curve();
        assert_eq!(c.before(2.0), 1.0);
        assert_eq!(c.before(5.0), 0.9);
        assert_eq!(c.before(5.5), 0.6);
    }

    #[test]
    fn test_resample_onto_integer_grid() {
        let grid: Vec<f64> = (0..=6).map(|t| t as f64).collect();
        assert_eq!(
            curve().resample(&grid),
            vec![1.0, 1.0, 0.9, 0.9, 0.9, 0.6, 0.6]
        );
    }

    #[test]
    fn test_invalid_curves_rejected() {
        assert!(StepCurve::new(vec![1.0, 1.0], vec![0.9, 0.8]).is_err());
        assert!(StepCurve::new(vec![1.0, 2.0], vec![0.5, 0.8]).is_err());
        assert!(StepCurve::new(vec![1.0], vec![1.5]).is_err());
        assert!(StepCurve::new(vec![1.0], vec![]).is_err());
        assert!(StepCurve::new(vec![], vec![]).unwrap().is_empty());
    }
}
