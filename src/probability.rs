// src/probability.rs

use std::fmt;

use log::info;
use ndarray::{s, Array2, ArrayView1};

use crate::curve::{StepCurve, SurvivalModel};
use crate::error::{PipelineError, Result};

/// Patient x month survival probabilities on the grid `0, 1, ..., horizon`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    pub id_label: String,
    pub ids: Vec<String>,
    /// Column times in months, ascending and contiguous from 0.
    pub months: Vec<usize>,
    pub values: Array2<f64>,
}

impl fmt::Display for ProbabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ProbabilityTable: {} patients x {} months (0..={})",
            self.nrows(),
            self.ncols(),
            self.horizon()
        )?;
        for (i, id) in self.ids.iter().take(5).enumerate() {
            let row = self.values.row(i);
            let shown: Vec<String> = row.iter().take(6).map(|v| format!("{v:.3}")).collect();
            writeln!(f, "  {}\t{} ...", id, shown.join("\t"))?;
        }
        Ok(())
    }
}

impl ProbabilityTable {
    pub fn new(id_label: &str, ids: Vec<String>, months: Vec<usize>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != ids.len() || values.ncols() != months.len() {
            return Err(PipelineError::Format(format!(
                "table of shape {:?} for {} ids and {} months",
                values.shape(),
                ids.len(),
                months.len()
            )));
        }
        if months.iter().enumerate().any(|(i, &m)| i != m) {
            return Err(PipelineError::Format(
                "probability table columns must be the months 0, 1, 2, ... in order".into(),
            ));
        }
        Ok(ProbabilityTable {
            id_label: id_label.to_string(),
            ids,
            months,
            values,
        })
    }

    /// Resample every curve onto `0..=horizon` months, step-held.
    pub fn from_curves(id_label: &str, ids: &[String], curves: &[StepCurve], horizon: usize) -> Result<Self> {
        if ids.len() != curves.len() {
            return Err(PipelineError::Format(format!(
                "{} patient ids for {} survival curves",
                ids.len(),
                curves.len()
            )));
        }
        let grid: Vec<f64> = (0..=horizon).map(|m| m as f64).collect();
        let mut values = Array2::<f64>::zeros((curves.len(), grid.len()));
        for (mut row, curve) in values.rows_mut().into_iter().zip(curves.iter()) {
            for (cell, p) in row.iter_mut().zip(curve.resample(&grid)) {
                *cell = p;
            }
        }
        Self::new(id_label, ids.to_vec(), (0..=horizon).collect(), values)
    }

    /// Query `model` for one curve per row of `x` and tabulate them.
    pub fn from_model<M: SurvivalModel + ?Sized>(
        model: &M,
        x: &Array2<f64>,
        id_label: &str,
        ids: &[String],
        horizon: usize,
    ) -> Result<Self> {
        let curves = model.predict_survival_curves(x)?;
        let table = Self::from_curves(id_label, ids, &curves, horizon)?;
        info!("survival curves tabulated for {} patients up to month {}", table.nrows(), horizon);
        Ok(table)
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn horizon(&self) -> usize {
        self.months.last().copied().unwrap_or(0)
    }

    pub fn row(&self, i: usize) -> ArrayView1<f64> {
        self.values.row(i)
    }

    /// Keep the months `0..=horizon`.
    pub fn truncate(&self, horizon: usize) -> Result<Self> {
        if self.months.is_empty() || horizon > self.horizon() {
            return Err(PipelineError::Format(format!(
                "need months up to {} but the table stops at {}",
                horizon,
                self.horizon()
            )));
        }
        Ok(ProbabilityTable {
            id_label: self.id_label.clone(),
            ids: self.ids.clone(),
            months: self.months[..=horizon].to_vec(),
            values: self.values.slice(s![.., ..=horizon]).to_owned(),
        })
    }

    /// Every row non-increasing from left to right.
    pub fn is_monotone(&self) -> bool {
        self.values
            .rows()
            .into_iter()
            .all(|row| row.iter().zip(row.iter().skip(1)).all(|(a, b)| b <= a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    #[test]
    fn test_heterogeneous_breakpoints_are_resampled() {
        let a = StepCurve::new(vec![1.5, 3.0], vec![0.8, 0.5]).unwrap();
        let b = StepCurve::new(vec![0.5, 2.0, 2.5], vec![0.9, 0.7, 0.4]).unwrap();
        let table = ProbabilityTable::from_curves("ID", &ids(2), &[a, b], 4).unwrap();

        assert_eq!(table.months, vec![0, 1, 2, 3, 4]);
        assert_eq!(table.values.row(0).to_vec(), vec![1.0, 1.0, 0.8, 0.5, 0.5]);
        assert_eq!(table.values.row(1).to_vec(), vec![1.0, 0.9, 0.7, 0.4, 0.4]);
        assert!(table.is_monotone());
    }

    #[test]
    fn test_id_count_must_match() {
        let a = StepCurve::new(vec![1.0], vec![0.5]).unwrap();
        assert!(ProbabilityTable::from_curves("ID", &ids(2), &[a], 3).is_err());
    }

    #[test]
    fn test_truncate() {
        let values = array![[1.0, 0.9, 0.8, 0.7], [1.0, 1.0, 0.5, 0.5]];
        let table = ProbabilityTable::new("ID", ids(2), vec![0, 1, 2, 3], values).unwrap();

        let cut = table.truncate(1).unwrap();
        assert_eq!(cut.months, vec![0, 1]);
        assert_eq!(cut.values, array![[1.0, 0.9], [1.0, 1.0]]);
        assert!(table.truncate(4).is_err());
    }

    #[test]
    fn test_months_must_be_contiguous() {
        let values = array![[1.0, 0.9]];
        assert!(ProbabilityTable::new("ID", ids(1), vec![0, 2], values).is_err());
    }

    #[test]
    fn test_is_monotone_detects_increase() {
        let values = array![[1.0, 0.8, 0.9]];
        let table = ProbabilityTable::new("ID", ids(1), vec![0, 1, 2], values).unwrap();
        assert!(!table.is_monotone());
    }
}
