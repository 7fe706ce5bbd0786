// src/encode.rs

use bincode::{Decode, Encode};
use log::debug;
use ndarray::Array2;

use crate::data::{Factor, FactorJson, FeatureColumn, FeatureFrame};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
enum ColumnEncoding {
    Numeric(String),
    Categorical(Factor),
}

impl ColumnEncoding {
    fn name(&self) -> &str {
        match self {
            ColumnEncoding::Numeric(name) => name,
            ColumnEncoding::Categorical(f) => &f.column_name,
        }
    }

    fn width(&self) -> usize {
        match self {
            ColumnEncoding::Numeric(_) => 1,
            ColumnEncoding::Categorical(f) => f.get_levels().len().saturating_sub(1),
        }
    }
}

/// Dummy-codes categorical feature columns. Levels are learned from the
/// training frame only; numeric columns pass through unchanged.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct OneHotEncoder {
    columns: Vec<ColumnEncoding>,
    feature_names: Vec<String>,
}

impl OneHotEncoder {
    pub fn fit(frame: &FeatureFrame) -> Self {
        let mut columns = Vec::with_capacity(frame.columns.len());
        let mut feature_names = Vec::new();
        for (name, column) in frame.names.iter().zip(frame.columns.iter()) {
            match column {
                FeatureColumn::Numeric(_) => {
                    feature_names.push(name.clone());
                    columns.push(ColumnEncoding::Numeric(name.clone()));
                }
                FeatureColumn::Categorical(values) => {
                    let factor = Factor::from_values(name, values.iter().map(|s| s.as_str()));
                    debug!("{}", factor);
                    feature_names.extend(factor.one_hot_columns());
                    columns.push(ColumnEncoding::Categorical(factor));
                }
            }
        }
        OneHotEncoder { columns, feature_names }
    }

    /// Names of the encoded matrix columns, in order.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn factors(&self) -> Vec<FactorJson> {
        self.columns
            .iter()
            .filter_map(|c| match c {
                ColumnEncoding::Categorical(f) => Some(f.as_json()),
                ColumnEncoding::Numeric(_) => None,
            })
            .collect()
    }

    fn check_schema(&self, frame: &FeatureFrame) -> Result<()> {
        let fitted: Vec<&str> = self.columns.iter().map(|c| c.name()).collect();
        if fitted != frame.names.iter().map(|s| s.as_str()).collect::<Vec<_>>() {
            return Err(PipelineError::SchemaMismatch(format!(
                "encoder was fitted on columns {:?} but got {:?}",
                fitted, frame.names
            )));
        }
        for (enc, col) in self.columns.iter().zip(frame.columns.iter()) {
            let fitted_cat = matches!(enc, ColumnEncoding::Categorical(_));
            if fitted_cat != col.is_categorical() {
                return Err(PipelineError::SchemaMismatch(format!(
                    "column '{}' is {} in the training data but {} here",
                    enc.name(),
                    if fitted_cat { "categorical" } else { "numeric" },
                    if col.is_categorical() { "categorical" } else { "numeric" },
                )));
            }
        }
        Ok(())
    }

    /// Encode a frame into a dense matrix with exactly `feature_names()`
    /// columns. Categorical levels never seen while fitting are an error.
    pub fn transform(&self, frame: &FeatureFrame) -> Result<Array2<f64>> {
        self.check_schema(frame)?;

        let mut out = Array2::<f64>::zeros((frame.nrows(), self.feature_names.len()));
        let mut offset = 0;
        for (enc, column) in self.columns.iter().zip(frame.columns.iter()) {
            let width = enc.width();
            match (enc, column) {
                (ColumnEncoding::Numeric(_), FeatureColumn::Numeric(values)) => {
                    for (i, &v) in values.iter().enumerate() {
                        out[[i, offset]] = v;
                    }
                }
                (ColumnEncoding::Categorical(factor), FeatureColumn::Categorical(values)) => {
                    let mut buf = vec![0.0; width];
                    for (i, v) in values.iter().enumerate() {
                        factor.encode_into(v, &mut buf)?;
                        for (j, &b) in buf.iter().enumerate() {
                            out[[i, offset + j]] = b;
                        }
                    }
                }
                _ => {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "column '{}' changed kind",
                        enc.name()
                    )))
                }
            }
            offset += width;
        }
        Ok(out)
    }

    pub fn fit_transform(frame: &FeatureFrame) -> Result<(Self, Array2<f64>)> {
        let encoder = Self::fit(frame);
        let x = encoder.transform(frame)?;
        Ok((encoder, x))
    }
}
