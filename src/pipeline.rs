// src/pipeline.rs

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use bincode::{Decode, Encode};
use log::{info, warn};
use ndarray::Array2;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::cox::{CoxConfig, CoxModel};
use crate::data::{prepare, FactorJson, FeatureFrame, PatientTable, Prepared, SurvivalTarget};
use crate::encode::OneHotEncoder;
use crate::error::{PipelineError, Result};
use crate::probability::ProbabilityTable;
use crate::score::{brier_score_loss_weighted, calc_weights};
use crate::submission::write_submission;

#[derive(Debug, Clone, Serialize)]
pub struct CoefficientReport {
    pub feature: String,
    pub coefficient: f64,
    pub hazard_ratio: f64,
    pub std_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub n_fit: usize,
    pub n_validation: usize,
    pub years_cutoff: f64,
    pub brier_score: f64,
}

/// What a run did, written as JSON when a report file is configured.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub n_train: usize,
    pub n_test: usize,
    pub categorical_columns: Vec<String>,
    pub factors: Vec<FactorJson>,
    pub coefficients: Vec<CoefficientReport>,
    pub converged: bool,
    pub iterations: usize,
    pub validation: Option<ValidationReport>,
    pub submission: String,
}

impl RunReport {
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(|e| PipelineError::io(&path, e))
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    pub model: CoxModel,
    pub predictions: ProbabilityTable,
}

/// A model fitted on (part of) the training data plus the encoder it needs.
///
/// Saved as one bincode file so new raw feature frames, categorical columns
/// included, can be scored later.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FittedModel {
    pub encoder: OneHotEncoder,
    pub model: CoxModel,
}

impl FittedModel {
    /// Encode `frame` and tabulate its survival curves on `0..=horizon`.
    pub fn predict(&self, frame: &FeatureFrame, id_label: &str, horizon: usize) -> Result<ProbabilityTable> {
        let x = self.encoder.transform(frame)?;
        ProbabilityTable::from_model(&self.model, &x, id_label, &frame.ids, horizon)
    }

    /// Save encoder and model to a binary file using bincode
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| PipelineError::Persist(e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| PipelineError::io(&path, e))
    }

    /// Load encoder and model from a binary file using bincode
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
        let (fitted, _len): (Self, usize) = bincode::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| PipelineError::Persist(e.to_string()))?;
        Ok(fitted)
    }
}

fn fit_rows(
    prepared: &Prepared,
    encoder: &OneHotEncoder,
    rows: Option<&[usize]>,
    cox: &CoxConfig,
) -> Result<CoxModel> {
    let (x, targets): (Array2<f64>, Vec<SurvivalTarget>) = match rows {
        Some(rows) => (
            encoder.transform(&prepared.train.select_rows(rows))?,
            rows.iter().map(|&i| prepared.targets[i]).collect(),
        ),
        None => (encoder.transform(&prepared.train)?, prepared.targets.clone()),
    };
    CoxModel::fit(&x, &targets, encoder.feature_names(), cox)
}

/// Encode the training features (levels learned from train only) and fit the
/// Cox model on all training rows.
pub fn fit_model(prepared: &Prepared, cox: &CoxConfig) -> Result<FittedModel> {
    let encoder = OneHotEncoder::fit(&prepared.train);
    info!("encoded feature columns: {:?}", encoder.feature_names());
    let model = fit_rows(prepared, &encoder, None, cox)?;
    Ok(FittedModel { encoder, model })
}

/// Hold out part of the training rows, fit on the rest and score the
/// held-out predictions.
///
/// A split that cannot be scored (an empty part, or no events left to fit
/// on) only skips the score; it never stops the submission.
pub fn validation_score(
    prepared: &Prepared,
    encoder: &OneHotEncoder,
    config: &PipelineConfig,
) -> Result<Option<ValidationReport>> {
    if config.validation_fraction == 0.0 {
        return Ok(None);
    }
    let (fit_idx, val_idx) = PatientTable::split_indices(
        prepared.train.nrows(),
        1.0 - config.validation_fraction,
        config.seed,
    );
    if val_idx.is_empty() || fit_idx.is_empty() {
        warn!(
            "validation fraction {} leaves {} rows to fit and {} to validate; skipping the score",
            config.validation_fraction,
            fit_idx.len(),
            val_idx.len()
        );
        return Ok(None);
    }
    if !fit_idx.iter().any(|&i| prepared.targets[i].event) {
        warn!(
            "no events among the {} rows kept for fitting (seed {}); skipping the score",
            fit_idx.len(),
            config.seed
        );
        return Ok(None);
    }

    let model = fit_rows(prepared, encoder, Some(fit_idx.as_slice()), &config.cox)?;
    let validation = prepared.train.select_rows(&val_idx);
    let x_val = encoder.transform(&validation)?;
    let predictions =
        ProbabilityTable::from_model(&model, &x_val, &config.id_col, &validation.ids, config.horizon())?;

    let actual: Vec<SurvivalTarget> = val_idx.iter().map(|&i| prepared.targets[i]).collect();
    let weights = calc_weights(&prepared.targets);
    let brier_score = brier_score_loss_weighted(&predictions, &actual, &weights, config.years_cutoff)?;

    Ok(Some(ValidationReport {
        n_fit: fit_idx.len(),
        n_validation: val_idx.len(),
        years_cutoff: config.years_cutoff,
        brier_score,
    }))
}

/// Load, prepare, fit, score, predict and write the submission.
pub fn run(config: &PipelineConfig) -> Result<RunOutput> {
    config.validate()?;

    let train = PatientTable::from_file(config.train_path(), &config.id_col, config.delimiter)?;
    let test = PatientTable::from_file(config.test_path(), &config.id_col, config.delimiter)?;

    let prepared = prepare(
        &train,
        &test,
        &config.features,
        &config.event_col,
        &config.time_col,
    )?;

    let fitted = fit_model(&prepared, &config.cox)?;
    info!("The cox model:\n{}", fitted.model);

    let validation = validation_score(&prepared, &fitted.encoder, config)?;
    if let Some(v) = &validation {
        info!(
            "weighted brier score on {} held-out patients ({} years): {:.5}",
            v.n_validation, v.years_cutoff, v.brier_score
        );
    }

    let predictions = fitted.predict(&prepared.test, &test.id_col, config.horizon())?;
    debug_assert!(predictions.is_monotone());

    let submission = config.submission_path();
    write_submission(&predictions, &submission)?;

    if let Some(path) = &config.model_file {
        fitted.to_file(path)?;
        info!("Cox model and encoder saved to file {}", path.display());
    }

    let report = RunReport {
        n_train: train.nrows(),
        n_test: test.nrows(),
        categorical_columns: prepared.categorical_columns().into_iter().collect(),
        factors: fitted.encoder.factors(),
        coefficients: fitted
            .model
            .feature_names
            .iter()
            .zip(fitted.model.coefficients.iter())
            .zip(fitted.model.std_errors.iter())
            .map(|((feature, &coefficient), &std_error)| CoefficientReport {
                feature: feature.clone(),
                coefficient,
                hazard_ratio: coefficient.exp(),
                std_error,
            })
            .collect(),
        converged: fitted.model.converged,
        iterations: fitted.model.n_iter,
        validation,
        submission: submission.display().to_string(),
    };
    if let Some(path) = &config.report_file {
        report.to_file(path)?;
        info!("run report written to {}", path.display());
    }

    Ok(RunOutput {
        report,
        model: fitted.model,
        predictions,
    })
}
