// src/config.rs

use std::path::{Path, PathBuf};

use crate::cox::CoxConfig;
use crate::error::{PipelineError, Result};
use crate::submission::SUBMISSION_HORIZON;

/// Everything a run needs, passed explicitly to each stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub train_file: String,
    pub test_file: String,
    pub out_dir: PathBuf,
    pub output_file: String,
    pub id_col: String,
    pub event_col: String,
    pub time_col: String,
    pub features: Vec<String>,
    pub delimiter: u8,
    /// Share of the training rows held out for scoring; 0 disables scoring.
    pub validation_fraction: f64,
    pub seed: u64,
    pub years_cutoff: f64,
    pub cox: CoxConfig,
    /// Optional bincode dump of the fitted submission model.
    pub model_file: Option<PathBuf>,
    /// Optional JSON run report.
    pub report_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from("."),
            train_file: "train.csv".to_string(),
            test_file: "test.csv".to_string(),
            out_dir: PathBuf::from("."),
            output_file: "sample-submission-cox.csv".to_string(),
            id_col: "ID".to_string(),
            event_col: "specific_death".to_string(),
            time_col: "months_survival".to_string(),
            features: vec!["age".to_string(), "cutaneous_biopsy_breslow".to_string()],
            delimiter: b',',
            validation_fraction: 0.2,
            seed: 42,
            years_cutoff: 10.0,
            cox: CoxConfig::default(),
            model_file: None,
            report_file: None,
        }
    }
}

impl PipelineConfig {
    /// Configuration reading `train.csv`/`test.csv` from `data_dir` and
    /// writing into `out_dir`, otherwise defaults.
    pub fn with_dirs<P: AsRef<Path>, Q: AsRef<Path>>(data_dir: P, out_dir: Q) -> Self {
        PipelineConfig {
            data_dir: data_dir.as_ref().to_path_buf(),
            out_dir: out_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn train_path(&self) -> PathBuf {
        self.data_dir.join(&self.train_file)
    }

    pub fn test_path(&self) -> PathBuf {
        self.data_dir.join(&self.test_file)
    }

    pub fn submission_path(&self) -> PathBuf {
        self.out_dir.join(&self.output_file)
    }

    /// Months covered by the probability table: enough for the submission
    /// and for the scoring cutoff.
    pub fn horizon(&self) -> usize {
        let cutoff_months = (self.years_cutoff * crate::score::MONTHS_PER_YEAR as f64).floor() as usize;
        SUBMISSION_HORIZON.max(cutoff_months)
    }

    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(PipelineError::Config("at least one feature column is required".into()));
        }
        if !(0.0..=0.9).contains(&self.validation_fraction) {
            return Err(PipelineError::Config(format!(
                "validation fraction must be within [0, 0.9], got {}",
                self.validation_fraction
            )));
        }
        if !(self.years_cutoff > 0.0 && self.years_cutoff.is_finite()) {
            return Err(PipelineError::Config(format!(
                "years cutoff must be a positive number, got {}",
                self.years_cutoff
            )));
        }
        if !(self.cox.alpha >= 0.0 && self.cox.alpha.is_finite()) {
            return Err(PipelineError::Config(format!(
                "ridge penalty must be >= 0, got {}",
                self.cox.alpha
            )));
        }
        if self.cox.max_iter == 0 {
            return Err(PipelineError::Config("max_iter must be at least 1".into()));
        }
        if self.event_col == self.time_col {
            return Err(PipelineError::Config(
                "event and time columns must be different".into(),
            ));
        }
        Ok(())
    }
}
