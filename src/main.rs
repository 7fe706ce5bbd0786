// src/main.rs

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use cox_submission::cox::CoxConfig;
use cox_submission::PipelineConfig;

/// Fit a Cox model on train.csv, predict survival curves for test.csv and
/// write the T0..T120 submission table.
#[derive(Parser, Debug)]
#[clap(author = "Cox submission CLI", version = "0.1", about = "train/test CSV -> Cox -> T0..T120 submission")]
struct Args {
    /// Folder holding the input files
    #[clap(long, default_value = ".")]
    data_dir: PathBuf,

    /// Training file name inside the data folder
    #[clap(long, default_value = "train.csv")]
    train: String,

    /// Test file name inside the data folder
    #[clap(long, default_value = "test.csv")]
    test: String,

    /// Folder the submission is written to
    #[clap(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Submission file name
    #[clap(long, default_value = "sample-submission-cox.csv")]
    output: String,

    /// Name of the patient ID column: falls back to the first column
    #[clap(short, long, default_value = "ID")]
    id_col: String,

    /// Name of the event column (boolean-like)
    #[clap(short, long, default_value = "specific_death")]
    event_col: String,

    /// Name of the survival time column (months)
    #[clap(short, long, default_value = "months_survival")]
    time_col: String,

    /// Comma-separated feature columns
    #[clap(short, long, value_delimiter = ',', default_value = "age,cutaneous_biopsy_breslow")]
    features: Vec<String>,

    /// CSV delimiter ("tab" or "\t" for tab separated files)
    #[clap(short = 'd', long, default_value = ",")]
    delimiter: String,

    /// Share of the training rows held out to compute the weighted Brier score (0 = skip)
    #[clap(long, default_value = "0.2")]
    validation_fraction: f64,

    /// Seed for the holdout split
    #[clap(long, default_value = "42")]
    seed: u64,

    /// Scoring cutoff in years
    #[clap(long, default_value = "10")]
    years_cutoff: f64,

    /// Ridge penalty of the Cox fit (0 = unpenalised)
    #[clap(long, default_value = "0.001")]
    alpha: f64,

    /// Maximum Newton-Raphson iterations
    #[clap(long, default_value = "100")]
    max_iter: usize,

    /// Optional file to save the fitted Cox model to
    #[clap(short = 'm', long)]
    model: Option<PathBuf>,

    /// Optional JSON report of the run
    #[clap(long)]
    report: Option<PathBuf>,
}

fn parse_delimiter(delimiter: &str) -> Result<u8> {
    match delimiter {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        d if d.len() == 1 => Ok(d.as_bytes()[0]),
        d => bail!("the delimiter must be a single byte, got '{d}'"),
    }
}

impl Args {
    fn into_config(self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            data_dir: self.data_dir,
            train_file: self.train,
            test_file: self.test,
            out_dir: self.out_dir,
            output_file: self.output,
            id_col: self.id_col,
            event_col: self.event_col,
            time_col: self.time_col,
            features: self
                .features
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            delimiter: parse_delimiter(&self.delimiter)?,
            validation_fraction: self.validation_fraction,
            seed: self.seed,
            years_cutoff: self.years_cutoff,
            cox: CoxConfig {
                alpha: self.alpha,
                max_iter: self.max_iter,
                ..CoxConfig::default()
            },
            model_file: self.model,
            report_file: self.report,
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    let output = cox_submission::run(&config).with_context(|| {
        format!(
            "pipeline failed for train '{}' / test '{}'",
            config.train_path().display(),
            config.test_path().display()
        )
    })?;

    if let Some(validation) = &output.report.validation {
        println!("Overall error: {}", validation.brier_score);
    }
    info!("{}", output.predictions);
    println!("Submission written to {}", output.report.submission);
    Ok(())
}
