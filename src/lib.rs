pub mod config;
pub mod cox;
pub mod curve;
pub mod data;
pub mod encode;
pub mod error;
pub mod pipeline;
pub mod probability;
pub mod score;
pub mod submission;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{run, RunOutput, RunReport};
