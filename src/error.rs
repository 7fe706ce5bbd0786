use thiserror::Error;

/// Everything that can end a run. None of these are recovered from.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("while reading csv '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("while writing json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("while persisting the model: {0}")]
    Persist(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("column '{column}' not found in {table}; available columns: {available:?}")]
    MissingColumn {
        column: String,
        table: String,
        available: Vec<String>,
    },
    #[error("patient id '{0}' occurs more than once")]
    DuplicateId(String),
    #[error("missing value in numeric column '{column}' for patient '{patient}'")]
    MissingValue { column: String, patient: String },
    #[error("value '{value}' in numeric column '{column}' for patient '{patient}' is not finite")]
    NonFinite {
        column: String,
        patient: String,
        value: String,
    },
    #[error("invalid survival target for patient '{patient}': {reason}")]
    InvalidTarget { patient: String, reason: String },
    #[error("level '{level}' of column '{column}' was not seen in the training data")]
    UnseenLevel { column: String, level: String },
    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("model fit failed: {0}")]
    Fit(String),
    #[error("format violation: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn csv(path: impl AsRef<std::path::Path>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
