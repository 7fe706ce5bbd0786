pub mod factor;
pub mod patient_table;
pub mod prepare;

pub use factor::{Factor, FactorJson};
pub use patient_table::PatientTable;
pub use prepare::{prepare, FeatureColumn, FeatureFrame, Prepared, SurvivalTarget};
