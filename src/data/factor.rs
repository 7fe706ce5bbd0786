use std::collections::HashMap;
use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::data::patient_table::is_missing;
use crate::error::{PipelineError, Result};

/// Level used for missing categorical cells.
pub const MISSING_LEVEL: &str = "NA";

/// Only save labels in JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorJson {
    pub column: String,
    pub levels: Vec<String>,
    pub reference: Option<String>,
    pub one_hot_columns: Vec<String>,
}

/// The levels of one categorical column, in order of first appearance.
///
/// The first level is the reference level: it gets no indicator column when
/// the factor is one-hot expanded.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Factor {
    pub column_name: String,
    levels: Vec<String>,
    level_to_index: HashMap<String, usize>,
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Factor '{}':", self.column_name)?;
        writeln!(f, "  Levels: {:?}", self.levels)?;
        writeln!(f, "  One-hot columns: {:?}", self.one_hot_columns())
    }
}

fn normalise(value: &str) -> &str {
    let trimmed = value.trim();
    if is_missing(trimmed) {
        MISSING_LEVEL
    } else {
        trimmed
    }
}

impl Factor {
    pub fn new(column_name: &str) -> Self {
        Factor {
            column_name: column_name.to_string(),
            levels: Vec::new(),
            level_to_index: HashMap::new(),
        }
    }

    /// Learn all levels of a column.
    pub fn from_values<'a, I: IntoIterator<Item = &'a str>>(column_name: &str, values: I) -> Self {
        let mut factor = Self::new(column_name);
        for value in values {
            factor.push(value);
        }
        factor
    }

    /// Register a value, returning its level index.
    pub fn push(&mut self, value: &str) -> usize {
        let level = normalise(value);
        if let Some(&i) = self.level_to_index.get(level) {
            return i;
        }
        let new_idx = self.levels.len();
        self.levels.push(level.to_string());
        self.level_to_index.insert(level.to_string(), new_idx);
        new_idx
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.level_to_index.get(normalise(value)).copied()
    }

    pub fn get_levels(&self) -> &[String] {
        &self.levels
    }

    fn build_one_hot_column(&self, level: &str) -> String {
        format!("{}_{}", self.column_name, level)
    }

    /// Names of the indicator columns; the reference level is left out.
    pub fn one_hot_columns(&self) -> Vec<String> {
        self.levels
            .iter()
            .skip(1)
            .map(|lvl| self.build_one_hot_column(lvl))
            .collect()
    }

    /// Write the indicator values for `value` into `out`
    /// (`out.len()` must equal `levels - 1`).
    pub fn encode_into(&self, value: &str, out: &mut [f64]) -> Result<()> {
        let idx = self.index_of(value).ok_or_else(|| PipelineError::UnseenLevel {
            column: self.column_name.clone(),
            level: normalise(value).to_string(),
        })?;
        out.iter_mut().for_each(|v| *v = 0.0);
        if idx > 0 {
            out[idx - 1] = 1.0;
        }
        Ok(())
    }

    pub fn as_json(&self) -> FactorJson {
        FactorJson {
            column: self.column_name.clone(),
            levels: self.levels.clone(),
            reference: self.levels.first().cloned(),
            one_hot_columns: self.one_hot_columns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_first_appearance_order() {
        let mut f = Factor::new("Color");
        assert_eq!(f.push("Red"), 0, "new factor Red gets 0");
        assert_eq!(f.push("Blue"), 1, "new factor Blue gets 1");
        assert_eq!(f.push(" Red "), 0, "Red is trimmed and found again");
        assert_eq!(f.push("NA"), 2);
        assert_eq!(f.push(""), 2, "empty cells share the NA level");
        assert_eq!(f.get_levels(), &["Red", "Blue", "NA"]);
    }

    #[test]
    fn test_one_hot_drops_reference_level() {
        let f = Factor::from_values("Color", ["Red", "Blue", "Green", "Blue"]);
        assert_eq!(f.one_hot_columns(), vec!["Color_Blue", "Color_Green"]);

        let mut out = vec![9.0; 2];
        f.encode_into("Red", &mut out).unwrap();
        assert_eq!(out, vec![0.0, 0.0]);
        f.encode_into("Green", &mut out).unwrap();
        assert_eq!(out, vec![0.0, 1.0]);
    }

    #[test]
    fn test_unseen_level_is_an_error() {
        let f = Factor::from_values("Color", ["Red", "Blue"]);
        let mut out = vec![0.0; 1];
        match f.encode_into("Purple", &mut out) {
            Err(PipelineError::UnseenLevel { column, level }) => {
                assert_eq!(column, "Color");
                assert_eq!(level, "Purple");
            }
            other => panic!("expected UnseenLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_as_json() {
        let f = Factor::from_values("sex", ["male", "female"]);
        let json = f.as_json();
        assert_eq!(json.reference.as_deref(), Some("male"));
        assert_eq!(json.one_hot_columns, vec!["sex_female"]);
        let text = serde_json::to_string(&json).unwrap();
        let back: FactorJson = serde_json::from_str(&text).unwrap();
        assert_eq!(back, json);
    }
}
