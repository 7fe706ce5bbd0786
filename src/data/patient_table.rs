use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use crate::error::{PipelineError, Result};

/// Raw patient records as read from disk: one row per patient, keyed by id.
///
/// Cells are kept as trimmed strings; deciding which columns are numeric
/// happens later, once train and test can be looked at together.
#[derive(Debug, Clone, Default)]
pub struct PatientTable {
    pub id_col: String,
    pub ids: Vec<String>,
    pub headers: Vec<String>,
    rows: Vec<Vec<String>>,
    header_lookup: HashMap<String, usize>,
}

impl fmt::Display for PatientTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PatientTable indexed by '{}':", self.id_col)?;
        writeln!(f, "Rows: {}, Columns: {}", self.nrows(), self.headers.len())?;
        for (idx, header) in self.headers.iter().enumerate() {
            writeln!(f, "  {}: {}", idx, header)?;
        }
        Ok(())
    }
}

/// `""`, `NA` and `NaN` all mean "no value".
pub fn is_missing(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("NA") || value.eq_ignore_ascii_case("NaN")
}

impl PatientTable {
    /// Read a delimited file. The id column is `id_col` when present in the
    /// header, otherwise the first column.
    pub fn from_file<P: AsRef<Path>>(file_path: P, id_col: &str, delimiter: u8) -> Result<Self> {
        let path = file_path.as_ref();
        if !path.exists() {
            return Err(PipelineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            ));
        }

        let mut rdr = ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(Trim::All)
            .from_path(path)
            .map_err(|e| PipelineError::csv(path, e))?;

        let all_headers: Vec<String> = rdr
            .headers()
            .map_err(|e| PipelineError::csv(path, e))?
            .iter()
            .map(|s| s.to_string())
            .collect();
        if all_headers.is_empty() {
            return Err(PipelineError::Format(format!("'{}' has no header", path.display())));
        }

        let id_idx = all_headers.iter().position(|h| h == id_col).unwrap_or(0);
        let id_name = all_headers[id_idx].clone();
        if id_name != id_col {
            debug!("id column '{id_col}' not in '{}', using first column '{id_name}'", path.display());
        }

        let mut ret = PatientTable {
            id_col: id_name,
            headers: all_headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_idx)
                .map(|(_, h)| h.clone())
                .collect(),
            ..Default::default()
        };
        ret.header_lookup = ret
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();

        // the csv reader rejects ragged rows on its own
        let mut seen: HashMap<String, usize> = HashMap::new();
        for result in rdr.records() {
            let record = result.map_err(|e| PipelineError::csv(path, e))?;
            let id = record.get(id_idx).unwrap_or_default().trim_matches('"').to_string();
            if seen.insert(id.clone(), ret.ids.len()).is_some() {
                return Err(PipelineError::DuplicateId(id));
            }
            let row: Vec<String> = record
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_idx)
                .map(|(_, v)| v.trim_matches('"').to_string())
                .collect();
            ret.ids.push(id);
            ret.rows.push(row);
        }

        info!(
            "Data loaded from '{}': {} patients {} data columns",
            path.display(),
            ret.nrows(),
            ret.headers.len()
        );
        Ok(ret)
    }

    /// Build a table in memory; every row must have one cell per header.
    pub fn from_rows(
        id_col: &str,
        headers: Vec<String>,
        ids: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self> {
        if ids.len() != rows.len() {
            return Err(PipelineError::Format(format!(
                "{} ids for {} rows",
                ids.len(),
                rows.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (id, row) in ids.iter().zip(rows.iter()) {
            if !seen.insert(id.as_str()) {
                return Err(PipelineError::DuplicateId(id.clone()));
            }
            if row.len() != headers.len() {
                return Err(PipelineError::Format(format!(
                    "row '{}' has {} cells, expected {}",
                    id,
                    row.len(),
                    headers.len()
                )));
            }
        }
        let header_lookup = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Ok(PatientTable {
            id_col: id_col.to_string(),
            ids,
            headers,
            rows,
            header_lookup,
        })
    }

    pub fn nrows(&self) -> usize {
        self.ids.len()
    }

    /// All cells of one column, in row order.
    pub fn column(&self, name: &str, table: &str) -> Result<Vec<&str>> {
        let idx = *self
            .header_lookup
            .get(name)
            .ok_or_else(|| PipelineError::MissingColumn {
                column: name.to_string(),
                table: table.to_string(),
                available: self.headers.clone(),
            })?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Keep the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> PatientTable {
        PatientTable {
            id_col: self.id_col.clone(),
            ids: rows.iter().map(|&i| self.ids[i].clone()).collect(),
            headers: self.headers.clone(),
            rows: rows.iter().map(|&i| self.rows[i].clone()).collect(),
            header_lookup: self.header_lookup.clone(),
        }
    }

    /// Shuffle row indices with a seeded rng and cut them at `train_fraction`.
    pub fn split_indices(n_rows: usize, train_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..n_rows).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let train_size = (n_rows as f64 * train_fraction).round() as usize;
        let test_idx = indices.split_off(train_size.min(n_rows));
        (indices, test_idx)
    }
}
