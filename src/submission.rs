// src/submission.rs

use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use log::info;
use ndarray::Array2;

use crate::error::{PipelineError, Result};
use crate::probability::ProbabilityTable;

/// Last month of the submission: columns `T0..=T120`.
pub const SUBMISSION_HORIZON: usize = 120;

pub fn column_name(month: usize) -> String {
    format!("T{month}")
}

/// Write `T0..T120` for every patient, in table order.
///
/// The column order is a hard requirement of the competition platform, so
/// anything that is not a contiguous 0.. grid reaching month 120 is refused.
pub fn write_submission<P: AsRef<Path>>(table: &ProbabilityTable, path: P) -> Result<()> {
    let path = path.as_ref();
    let table = table.truncate(SUBMISSION_HORIZON)?;

    let mut wtr = WriterBuilder::new()
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;

    let mut header = Vec::with_capacity(table.ncols() + 1);
    header.push(table.id_label.clone());
    header.extend(table.months.iter().map(|&m| column_name(m)));
    wtr.write_record(&header).map_err(|e| PipelineError::csv(path, e))?;

    for (id, row) in table.ids.iter().zip(table.values.rows()) {
        let mut record: Vec<String> = Vec::with_capacity(row.len() + 1);
        record.push(id.clone());
        record.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&record).map_err(|e| PipelineError::csv(path, e))?;
    }
    wtr.flush().map_err(|e| PipelineError::io(path, e))?;

    info!(
        "submission with {} patients x {} columns written to '{}'",
        table.nrows(),
        table.ncols(),
        path.display()
    );
    Ok(())
}

/// Read a submission file back, checking the `T0..T120` header.
pub fn read_submission<P: AsRef<Path>>(path: P) -> Result<ProbabilityTable> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;

    let headers = rdr.headers().map_err(|e| PipelineError::csv(path, e))?.clone();
    let expected: Vec<String> = (0..=SUBMISSION_HORIZON).map(column_name).collect();
    let found: Vec<&str> = headers.iter().skip(1).collect();
    if headers.is_empty() || found != expected.iter().map(|s| s.as_str()).collect::<Vec<_>>() {
        return Err(PipelineError::Format(format!(
            "'{}' does not have the columns T0..T{} in order",
            path.display(),
            SUBMISSION_HORIZON
        )));
    }
    let id_label = headers.get(0).unwrap_or_default().to_string();

    let mut ids = Vec::new();
    let mut flat = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| PipelineError::csv(path, e))?;
        let id = record.get(0).unwrap_or_default().to_string();
        for field in record.iter().skip(1) {
            let v = field.trim().parse::<f64>().map_err(|_| {
                PipelineError::Format(format!("'{field}' for patient '{id}' is not a number"))
            })?;
            flat.push(v);
        }
        ids.push(id);
    }

    let values = Array2::from_shape_vec((ids.len(), SUBMISSION_HORIZON + 1), flat)
        .map_err(|e| PipelineError::Format(e.to_string()))?;
    ProbabilityTable::new(&id_label, ids, (0..=SUBMISSION_HORIZON).collect(), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn decaying_table(n_rows: usize, n_cols: usize) -> ProbabilityTable {
        let values = Array2::from_shape_fn((n_rows, n_cols), |(i, m)| {
            (-(m as f64) * 0.01 * (i + 1) as f64).exp()
        });
        ProbabilityTable::new(
            "ID",
            (0..n_rows).map(|i| format!("patient_{i}")).collect(),
            (0..n_cols).collect(),
            values,
        )
        .unwrap()
    }

    #[test]
    fn test_header_is_t0_to_t120() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("sub.csv");
        write_submission(&decaying_table(2, 200), &path)?;

        let content = std::fs::read_to_string(&path)?;
        let header: Vec<&str> = content.lines().next().unwrap().split(',').collect();
        assert_eq!(header.len(), 122);
        assert_eq!(header[0], "ID");
        assert_eq!(header[1], "T0");
        assert_eq!(header[121], "T120");
        for (m, name) in header[1..].iter().enumerate() {
            assert_eq!(*name, format!("T{m}"));
        }
        assert_eq!(content.lines().count(), 3);
        Ok(())
    }

    #[test]
    fn test_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("sub.csv");
        let table = decaying_table(3, 121);
        write_submission(&table, &path)?;

        let back = read_submission(&path)?;
        assert_eq!(back.ids, table.ids);
        assert_eq!(back.months, table.months);
        for (a, b) in back.values.iter().zip(table.values.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_short_table_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub.csv");
        assert!(matches!(
            write_submission(&decaying_table(1, 120), &path),
            Err(PipelineError::Format(_))
        ));
    }

    #[test]
    fn test_wrong_header_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "ID,T1,T0\np,1,1\n").unwrap();
        assert!(matches!(read_submission(&path), Err(PipelineError::Format(_))));
    }
}
