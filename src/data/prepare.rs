use std::collections::BTreeSet;

use log::info;

use crate::data::patient_table::{is_missing, PatientTable};
use crate::error::{PipelineError, Result};

/// One observed outcome: did the event happen, and when (months).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurvivalTarget {
    pub event: bool,
    pub time: f64,
}

impl SurvivalTarget {
    /// Why this outcome cannot be used for fitting, if it cannot.
    pub fn problem(&self) -> Option<String> {
        if !self.time.is_finite() {
            Some(format!("survival time {} is not finite", self.time))
        } else if self.time < 0.0 {
            Some(format!("negative survival time {}", self.time))
        } else if self.event && self.time <= 0.0 {
            Some(format!("event recorded at non-positive time {}", self.time))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureColumn {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl FeatureColumn {
    pub fn is_categorical(&self) -> bool {
        matches!(self, FeatureColumn::Categorical(_))
    }

    fn select(&self, rows: &[usize]) -> FeatureColumn {
        match self {
            FeatureColumn::Numeric(v) => FeatureColumn::Numeric(rows.iter().map(|&i| v[i]).collect()),
            FeatureColumn::Categorical(v) => {
                FeatureColumn::Categorical(rows.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

/// Selected feature columns of one table, typed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureFrame {
    pub fn nrows(&self) -> usize {
        self.ids.len()
    }

    pub fn categorical_columns(&self) -> BTreeSet<String> {
        self.names
            .iter()
            .zip(self.columns.iter())
            .filter(|(_, col)| col.is_categorical())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.names.iter().position(|n| n == name).map(|i| &self.columns[i])
    }

    pub fn select_rows(&self, rows: &[usize]) -> FeatureFrame {
        FeatureFrame {
            ids: rows.iter().map(|&i| self.ids[i].clone()).collect(),
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
        }
    }
}

/// Output of [`prepare`]: typed train/test features and the training targets.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub train: FeatureFrame,
    pub test: FeatureFrame,
    pub targets: Vec<SurvivalTarget>,
}

impl Prepared {
    pub fn categorical_columns(&self) -> BTreeSet<String> {
        self.train.categorical_columns()
    }
}

/// Boolean-like event cell: 1/0, true/false, yes/no, t/f, or any number > 0.
pub fn parse_event(value: &str) -> Option<bool> {
    let v = value.trim();
    match v.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => v.parse::<f64>().ok().filter(|x| x.is_finite()).map(|x| x > 0.0),
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

/// Columns (out of `features`) holding at least one non-numeric, non-missing
/// cell in either table. Both tables get the same set.
pub fn detect_categorical(
    train: &PatientTable,
    test: &PatientTable,
    features: &[String],
) -> Result<BTreeSet<String>> {
    let mut categorical = BTreeSet::new();
    for name in features {
        let train_col = train.column(name, "train")?;
        let test_col = test.column(name, "test")?;
        let non_numeric = train_col
            .iter()
            .chain(test_col.iter())
            .any(|v| !is_missing(v) && parse_number(v).is_none());
        if non_numeric {
            categorical.insert(name.clone());
        }
    }
    Ok(categorical)
}

fn feature_frame(
    table: &PatientTable,
    table_name: &str,
    features: &[String],
    categorical: &BTreeSet<String>,
) -> Result<FeatureFrame> {
    let mut columns = Vec::with_capacity(features.len());
    for name in features {
        let cells = table.column(name, table_name)?;
        let column = if categorical.contains(name) {
            FeatureColumn::Categorical(cells.iter().map(|c| c.to_string()).collect())
        } else {
            let mut values = Vec::with_capacity(cells.len());
            for (row, cell) in cells.iter().enumerate() {
                // categorical detection already ruled out unparseable cells
                match parse_number(cell) {
                    Some(v) if v.is_finite() => values.push(v),
                    Some(v) if !v.is_nan() => {
                        return Err(PipelineError::NonFinite {
                            column: name.clone(),
                            patient: table.ids[row].clone(),
                            value: cell.to_string(),
                        })
                    }
                    _ => {
                        return Err(PipelineError::MissingValue {
                            column: name.clone(),
                            patient: table.ids[row].clone(),
                        })
                    }
                }
            }
            FeatureColumn::Numeric(values)
        };
        columns.push(column);
    }
    Ok(FeatureFrame {
        ids: table.ids.clone(),
        names: features.to_vec(),
        columns,
    })
}

/// Parse the event indicator and time-to-event columns of the training table.
pub fn targets(train: &PatientTable, event_col: &str, time_col: &str) -> Result<Vec<SurvivalTarget>> {
    let events = train.column(event_col, "train")?;
    let times = train.column(time_col, "train")?;

    events
        .iter()
        .zip(times.iter())
        .zip(train.ids.iter())
        .map(|((e, t), id)| {
            let event = parse_event(e).ok_or_else(|| PipelineError::InvalidTarget {
                patient: id.clone(),
                reason: format!("'{e}' in '{event_col}' is not a boolean"),
            })?;
            let time = parse_number(t)
                .filter(|x| !x.is_nan())
                .ok_or_else(|| PipelineError::InvalidTarget {
                    patient: id.clone(),
                    reason: format!("'{t}' in '{time_col}' is not a number"),
                })?;
            let target = SurvivalTarget { event, time };
            match target.problem() {
                Some(reason) => Err(PipelineError::InvalidTarget {
                    patient: id.clone(),
                    reason,
                }),
                None => Ok(target),
            }
        })
        .collect()
}

/// Select features, type them consistently in both tables and extract the
/// training targets.
pub fn prepare(
    train: &PatientTable,
    test: &PatientTable,
    features: &[String],
    event_col: &str,
    time_col: &str,
) -> Result<Prepared> {
    for target in [event_col, time_col] {
        if features.iter().any(|f| f == target) {
            return Err(PipelineError::Config(format!(
                "target column '{target}' cannot also be a feature"
            )));
        }
    }

    let categorical = detect_categorical(train, test, features)?;
    if !categorical.is_empty() {
        info!("categorical feature columns: {:?}", categorical);
    }

    let prepared = Prepared {
        train: feature_frame(train, "train", features, &categorical)?,
        test: feature_frame(test, "test", features, &categorical)?,
        targets: targets(train, event_col, time_col)?,
    };
    debug_assert_eq!(
        prepared.train.categorical_columns(),
        prepared.test.categorical_columns()
    );
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> PatientTable {
        PatientTable::from_rows(
            "ID",
            headers.iter().map(|h| h.to_string()).collect(),
            (0..rows.len()).map(|i| format!("p{i}")).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_event() {
        assert_eq!(parse_event("True"), Some(true));
        assert_eq!(parse_event("0"), Some(false));
        assert_eq!(parse_event("1.0"), Some(true));
        assert_eq!(parse_event("no"), Some(false));
        assert_eq!(parse_event("maybe"), None);
        assert_eq!(parse_event(""), None);
    }

    #[test]
    fn test_categorical_set_is_shared() {
        // 'stage' is numeric-looking in train but not in test
        let train = table(
            &["age", "stage", "specific_death", "months_survival"],
            &[&["50", "1", "1", "10"], &["60", "2", "0", "24"]],
        );
        let test = table(&["age", "stage"], &[&["55", "IIb"]]);

        let prepared = prepare(
            &train,
            &test,
            &names(&["age", "stage"]),
            "specific_death",
            "months_survival",
        )
        .unwrap();

        let expected: BTreeSet<String> = ["stage".to_string()].into_iter().collect();
        assert_eq!(prepared.train.categorical_columns(), expected);
        assert_eq!(prepared.test.categorical_columns(), expected);
        assert_eq!(
            prepared.targets,
            vec![
                SurvivalTarget { event: true, time: 10.0 },
                SurvivalTarget { event: false, time: 24.0 },
            ]
        );
    }

    #[test]
    fn test_missing_numeric_value_fails() {
        let train = table(
            &["age", "specific_death", "months_survival"],
            &[&["50", "1", "10"], &["NA", "0", "24"]],
        );
        let test = table(&["age"], &[&["55"]]);
        let err = prepare(&train, &test, &names(&["age"]), "specific_death", "months_survival")
            .unwrap_err();
        assert!(
            matches!(&err, PipelineError::MissingValue { column, patient } if column == "age" && patient == "p1"),
            "got {err}"
        );
    }

    #[test]
    fn test_bad_target_is_rejected() {
        let train = table(
            &["age", "specific_death", "months_survival"],
            &[&["50", "dead?", "10"]],
        );
        let err = targets(&train, "specific_death", "months_survival").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTarget { .. }));
    }

    #[test]
    fn test_bad_target_names_the_patient() {
        let train = table(
            &["age", "specific_death", "months_survival"],
            &[&["50", "1", "10"], &["60", "0", "-3"], &["70", "1", "inf"]],
        );
        match targets(&train, "specific_death", "months_survival") {
            Err(PipelineError::InvalidTarget { patient, reason }) => {
                assert_eq!(patient, "p1");
                assert!(reason.contains("negative"), "got {reason}");
            }
            other => panic!("expected InvalidTarget, got {other:?}"),
        }
    }

    #[test]
    fn test_infinite_feature_is_rejected() {
        let train = table(
            &["age", "specific_death", "months_survival"],
            &[&["50", "1", "10"], &["60", "0", "24"]],
        );
        let test = table(&["age"], &[&["-Infinity"]]);
        let err = prepare(&train, &test, &names(&["age"]), "specific_death", "months_survival")
            .unwrap_err();
        assert!(
            matches!(&err, PipelineError::NonFinite { column, patient, .. } if column == "age" && patient == "p0"),
            "got {err}"
        );
    }

    #[test]
    fn test_feature_missing_in_test() {
        let train = table(&["age", "e", "t"], &[&["50", "1", "10"]]);
        let test = table(&["weight"], &[&["55"]]);
        let err = prepare(&train, &test, &names(&["age"]), "e", "t").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { table, .. } if table == "test"));
    }

    #[test]
    fn test_select_rows_keeps_types() {
        let train = table(
            &["age", "sex", "e", "t"],
            &[&["50", "m", "1", "10"], &["60", "f", "0", "24"], &["70", "m", "1", "36"]],
        );
        let prepared = prepare(&train, &train, &names(&["age", "sex"]), "e", "t").unwrap();
        let sub = prepared.train.select_rows(&[2, 0]);
        assert_eq!(sub.ids, vec!["p2", "p0"]);
        assert_eq!(sub.column("age"), Some(&FeatureColumn::Numeric(vec![70.0, 50.0])));
        assert_eq!(
            sub.column("sex"),
            Some(&FeatureColumn::Categorical(vec!["m".into(), "f".into()]))
        );
    }
}
