//! Frozen training-feature snapshots.
//!
//! Each trained pipeline ships with the feature matrix it was fit on, one CSV
//! row per training example, columns in the same order as the pipeline's
//! manifest entry. The snapshot is never used for inference; it exists so a
//! presentation layer can locate a new patient's value inside the historical
//! distribution of every feature.

use crate::schema::FieldKind;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to open reference dataset: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read reference dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("reference dataset has columns {found:?}, expected {expected:?}")]
    HeaderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("reference column '{column}' row {row} holds '{value}', which is not numeric")]
    BadNumeric {
        column: String,
        row: usize,
        value: String,
    },
}

/// One column of historical values, typed per the pipeline's declaration for
/// that feature. Blank numeric cells are kept as NaN so row indices stay
/// aligned across columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceColumn {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl ReferenceColumn {
    pub fn len(&self) -> usize {
        match self {
            ReferenceColumn::Numeric(v) => v.len(),
            ReferenceColumn::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The frozen training matrix for one disease.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDataset {
    names: Vec<String>,
    columns: Vec<ReferenceColumn>,
    rows: usize,
}

impl ReferenceDataset {
    /// Reads the snapshot, enforcing that the header matches `fields` exactly
    /// (names and order) and typing each column by its declared kind.
    pub fn load(path: &Path, fields: &[(String, FieldKind)]) -> Result<Self, ReferenceError> {
        let mut reader = csv::Reader::from_reader(File::open(path)?);

        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let expected: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
        if header != expected {
            return Err(ReferenceError::HeaderMismatch {
                expected,
                found: header,
            });
        }

        let mut columns: Vec<ReferenceColumn> = fields
            .iter()
            .map(|(_, kind)| match kind {
                FieldKind::Numeric => ReferenceColumn::Numeric(Vec::new()),
                FieldKind::Categorical { .. } => ReferenceColumn::Categorical(Vec::new()),
            })
            .collect();

        let mut rows = 0usize;
        for result in reader.records() {
            let record = result?;
            rows += 1;
            for (idx, cell) in record.iter().enumerate() {
                let cell = cell.trim();
                match &mut columns[idx] {
                    ReferenceColumn::Numeric(values) => {
                        if cell.is_empty() {
                            values.push(f64::NAN);
                        } else {
                            let parsed =
                                cell.parse::<f64>()
                                    .map_err(|_| ReferenceError::BadNumeric {
                                        column: fields[idx].0.clone(),
                                        row: rows,
                                        value: cell.to_string(),
                                    })?;
                            values.push(parsed);
                        }
                    }
                    ReferenceColumn::Categorical(values) => values.push(cell.to_string()),
                }
            }
        }

        Ok(Self {
            names: fields.iter().map(|(name, _)| name.clone()).collect(),
            columns,
            rows,
        })
    }

    /// Number of training examples.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of feature columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in manifest order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Historical values for one feature.
    pub fn column(&self, name: &str) -> Option<&ReferenceColumn> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
    }
}
