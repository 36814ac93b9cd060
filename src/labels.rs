//! The label decoder: the inverse mapping from a classifier's integer class
//! index back to its original human-readable class name.
//!
//! The class order is fixed when the label encoder is fit during training.
//! The decoder and its paired pipeline must come from the same training run;
//! that pairing is carried by the artifact naming, not re-derived here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("failed to read or write label decoder file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse label decoder file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize label decoder: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("label decoder declares no classes")]
    NoClasses,
    #[error("class index {index} is out of range for a decoder with {classes} classes")]
    IndexOutOfRange { index: usize, classes: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDecoder {
    classes: Vec<String>,
}

impl LabelDecoder {
    pub fn new<S: Into<String>>(classes: impl IntoIterator<Item = S>) -> Result<Self, LabelError> {
        let classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        if classes.is_empty() {
            return Err(LabelError::NoClasses);
        }
        Ok(Self { classes })
    }

    pub fn decode(&self, index: usize) -> Result<&str, LabelError> {
        self.classes
            .get(index)
            .map(String::as_str)
            .ok_or(LabelError::IndexOutOfRange {
                index,
                classes: self.classes.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), LabelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, LabelError> {
        let decoder: LabelDecoder = toml::from_str(&fs::read_to_string(path)?)?;
        if decoder.classes.is_empty() {
            return Err(LabelError::NoClasses);
        }
        Ok(decoder)
    }
}
