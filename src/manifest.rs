//! The feature manifest: for each disease, the authoritative ordered list of
//! input field names its pipeline expects.
//!
//! The manifest is written once by the training process and read once at
//! startup. The per-disease order is an exact contract with both the trained
//! pipeline and the reference dataset; this module only carries it, it never
//! re-derives or normalises it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read feature manifest '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("feature manifest '{path}' is not a valid JSON object of feature lists: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Disease id to ordered feature names. Read-only for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureManifest {
    entries: BTreeMap<String, Vec<String>>,
}

impl FeatureManifest {
    /// Loads the manifest from a JSON file. Any failure here is fatal to the
    /// caller: without the manifest no disease can be served.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_entries<D, F, N>(entries: D) -> Self
    where
        D: IntoIterator<Item = (N, F)>,
        F: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(id, features)| {
                    (
                        id.into(),
                        features.into_iter().map(Into::into).collect(),
                    )
                })
                .collect(),
        }
    }

    /// The ordered feature list for one disease, if the manifest knows it.
    pub fn features(&self, disease_id: &str) -> Option<&[String]> {
        self.entries.get(disease_id).map(Vec::as_slice)
    }

    pub fn disease_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_feature_lists_in_declared_order() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"diabetes": ["lv_glucose", "lv_HbA1c", "lv_age"], "obesity": ["lv_bmi"]}}"#
        )
        .unwrap();
        let manifest = FeatureManifest::load(file.path()).unwrap();
        assert_eq!(
            manifest.features("diabetes").unwrap(),
            &["lv_glucose", "lv_HbA1c", "lv_age"]
        );
        assert_eq!(manifest.features("obesity").unwrap(), &["lv_bmi"]);
        assert_eq!(manifest.features("kidney"), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = FeatureManifest::load(Path::new("/nonexistent/feature_manifest.json"))
            .unwrap_err();
        assert!(matches!(err, ManifestError::Unreadable { .. }));
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = FeatureManifest::load(file.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed { .. }));
    }
}
