//! # The Pipeline Store
//!
//! Discovers and owns every servable disease model. The store is built once
//! at process start by scanning an artifact directory and is immutable
//! afterward; there is no reload short of a process restart, and post-load it
//! is safe to share across threads because nothing is ever mutated.
//!
//! Artifact layout inside the directory:
//!
//! ```text
//! feature_manifest.json        required; fatal if missing or unparsable
//! <disease_id>.pipeline.toml   the fitted preprocessing + classifier pipeline
//! <disease_id>.labels.toml     the paired label decoder
//! <disease_id>.reference.csv   the frozen training-feature snapshot
//! ```
//!
//! The disease id is derived from the pipeline filename; the decoder and
//! reference files pair by sharing that id. A pipeline whose companions are
//! absent or inconsistent is skipped with one logged warning. Partial
//! availability is expected: a condition may be retired or not yet trained,
//! and that must never prevent the remaining conditions from being served.

use crate::labels::{LabelDecoder, LabelError};
use crate::manifest::{FeatureManifest, ManifestError};
use crate::pipeline::{BoostedPipeline, PipelineError, RiskModel};
use crate::reference::{ReferenceDataset, ReferenceError};
use crate::schema::{RecordSchema, SchemaError};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Exact required name of the manifest file.
pub const MANIFEST_FILE_NAME: &str = "feature_manifest.json";
/// Filename suffixes pairing the per-disease artifacts.
pub const PIPELINE_SUFFIX: &str = ".pipeline.toml";
pub const LABELS_SUFFIX: &str = ".labels.toml";
pub const REFERENCE_SUFFIX: &str = ".reference.csv";

/// Fatal load failures. Anything that only disables a single disease is
/// logged and skipped instead of surfacing here.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to scan artifact directory '{path}': {source}")]
    UnreadableDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Reasons a single disease is excluded at load time. Never fatal.
#[derive(Error, Debug)]
enum DiseaseLoadError {
    #[error("missing label decoder '{0}'")]
    MissingDecoder(String),
    #[error("missing reference dataset '{0}'")]
    MissingReference(String),
    #[error("disease is not listed in the feature manifest")]
    NotInManifest,
    #[error(
        "pipeline feature order {pipeline:?} does not match the manifest entry {manifest:?}"
    )]
    FeatureOrderMismatch {
        manifest: Vec<String>,
        pipeline: Vec<String>,
    },
    #[error("pipeline artifact: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("label decoder artifact: {0}")]
    Labels(#[from] LabelError),
    #[error("reference dataset artifact: {0}")]
    Reference(#[from] ReferenceError),
    #[error("field declarations conflict with an already-loaded model: {0}")]
    SchemaConflict(#[from] SchemaError),
}

/// Everything the engine needs to serve one disease. Owned exclusively by
/// the store for the process lifetime.
pub struct DiseaseModel {
    pub disease_id: String,
    /// The ordered feature names this model's pipeline expects, copied from
    /// the manifest entry at load time.
    pub features: Vec<String>,
    pub pipeline: Box<dyn RiskModel>,
    pub decoder: LabelDecoder,
    pub reference: Arc<ReferenceDataset>,
}

impl std::fmt::Debug for DiseaseModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiseaseModel")
            .field("disease_id", &self.disease_id)
            .field("features", &self.features)
            .field("classes", &self.decoder.len())
            .field("reference_rows", &self.reference.len())
            .finish()
    }
}

/// The loaded, immutable set of disease models plus the feature manifest.
#[derive(Debug)]
pub struct PipelineStore {
    manifest: FeatureManifest,
    models: BTreeMap<String, DiseaseModel>,
    schema: RecordSchema,
}

impl PipelineStore {
    /// Scans `dir` and loads every complete disease model.
    ///
    /// The manifest is mandatory; every per-disease problem degrades to a
    /// warning and a skip so that one retired or half-trained condition can
    /// never take the whole store down.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let manifest = FeatureManifest::load(&dir.join(MANIFEST_FILE_NAME))?;

        let entries = std::fs::read_dir(dir).map_err(|source| StoreError::UnreadableDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        // Candidate disease ids come from pipeline filenames. Sorting keeps
        // load order, logging, and schema-conflict resolution deterministic.
        let mut candidates: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| {
                name.strip_suffix(PIPELINE_SUFFIX)
                    .map(|stem| stem.to_string())
            })
            .collect();
        candidates.sort_unstable();

        let mut models = BTreeMap::new();
        let mut schema = RecordSchema::new();
        for disease_id in candidates {
            match Self::load_disease(dir, &disease_id, &manifest, &mut schema) {
                Ok(model) => {
                    info!(
                        "loaded disease model '{}' ({} features, {} classes, {} reference rows)",
                        disease_id,
                        model.features.len(),
                        model.decoder.len(),
                        model.reference.len()
                    );
                    models.insert(disease_id, model);
                }
                Err(reason) => {
                    warn!("skipping disease model '{disease_id}': {reason}");
                }
            }
        }

        if models.is_empty() {
            warn!(
                "no servable disease models found in '{}'; predictions will be empty",
                dir.display()
            );
        }

        Ok(Self {
            manifest,
            models,
            schema,
        })
    }

    fn load_disease(
        dir: &Path,
        disease_id: &str,
        manifest: &FeatureManifest,
        schema: &mut RecordSchema,
    ) -> Result<DiseaseModel, DiseaseLoadError> {
        let features = manifest
            .features(disease_id)
            .ok_or(DiseaseLoadError::NotInManifest)?
            .to_vec();

        let labels_path = dir.join(format!("{disease_id}{LABELS_SUFFIX}"));
        if !labels_path.is_file() {
            return Err(DiseaseLoadError::MissingDecoder(
                labels_path.display().to_string(),
            ));
        }
        let reference_path = dir.join(format!("{disease_id}{REFERENCE_SUFFIX}"));
        if !reference_path.is_file() {
            return Err(DiseaseLoadError::MissingReference(
                reference_path.display().to_string(),
            ));
        }

        let pipeline = BoostedPipeline::load(&dir.join(format!("{disease_id}{PIPELINE_SUFFIX}")))?;

        // The manifest entry and the pipeline's own encoder order must agree
        // exactly. An order drift between the two silently permutes model
        // inputs, so it disqualifies the disease outright.
        let pipeline_order: Vec<String> =
            pipeline.preprocessor.feature_names().map(String::from).collect();
        if pipeline_order != features {
            return Err(DiseaseLoadError::FeatureOrderMismatch {
                manifest: features,
                pipeline: pipeline_order,
            });
        }

        let decoder = LabelDecoder::load(&labels_path)?;
        let reference =
            ReferenceDataset::load(&reference_path, &pipeline.preprocessor.feature_fields())?;

        // Merge into a scratch copy first: a conflicting model is skipped
        // and must leave no trace of its declarations in the union schema.
        let mut merged = schema.clone();
        merged.merge(&pipeline.preprocessor.record_schema())?;
        *schema = merged;

        Ok(DiseaseModel {
            disease_id: disease_id.to_string(),
            features,
            pipeline: Box::new(pipeline),
            decoder,
            reference: Arc::new(reference),
        })
    }

    /// Looks up one disease model. Absence means the disease was never
    /// loaded, which callers must treat as "unavailable", not "low risk".
    pub fn get(&self, disease_id: &str) -> Option<&DiseaseModel> {
        self.models.get(disease_id)
    }

    /// All loaded models in stable id order.
    pub fn diseases(&self) -> impl Iterator<Item = &DiseaseModel> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn manifest(&self) -> &FeatureManifest {
        &self.manifest
    }

    /// The union field schema across every loaded model, for validating
    /// records at the construction boundary.
    pub fn record_schema(&self) -> &RecordSchema {
        &self.schema
    }
}
