//! # The Inference Engine
//!
//! Runs every loaded disease model against one health record and assembles
//! the per-disease outcomes. The store and manifest are passed in by
//! reference on every call; the engine holds no state of its own and no
//! ambient globals.
//!
//! Fault isolation is the central guarantee here: one disease failing, for
//! whatever reason, becomes a structured failure marker for that disease id
//! only. `predict_all` itself never returns an error, so a single malformed
//! pipeline can never take down the whole multi-disease scoring pass.

use crate::labels::LabelError;
use crate::pipeline::PipelineError;
use crate::reference::ReferenceDataset;
use crate::router::{self, ProjectedFeatures};
use crate::schema::HealthRecord;
use crate::store::{DiseaseModel, PipelineStore};
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("no model is loaded for disease '{0}'")]
    UnknownDisease(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(
        "disease '{disease_id}' decoder knows {classes} classes but the model returned \
         {probabilities} probabilities"
    )]
    ClassCountMismatch {
        disease_id: String,
        classes: usize,
        probabilities: usize,
    },
}

/// One disease's scored outcome. Created fresh on every call; the engine
/// never caches results.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub disease_id: String,
    /// The decoded class name the classifier chose.
    pub label: String,
    /// Confidence of the winning class: the maximum of `probability_vector`.
    /// The label itself comes from the model's own `predict` call, which is
    /// trusted to agree with that maximum rather than re-verified.
    pub probability: f64,
    pub probability_vector: Vec<f64>,
    /// The exact projected input the model saw, echoed in projection order.
    pub feature_input: ProjectedFeatures,
    /// The disease's frozen training snapshot, for distribution displays.
    /// Not part of the serialized report.
    #[serde(skip_serializing)]
    pub reference: Arc<ReferenceDataset>,
}

/// Failure kinds exposed in the serialized report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FeatureTypeMismatch,
    LabelDecode,
    ClassCountMismatch,
    Model,
}

/// The structured per-disease failure marker.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceFailure {
    pub error: FailureKind,
    pub message: String,
}

impl From<&InferenceError> for InferenceFailure {
    fn from(err: &InferenceError) -> Self {
        let kind = match err {
            InferenceError::Pipeline(PipelineError::FeatureTypeMismatch { .. }) => {
                FailureKind::FeatureTypeMismatch
            }
            InferenceError::Label(_) => FailureKind::LabelDecode,
            InferenceError::ClassCountMismatch { .. } => FailureKind::ClassCountMismatch,
            _ => FailureKind::Model,
        };
        Self {
            error: kind,
            message: err.to_string(),
        }
    }
}

/// Either a scored result or a failure marker. Serialized untagged: a scored
/// entry carries `label`, a failed one carries `error`, so the two cannot be
/// confused in the report.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DiseaseOutcome {
    Scored(PredictionResult),
    Failed(InferenceFailure),
}

impl DiseaseOutcome {
    pub fn as_scored(&self) -> Option<&PredictionResult> {
        match self {
            DiseaseOutcome::Scored(result) => Some(result),
            DiseaseOutcome::Failed(_) => None,
        }
    }

    pub fn as_failed(&self) -> Option<&InferenceFailure> {
        match self {
            DiseaseOutcome::Scored(_) => None,
            DiseaseOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// The full multi-disease scoring pass for one record. A disease absent from
/// `outcomes` was never loaded; a present-but-failed disease carries its
/// failure marker. Both are distinct from a predicted low risk.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PredictionSet {
    outcomes: BTreeMap<String, DiseaseOutcome>,
}

impl PredictionSet {
    pub fn get(&self, disease_id: &str) -> Option<&DiseaseOutcome> {
        self.outcomes.get(disease_id)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &DiseaseOutcome)> {
        self.outcomes.iter().map(|(id, o)| (id.as_str(), o))
    }

    /// Only the scored diseases.
    pub fn results(&self) -> impl Iterator<Item = &PredictionResult> {
        self.outcomes.values().filter_map(DiseaseOutcome::as_scored)
    }

    /// Only the failed diseases.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &InferenceFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| o.as_failed().map(|f| (id.as_str(), f)))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Scores one disease. Store misses and model faults surface as errors; the
/// multi-disease isolation wrapper lives in `predict_all`.
pub fn predict_one(
    store: &PipelineStore,
    disease_id: &str,
    record: &HealthRecord,
) -> Result<PredictionResult, InferenceError> {
    let model = store
        .get(disease_id)
        .ok_or_else(|| InferenceError::UnknownDisease(disease_id.to_string()))?;
    score(model, record)
}

/// Scores every loaded disease, isolating failures per disease. Never errors.
pub fn predict_all(store: &PipelineStore, record: &HealthRecord) -> PredictionSet {
    let mut outcomes = BTreeMap::new();
    for model in store.diseases() {
        let outcome = match score(model, record) {
            Ok(result) => DiseaseOutcome::Scored(result),
            Err(err) => {
                warn!("prediction failed for disease '{}': {err}", model.disease_id);
                DiseaseOutcome::Failed(InferenceFailure::from(&err))
            }
        };
        outcomes.insert(model.disease_id.clone(), outcome);
    }
    PredictionSet { outcomes }
}

fn score(model: &DiseaseModel, record: &HealthRecord) -> Result<PredictionResult, InferenceError> {
    let features = router::project(record, &model.features);

    let class_index = model.pipeline.predict(&features)?;
    let probabilities = model.pipeline.predict_proba(&features)?;

    if probabilities.len() != model.decoder.len() {
        return Err(InferenceError::ClassCountMismatch {
            disease_id: model.disease_id.clone(),
            classes: model.decoder.len(),
            probabilities: probabilities.len(),
        });
    }

    let label = model.decoder.decode(class_index)?.to_string();
    let probability = probabilities
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);

    Ok(PredictionResult {
        disease_id: model.disease_id.clone(),
        label,
        probability,
        probability_vector: probabilities.to_vec(),
        feature_input: features,
        reference: Arc::clone(&model.reference),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelDecoder;
    use crate::pipeline::{
        BoostedForest, BoostedPipeline, DecisionTree, FeatureEncoder, Preprocessor, TreeNode,
    };
    use crate::schema::FieldValue;
    use crate::store::{LABELS_SUFFIX, MANIFEST_FILE_NAME, PIPELINE_SUFFIX, REFERENCE_SUFFIX};
    use approx::assert_abs_diff_eq;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn glucose_pipeline() -> BoostedPipeline {
        BoostedPipeline {
            preprocessor: Preprocessor {
                encoders: vec![FeatureEncoder::Standardize {
                    name: "lv_glucose".into(),
                    mean: 120.0,
                    scale: 40.0,
                }],
            },
            forest: BoostedForest {
                n_classes: 2,
                base_score: vec![0.0, 0.0],
                trees: vec![DecisionTree {
                    class: 1,
                    nodes: vec![
                        TreeNode::Split {
                            feature: 0,
                            threshold: 0.0,
                            left: 1,
                            right: 2,
                            default_left: true,
                        },
                        TreeNode::Leaf { value: -2.0 },
                        TreeNode::Leaf { value: 2.0 },
                    ],
                }],
            },
        }
    }

    fn bmi_pipeline() -> BoostedPipeline {
        BoostedPipeline {
            preprocessor: Preprocessor {
                encoders: vec![FeatureEncoder::Standardize {
                    name: "lv_bmi".into(),
                    mean: 25.0,
                    scale: 5.0,
                }],
            },
            forest: BoostedForest {
                n_classes: 2,
                base_score: vec![0.0, 0.0],
                trees: vec![DecisionTree {
                    class: 1,
                    nodes: vec![
                        TreeNode::Split {
                            feature: 0,
                            threshold: 1.0,
                            left: 1,
                            right: 2,
                            default_left: true,
                        },
                        TreeNode::Leaf { value: -1.5 },
                        TreeNode::Leaf { value: 1.5 },
                    ],
                }],
            },
        }
    }

    fn demo_store() -> (TempDir, PipelineStore) {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE_NAME),
            r#"{"diabetes": ["lv_glucose"], "obesity": ["lv_bmi"]}"#,
        )
        .unwrap();

        glucose_pipeline()
            .save(&dir.path().join(format!("diabetes{PIPELINE_SUFFIX}")))
            .unwrap();
        bmi_pipeline()
            .save(&dir.path().join(format!("obesity{PIPELINE_SUFFIX}")))
            .unwrap();
        for id in ["diabetes", "obesity"] {
            LabelDecoder::new(["No", "Yes"])
                .unwrap()
                .save(&dir.path().join(format!("{id}{LABELS_SUFFIX}")))
                .unwrap();
        }
        fs::write(
            dir.path().join(format!("diabetes{REFERENCE_SUFFIX}")),
            "lv_glucose\n90\n120\n180\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(format!("obesity{REFERENCE_SUFFIX}")),
            "lv_bmi\n21\n25\n33\n",
        )
        .unwrap();

        let store = PipelineStore::load(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn predict_all_scores_every_loaded_disease() {
        let (_dir, store) = demo_store();
        let record = HealthRecord::from_pairs([
            ("lv_glucose", FieldValue::Number(180.0)),
            ("lv_bmi", FieldValue::Number(33.0)),
        ]);
        let set = predict_all(&store, &record);
        assert_eq!(set.len(), 2);
        assert_eq!(set.results().count(), 2);

        let diabetes = set.get("diabetes").unwrap().as_scored().unwrap();
        assert_eq!(diabetes.label, "Yes");
        let expected = 2.0_f64.exp() / (1.0 + 2.0_f64.exp());
        assert_abs_diff_eq!(diabetes.probability, expected, epsilon = 1e-12);
        assert_eq!(diabetes.probability_vector.len(), 2);
        assert_eq!(
            diabetes.feature_input.names().collect::<Vec<_>>(),
            vec!["lv_glucose"]
        );
        assert_eq!(diabetes.reference.len(), 3);
    }

    #[test]
    fn one_malformed_disease_does_not_abort_the_pass() {
        let (_dir, store) = demo_store();
        // lv_glucose carries a category; built unchecked, so the mismatch is
        // only discovered inside the diabetes pipeline.
        let record = HealthRecord::from_pairs([
            ("lv_glucose", FieldValue::Category("very high".into())),
            ("lv_bmi", FieldValue::Number(33.0)),
        ]);
        let set = predict_all(&store, &record);

        let diabetes = set.get("diabetes").unwrap().as_failed().unwrap();
        assert_eq!(diabetes.error, FailureKind::FeatureTypeMismatch);
        assert!(set.get("obesity").unwrap().as_scored().is_some());
    }

    #[test]
    fn missing_feature_scores_through_default_branches() {
        let (_dir, store) = demo_store();
        let record = HealthRecord::from_pairs([("lv_bmi", FieldValue::Number(33.0))]);
        let set = predict_all(&store, &record);
        let diabetes = set.get("diabetes").unwrap().as_scored().unwrap();
        assert_eq!(diabetes.label, "No");
        assert_eq!(
            diabetes.feature_input.get("lv_glucose"),
            Some(&FieldValue::Missing)
        );
    }

    #[test]
    fn predict_all_is_idempotent() {
        let (_dir, store) = demo_store();
        let record = HealthRecord::from_pairs([
            ("lv_glucose", FieldValue::Number(145.0)),
            ("lv_bmi", FieldValue::Number(28.0)),
        ]);
        let first = predict_all(&store, &record);
        let second = predict_all(&store, &record);
        for (a, b) in first.results().zip(second.results()) {
            assert_eq!(a.label, b.label);
            assert_abs_diff_eq!(a.probability, b.probability, epsilon = 0.0);
        }
    }

    #[test]
    fn predict_one_reports_unknown_disease() {
        let (_dir, store) = demo_store();
        let record = HealthRecord::from_pairs([("lv_glucose", FieldValue::Number(100.0))]);
        let err = predict_one(&store, "dialysis", &record).unwrap_err();
        assert!(matches!(err, InferenceError::UnknownDisease(_)));
    }

    #[test]
    fn report_serializes_scored_and_failed_entries_distinctly() {
        let (_dir, store) = demo_store();
        let record = HealthRecord::from_pairs([
            ("lv_glucose", FieldValue::Category("oops".into())),
            ("lv_bmi", FieldValue::Number(20.0)),
        ]);
        let set = predict_all(&store, &record);
        let json = serde_json::to_value(&set).unwrap();
        assert!(json["diabetes"]["error"].is_string());
        assert!(json["obesity"]["label"].is_string());
        assert!(json["obesity"]["feature_input"]["lv_bmi"].is_number());
    }
}
