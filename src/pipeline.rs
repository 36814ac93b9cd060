//! # Trained Disease Pipelines
//!
//! A disease pipeline is the fitted preprocessing and classification sequence
//! trained for one target condition. This module defines:
//!
//! - the `RiskModel` capability trait: the only surface the store and the
//!   inference engine are allowed to see (`predict`, `predict_proba`);
//! - the concrete serialisable pipeline: a column preprocessor (per-feature
//!   standardisation and one-hot encoding) feeding a gradient-boosted
//!   decision-tree forest;
//! - the human-readable TOML artifact format with `save`/`load`.
//!
//! The encoder list's order is the same order as the feature manifest entry
//! the pipeline was trained against. That order decides the dense column
//! layout the trees index into, so it is validated on load and never
//! reordered afterward.

use crate::router::ProjectedFeatures;
use crate::schema::{FieldKind, FieldValue, RecordSchema};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// The capability interface every disease classifier exposes, regardless of
/// the concrete model family underneath. `predict` returns the chosen class
/// index; `predict_proba` returns one probability per class. The two are
/// separate calls on purpose: the engine reports the label the model chose
/// and the confidence the probability vector carries, without assuming one
/// is derived from the other.
pub trait RiskModel: Send + Sync {
    fn predict(&self, features: &ProjectedFeatures) -> Result<usize, PipelineError>;
    fn predict_proba(&self, features: &ProjectedFeatures) -> Result<Array1<f64>, PipelineError>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read or write pipeline file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML pipeline file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize pipeline to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("feature '{feature}' expects {expected} but the record carries {found}")]
    FeatureTypeMismatch {
        feature: String,
        expected: &'static str,
        found: String,
    },
    #[error("feature '{feature}' was not present in the projected input")]
    UnknownFeature { feature: String },
    #[error("pipeline declares {classes} classes; at least 2 are required")]
    BadClassCount { classes: usize },
    #[error("pipeline has {scores} base scores for {classes} classes")]
    BaseScoreMismatch { scores: usize, classes: usize },
    #[error("tree {tree} targets class {class}, outside the {classes} declared classes")]
    ClassOutOfRange {
        tree: usize,
        class: usize,
        classes: usize,
    },
    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },
    #[error("tree {tree} references node {node}, outside its node table")]
    NodeIndexOutOfRange { tree: usize, node: usize },
    #[error("tree {tree} splits on encoded column {feature}, but the preprocessor emits {width}")]
    FeatureIndexOutOfRange {
        tree: usize,
        feature: usize,
        width: usize,
    },
    #[error("tree {tree} did not reach a leaf; its node table contains a cycle")]
    CyclicTree { tree: usize },
}

/// One fitted column encoder. The variants mirror the two transformer kinds
/// the training pipeline fits: standardisation for numeric columns, one-hot
/// with unknown-level tolerance for categorical columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureEncoder {
    Standardize {
        name: String,
        mean: f64,
        scale: f64,
    },
    OneHot {
        name: String,
        vocabulary: Vec<String>,
    },
}

impl FeatureEncoder {
    pub fn name(&self) -> &str {
        match self {
            FeatureEncoder::Standardize { name, .. } => name,
            FeatureEncoder::OneHot { name, .. } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            FeatureEncoder::Standardize { .. } => 1,
            FeatureEncoder::OneHot { vocabulary, .. } => vocabulary.len(),
        }
    }

    fn kind(&self) -> FieldKind {
        match self {
            FeatureEncoder::Standardize { .. } => FieldKind::Numeric,
            FeatureEncoder::OneHot { vocabulary, .. } => FieldKind::Categorical {
                vocabulary: vocabulary.clone(),
            },
        }
    }

    /// Appends this encoder's dense columns for one value.
    ///
    /// A missing numeric value encodes to NaN so the trees can route it down
    /// their recorded default branch. A missing or out-of-vocabulary
    /// categorical value encodes to an all-zero block, matching the
    /// unknown-tolerant one-hot encoder the pipeline was trained with.
    fn encode_into(&self, value: &FieldValue, out: &mut Vec<f64>) -> Result<(), PipelineError> {
        match self {
            FeatureEncoder::Standardize { name, mean, scale } => match value {
                FieldValue::Number(v) => {
                    let scaled = if *scale > 0.0 {
                        (v - mean) / scale
                    } else {
                        v - mean
                    };
                    out.push(scaled);
                }
                FieldValue::Missing => out.push(f64::NAN),
                other => {
                    return Err(PipelineError::FeatureTypeMismatch {
                        feature: name.clone(),
                        expected: "a numeric value",
                        found: other.describe(),
                    });
                }
            },
            FeatureEncoder::OneHot { name, vocabulary } => match value {
                FieldValue::Category(s) => {
                    for level in vocabulary {
                        out.push(if level == s { 1.0 } else { 0.0 });
                    }
                }
                FieldValue::Missing => {
                    out.extend(std::iter::repeat(0.0).take(vocabulary.len()));
                }
                other => {
                    return Err(PipelineError::FeatureTypeMismatch {
                        feature: name.clone(),
                        expected: "a categorical value",
                        found: other.describe(),
                    });
                }
            },
        }
        Ok(())
    }
}

/// The fitted column transformer: one encoder per input feature, in the
/// training column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub encoders: Vec<FeatureEncoder>,
}

impl Preprocessor {
    /// Number of dense columns the encoders emit.
    pub fn width(&self) -> usize {
        self.encoders.iter().map(FeatureEncoder::width).sum()
    }

    /// Input feature names in encoder order.
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.encoders.iter().map(FeatureEncoder::name)
    }

    /// The declared kind of every input feature, for schema derivation.
    pub fn record_schema(&self) -> RecordSchema {
        let mut schema = RecordSchema::new();
        for encoder in &self.encoders {
            schema = match encoder.kind() {
                FieldKind::Numeric => schema.declare_numeric(encoder.name()),
                FieldKind::Categorical { vocabulary } => {
                    schema.declare_categorical(encoder.name(), vocabulary)
                }
            };
        }
        schema
    }

    /// The ordered (name, kind) pairs, used to type reference dataset columns.
    pub fn feature_fields(&self) -> Vec<(String, FieldKind)> {
        self.encoders
            .iter()
            .map(|e| (e.name().to_string(), e.kind()))
            .collect()
    }

    /// Encodes a projected feature vector into the dense layout the trees
    /// were trained against.
    pub fn encode(&self, features: &ProjectedFeatures) -> Result<Array1<f64>, PipelineError> {
        let mut out = Vec::with_capacity(self.width());
        for encoder in &self.encoders {
            let value = features
                .get(encoder.name())
                .ok_or_else(|| PipelineError::UnknownFeature {
                    feature: encoder.name().to_string(),
                })?;
            encoder.encode_into(value, &mut out)?;
        }
        Ok(Array1::from_vec(out))
    }
}

/// One node of a boosted regression tree. Split thresholds compare with `<`;
/// a NaN input follows the recorded default branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        default_left: bool,
    },
    Leaf {
        value: f64,
    },
}

/// One boosted regression tree contributing margin to a single class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub class: usize,
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walks the tree from the root. The walk is step-bounded by the node
    /// count: a well-formed tree reaches a leaf in at most that many hops.
    fn score(&self, x: &Array1<f64>, tree: usize) -> Result<f64, PipelineError> {
        let mut node = 0usize;
        for _ in 0..=self.nodes.len() {
            match self
                .nodes
                .get(node)
                .ok_or(PipelineError::NodeIndexOutOfRange { tree, node })?
            {
                TreeNode::Leaf { value } => return Ok(*value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let v = *x
                        .get(*feature)
                        .ok_or(PipelineError::FeatureIndexOutOfRange {
                            tree,
                            feature: *feature,
                            width: x.len(),
                        })?;
                    node = if v.is_nan() {
                        if *default_left { *left } else { *right }
                    } else if v < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
        Err(PipelineError::CyclicTree { tree })
    }
}

/// The fitted multiclass forest: per-class base scores plus boosted trees,
/// each tree adding margin to its target class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedForest {
    pub n_classes: usize,
    pub base_score: Vec<f64>,
    pub trees: Vec<DecisionTree>,
}

impl BoostedForest {
    fn margins(&self, x: &Array1<f64>) -> Result<Array1<f64>, PipelineError> {
        let mut margins = Array1::from_vec(self.base_score.clone());
        for (idx, tree) in self.trees.iter().enumerate() {
            if tree.class >= self.n_classes {
                return Err(PipelineError::ClassOutOfRange {
                    tree: idx,
                    class: tree.class,
                    classes: self.n_classes,
                });
            }
            margins[tree.class] += tree.score(x, idx)?;
        }
        Ok(margins)
    }
}

/// Numerically stable softmax.
fn softmax(margins: &Array1<f64>) -> Array1<f64> {
    let max = margins.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp = margins.mapv(|m| (m - max).exp());
    let total: f64 = exp.sum();
    exp.mapv(|e| e / total)
}

/// Index of the largest margin. Exact ties keep the first class encountered,
/// which is also the tie the underlying booster reports.
fn argmax(margins: &Array1<f64>) -> usize {
    let mut best = 0usize;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &m) in margins.iter().enumerate() {
        if m > best_value {
            best = i;
            best_value = m;
        }
    }
    best
}

/// The top-level, self-contained trained pipeline artifact: the structure
/// that gets saved to and loaded from a `<disease_id>.pipeline.toml` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedPipeline {
    pub preprocessor: Preprocessor,
    pub forest: BoostedForest,
}

impl BoostedPipeline {
    /// Structural consistency checks run once at load time, so inference can
    /// trust indices instead of discovering corruption mid-walk.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.forest.n_classes < 2 {
            return Err(PipelineError::BadClassCount {
                classes: self.forest.n_classes,
            });
        }
        if self.forest.base_score.len() != self.forest.n_classes {
            return Err(PipelineError::BaseScoreMismatch {
                scores: self.forest.base_score.len(),
                classes: self.forest.n_classes,
            });
        }
        let width = self.preprocessor.width();
        for (idx, tree) in self.forest.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(PipelineError::EmptyTree { tree: idx });
            }
            if tree.class >= self.forest.n_classes {
                return Err(PipelineError::ClassOutOfRange {
                    tree: idx,
                    class: tree.class,
                    classes: self.forest.n_classes,
                });
            }
            for node in &tree.nodes {
                if let TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= width {
                        return Err(PipelineError::FeatureIndexOutOfRange {
                            tree: idx,
                            feature: *feature,
                            width,
                        });
                    }
                    if *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                        return Err(PipelineError::NodeIndexOutOfRange {
                            tree: idx,
                            node: (*left).max(*right),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Saves the pipeline to a human-readable TOML artifact.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a pipeline artifact.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let pipeline: BoostedPipeline = toml::from_str(&fs::read_to_string(path)?)?;
        pipeline.validate()?;
        Ok(pipeline)
    }
}

impl RiskModel for BoostedPipeline {
    fn predict(&self, features: &ProjectedFeatures) -> Result<usize, PipelineError> {
        let x = self.preprocessor.encode(features)?;
        let margins = self.forest.margins(&x)?;
        Ok(argmax(&margins))
    }

    fn predict_proba(&self, features: &ProjectedFeatures) -> Result<Array1<f64>, PipelineError> {
        let x = self.preprocessor.encode(features)?;
        let margins = self.forest.margins(&x)?;
        Ok(softmax(&margins))
    }
}
