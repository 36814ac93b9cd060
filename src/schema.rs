//! # Health Record Schema
//!
//! This module defines the typed vocabulary for everything a user can report:
//! field values, field kind declarations, and the record container itself.
//!
//! Every field is declared up front as either numeric or categorical with a
//! fixed vocabulary. Values are checked against the declaration when a record
//! is built, so a mistyped value fails loudly at the boundary instead of
//! producing a silently wrong encoding deep inside a model pipeline. Field
//! names such as `lv_glucose` or `st_gender` are plain strings; nothing in
//! this crate infers a type from a name prefix.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One reported measurement.
///
/// `Missing` is the explicit null marker. It is distinct from `0.0` and from
/// the empty string so that downstream encoders see an intentional gap rather
/// than a disguised default. In JSON a missing value is `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Category(String),
    Missing,
}

impl FieldValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            FieldValue::Category(s) => Some(s),
            _ => None,
        }
    }

    /// Short human-readable description of the value's shape, for error
    /// messages.
    pub fn describe(&self) -> String {
        match self {
            FieldValue::Number(v) => format!("number {v}"),
            FieldValue::Category(s) => format!("category \"{s}\""),
            FieldValue::Missing => "missing".to_string(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Category(s.to_string())
    }
}

/// The declared type of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    /// A real-valued measurement (age, BMI, a lab value).
    Numeric,
    /// A fixed-vocabulary answer ("Yes"/"No", "Male"/"Female").
    Categorical { vocabulary: Vec<String> },
}

/// Errors raised when a value contradicts its field declaration, or when two
/// declarations for the same field cannot be reconciled.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("field '{field}' is declared numeric but the record carries {found}")]
    NotNumeric { field: String, found: String },
    #[error("field '{field}' is declared categorical but the record carries {found}")]
    NotCategorical { field: String, found: String },
    #[error("field '{field}' has value \"{value}\" outside its declared vocabulary {vocabulary:?}")]
    OutsideVocabulary {
        field: String,
        value: String,
        vocabulary: Vec<String>,
    },
    #[error("field '{field}' is declared numeric by one model and categorical by another")]
    KindConflict { field: String },
}

/// The set of field declarations a record is validated against.
///
/// A schema is usually derived from the loaded model pipelines (each encoder
/// knows the kind of the feature it consumes), but it can also be built by
/// hand for callers that validate records before any model is in scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordSchema {
    fields: BTreeMap<String, FieldKind>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_numeric(mut self, field: &str) -> Self {
        self.fields.insert(field.to_string(), FieldKind::Numeric);
        self
    }

    pub fn declare_categorical<S: Into<String>>(
        mut self,
        field: &str,
        vocabulary: impl IntoIterator<Item = S>,
    ) -> Self {
        self.fields.insert(
            field.to_string(),
            FieldKind::Categorical {
                vocabulary: vocabulary.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn kind(&self, field: &str) -> Option<&FieldKind> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Folds another schema into this one. Two numeric declarations agree;
    /// two categorical declarations union their vocabularies in first-seen
    /// order. A numeric/categorical split for the same field is a conflict.
    pub fn merge(&mut self, other: &RecordSchema) -> Result<(), SchemaError> {
        use std::collections::btree_map::Entry;
        for (field, kind) in &other.fields {
            match self.fields.entry(field.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(kind.clone());
                }
                Entry::Occupied(mut entry) => match (entry.get_mut(), kind) {
                    (FieldKind::Numeric, FieldKind::Numeric) => {}
                    (
                        FieldKind::Categorical { vocabulary },
                        FieldKind::Categorical { vocabulary: more },
                    ) => {
                        for value in more {
                            if !vocabulary.contains(value) {
                                vocabulary.push(value.clone());
                            }
                        }
                    }
                    _ => {
                        return Err(SchemaError::KindConflict {
                            field: field.clone(),
                        });
                    }
                },
            }
        }
        Ok(())
    }

    /// Checks one value against this schema. Fields the schema does not
    /// declare are accepted unchanged: records are supersets of what the
    /// models consume and may carry display-only fields.
    pub fn check(&self, field: &str, value: &FieldValue) -> Result<(), SchemaError> {
        let Some(kind) = self.fields.get(field) else {
            return Ok(());
        };
        match (kind, value) {
            (_, FieldValue::Missing) => Ok(()),
            (FieldKind::Numeric, FieldValue::Number(_)) => Ok(()),
            (FieldKind::Numeric, other) => Err(SchemaError::NotNumeric {
                field: field.to_string(),
                found: other.describe(),
            }),
            (FieldKind::Categorical { vocabulary }, FieldValue::Category(s)) => {
                if vocabulary.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(SchemaError::OutsideVocabulary {
                        field: field.to_string(),
                        value: s.clone(),
                        vocabulary: vocabulary.clone(),
                    })
                }
            }
            (FieldKind::Categorical { .. }, other) => Err(SchemaError::NotCategorical {
                field: field.to_string(),
                found: other.describe(),
            }),
        }
    }
}

/// One user's measurements at one point in time.
///
/// Immutable once built. The field set is a superset of what any single model
/// consumes; projection down to a model's feature list happens in the router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthRecord {
    values: BTreeMap<String, FieldValue>,
}

impl HealthRecord {
    /// Builds a record without schema validation. Intended for callers that
    /// trust their input or validate elsewhere.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<FieldValue>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }

    /// Builds a record, rejecting any value that contradicts the schema.
    /// This is the construction boundary: inference assumes values already
    /// have the declared shape.
    pub fn validated(
        values: BTreeMap<String, FieldValue>,
        schema: &RecordSchema,
    ) -> Result<Self, SchemaError> {
        for (field, value) in &values {
            schema.check(field, value)?;
        }
        Ok(Self { values })
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_schema() -> RecordSchema {
        RecordSchema::new()
            .declare_numeric("lv_glucose")
            .declare_categorical("st_gender", ["Female", "Male"])
    }

    #[test]
    fn accepts_well_typed_values() {
        let schema = demo_schema();
        let mut values = BTreeMap::new();
        values.insert("lv_glucose".to_string(), FieldValue::Number(180.0));
        values.insert("st_gender".to_string(), FieldValue::Category("Male".into()));
        values.insert("note".to_string(), FieldValue::Category("undeclared".into()));
        assert!(HealthRecord::validated(values, &schema).is_ok());
    }

    #[test]
    fn rejects_category_in_numeric_slot() {
        let schema = demo_schema();
        let mut values = BTreeMap::new();
        values.insert("lv_glucose".to_string(), FieldValue::Category("high".into()));
        let err = HealthRecord::validated(values, &schema).unwrap_err();
        assert!(matches!(err, SchemaError::NotNumeric { .. }));
    }

    #[test]
    fn rejects_value_outside_vocabulary() {
        let schema = demo_schema();
        let mut values = BTreeMap::new();
        values.insert("st_gender".to_string(), FieldValue::Category("Other".into()));
        let err = HealthRecord::validated(values, &schema).unwrap_err();
        assert!(matches!(err, SchemaError::OutsideVocabulary { .. }));
    }

    #[test]
    fn missing_is_always_accepted() {
        let schema = demo_schema();
        let mut values = BTreeMap::new();
        values.insert("lv_glucose".to_string(), FieldValue::Missing);
        values.insert("st_gender".to_string(), FieldValue::Missing);
        assert!(HealthRecord::validated(values, &schema).is_ok());
    }

    #[test]
    fn merge_unions_vocabularies() {
        let mut a = RecordSchema::new().declare_categorical("st_smoke", ["No", "Yes"]);
        let b = RecordSchema::new().declare_categorical("st_smoke", ["Yes", "Former"]);
        a.merge(&b).unwrap();
        match a.kind("st_smoke").unwrap() {
            FieldKind::Categorical { vocabulary } => {
                assert_eq!(vocabulary, &["No", "Yes", "Former"]);
            }
            _ => panic!("expected categorical"),
        }
    }

    #[test]
    fn merge_rejects_kind_conflict() {
        let mut a = RecordSchema::new().declare_numeric("lv_age");
        let b = RecordSchema::new().declare_categorical("lv_age", ["young", "old"]);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, SchemaError::KindConflict { .. }));
    }

    #[test]
    fn field_value_json_round_trip() {
        let record = HealthRecord::from_pairs([
            ("lv_glucose", FieldValue::Number(180.0)),
            ("st_gender", FieldValue::Category("Male".into())),
            ("lv_HbA1c", FieldValue::Missing),
        ]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"lv_HbA1c\":null"));
        let back: HealthRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
