//! Projection of a full health record onto one model's ordered feature list.
//!
//! The order of the projected vector is load-bearing: it must be exactly the
//! order the model pipeline was fit with, which is also the column order of
//! that model's reference dataset. The router therefore preserves the
//! requested name order verbatim and never re-sorts, dedups, or validates.
//! A name the record does not carry projects to `FieldValue::Missing`.

use crate::schema::{FieldValue, HealthRecord};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// An ordered feature-name/value list, in exactly the order requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedFeatures {
    entries: Vec<(String, FieldValue)>,
}

impl ProjectedFeatures {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Serialized as a JSON object whose keys appear in projection order, so the
// echoed feature input in a report reads in the same order the model saw it.
impl Serialize for ProjectedFeatures {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Projects `record` onto `feature_names`, in that exact order.
///
/// Pure function of its inputs. Absent fields become `FieldValue::Missing`,
/// never `0` and never `""`; type checking of present values is the encoding
/// stage's concern, not the router's.
pub fn project(record: &HealthRecord, feature_names: &[String]) -> ProjectedFeatures {
    let entries = feature_names
        .iter()
        .map(|name| {
            let value = record.get(name).cloned().unwrap_or(FieldValue::Missing);
            (name.clone(), value)
        })
        .collect();
    ProjectedFeatures { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn projection_follows_requested_order_not_record_order() {
        // BTreeMap stores keys alphabetically; the requested order is not.
        let record = HealthRecord::from_pairs([
            ("lv_age", FieldValue::Number(55.0)),
            ("lv_HbA1c", FieldValue::Number(7.2)),
            ("st_gender", FieldValue::Category("Male".into())),
            ("lv_glucose", FieldValue::Number(180.0)),
            ("lv_bmi", FieldValue::Number(29.4)),
        ]);
        let projected = project(&record, &names(&["lv_glucose", "lv_HbA1c", "lv_age"]));
        let got: Vec<_> = projected.values().cloned().collect();
        assert_eq!(
            got,
            vec![
                FieldValue::Number(180.0),
                FieldValue::Number(7.2),
                FieldValue::Number(55.0),
            ]
        );
        let order: Vec<_> = projected.names().collect();
        assert_eq!(order, vec!["lv_glucose", "lv_HbA1c", "lv_age"]);
    }

    #[test]
    fn absent_fields_project_as_missing() {
        let record = HealthRecord::from_pairs([("lv_age", FieldValue::Number(40.0))]);
        let projected = project(&record, &names(&["lv_age", "lv_creatinine"]));
        assert_eq!(projected.get("lv_creatinine"), Some(&FieldValue::Missing));
        assert_ne!(projected.get("lv_creatinine"), Some(&FieldValue::Number(0.0)));
    }

    #[test]
    fn serializes_in_projection_order() {
        let record = HealthRecord::from_pairs([
            ("b", FieldValue::Number(2.0)),
            ("a", FieldValue::Number(1.0)),
        ]);
        let projected = project(&record, &names(&["b", "a", "c"]));
        let json = serde_json::to_string(&projected).unwrap();
        assert_eq!(json, r#"{"b":2.0,"a":1.0,"c":null}"#);
    }

    #[test]
    fn projection_is_pure() {
        let record = HealthRecord::from_pairs([("lv_age", FieldValue::Number(40.0))]);
        let wanted = names(&["lv_age"]);
        let first = project(&record, &wanted);
        let second = project(&record, &wanted);
        assert_eq!(first, second);
        assert_eq!(record.len(), 1);
    }
}
