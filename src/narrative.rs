//! Rendering a health record into the annotated input block the external
//! narrative generator consumes.
//!
//! The generator is prompted with the raw record, not with the prediction
//! results. To keep that prompt stable and self-describing, fields are
//! rendered in the order of a curated template: a plain-text field
//! dictionary whose lines carry a group header or a field annotation.
//!
//! ```text
//! input_data = {
//!     # 1. General information
//!     "st_gender": "Male",           # Gender of user
//!     "lv_age": 55,                  # Age in years
//! }
//! ```
//!
//! Every field the template knows is rendered even when the record lacks it
//! (as `None`), and record fields the template does not know collect into a
//! trailing catch-all group, so the generator always sees the complete
//! picture.

use crate::schema::{FieldValue, HealthRecord};
use std::fmt::Write;

/// Width the `"name": value,` prefix is padded to before the trailing
/// annotation, matching the template's own column layout.
const ANNOTATION_COLUMN: usize = 35;

/// Group number and title under which unrecognised record fields render.
const EXTRA_GROUP_ORDER: u32 = 99;
const EXTRA_GROUP_TITLE: &str = "Additional Data";

#[derive(Debug, Clone, PartialEq)]
struct TemplateField {
    name: String,
    description: String,
    group_title: String,
    group_order: u32,
}

/// A parsed field-dictionary template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputTemplate {
    fields: Vec<TemplateField>,
}

impl InputTemplate {
    /// Parses the template text. Lines that are neither a group header
    /// (`# <n>. <title>`) nor an annotated field (`"<name>": ... # <text>`)
    /// are ignored, as are field lines outside any group.
    pub fn parse(text: &str) -> Self {
        let mut fields = Vec::new();
        let mut group: Option<(u32, String)> = None;

        for line in text.lines() {
            if let Some((order, title)) = parse_group_header(line) {
                group = Some((order, title));
                continue;
            }
            if let (Some((order, title)), Some((name, description))) =
                (&group, parse_field_line(line))
            {
                fields.push(TemplateField {
                    name,
                    description,
                    group_title: title.clone(),
                    group_order: *order,
                });
            }
        }

        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders `record` into the generator's input block.
    pub fn render(&self, record: &HealthRecord) -> String {
        let mut known = self.fields.clone();
        known.sort_by_key(|f| f.group_order);

        let mut out = String::from("input_data = {\n");
        let mut current_group: Option<&str> = None;

        for field in &known {
            if current_group != Some(field.group_title.as_str()) {
                if current_group.is_some() {
                    out.push('\n');
                }
                let _ = writeln!(out, "    # {}. {}", field.group_order, field.group_title);
                current_group = Some(field.group_title.as_str());
            }
            push_field_line(
                &mut out,
                &field.name,
                record.get(&field.name),
                &field.description,
            );
        }

        let mut extras: Vec<&str> = record
            .iter()
            .map(|(name, _)| name)
            .filter(|name| !self.fields.iter().any(|f| f.name == *name))
            .collect();
        extras.sort_unstable();

        if !extras.is_empty() {
            if current_group.is_some() {
                out.push('\n');
            }
            let _ = writeln!(out, "    # {EXTRA_GROUP_ORDER}. {EXTRA_GROUP_TITLE}");
            for name in extras {
                push_field_line(
                    &mut out,
                    name,
                    record.get(name),
                    "Key is not in the original structure",
                );
            }
        }

        out.push('}');
        out
    }
}

fn parse_group_header(line: &str) -> Option<(u32, String)> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let dot = rest.find('.')?;
    let order: u32 = rest[..dot].trim().parse().ok()?;
    let title = rest[dot + 1..].trim();
    if title.is_empty() {
        return None;
    }
    Some((order, title.to_string()))
}

fn parse_field_line(line: &str) -> Option<(String, String)> {
    let open = line.find('"')?;
    let close = open + 1 + line[open + 1..].find('"')?;
    let name = line[open + 1..close].trim();
    let after = &line[close + 1..];
    let colon = after.find(':')?;
    let hash = after[colon..].find('#')?;
    let description = after[colon + hash + 1..].trim();
    if name.is_empty() || description.is_empty() {
        return None;
    }
    Some((name.to_string(), description.to_string()))
}

fn push_field_line(out: &mut String, name: &str, value: Option<&FieldValue>, description: &str) {
    let prefix = format!("    \"{}\": {},", name, format_value(value));
    let _ = writeln!(out, "{prefix:<ANNOTATION_COLUMN$} # {description}");
}

/// Values render in JSON form; absent and missing values render as `None`
/// so the generator can tell an intentional gap from a zero.
fn format_value(value: Option<&FieldValue>) -> String {
    match value {
        None | Some(FieldValue::Missing) => "None".to_string(),
        Some(FieldValue::Number(v)) => {
            if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
                format!("{}", *v as i64)
            } else {
                format!("{v}")
            }
        }
        Some(FieldValue::Category(s)) => serde_json::to_string(s).unwrap_or_else(|_| s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"input_data = {
    # 1. General information
    "st_gender": "Male",           # Gender of user
    "lv_age": 55,                  # Age in years

    # 2. Laboratory results
    "lv_glucose": 100,             # Fasting blood glucose (mg/dL)
}
"#;

    #[test]
    fn parses_groups_and_annotations() {
        let template = InputTemplate::parse(TEMPLATE);
        assert_eq!(template.len(), 3);
    }

    #[test]
    fn renders_known_fields_in_group_order() {
        let template = InputTemplate::parse(TEMPLATE);
        let record = HealthRecord::from_pairs([
            ("lv_glucose", FieldValue::Number(180.0)),
            ("st_gender", FieldValue::Category("Male".into())),
            ("lv_age", FieldValue::Number(55.0)),
        ]);
        let block = template.render(&record);

        let gender_at = block.find("\"st_gender\"").unwrap();
        let age_at = block.find("\"lv_age\"").unwrap();
        let glucose_at = block.find("\"lv_glucose\"").unwrap();
        assert!(gender_at < age_at && age_at < glucose_at);

        assert!(block.contains("# 1. General information"));
        assert!(block.contains("# 2. Laboratory results"));
        assert!(block.contains("\"lv_glucose\": 180,"));
        assert!(block.contains("# Fasting blood glucose (mg/dL)"));
        assert!(block.starts_with("input_data = {"));
        assert!(block.ends_with('}'));
    }

    #[test]
    fn absent_fields_render_as_none() {
        let template = InputTemplate::parse(TEMPLATE);
        let record = HealthRecord::from_pairs([("lv_age", FieldValue::Number(55.0))]);
        let block = template.render(&record);
        assert!(block.contains("\"st_gender\": None,"));
        assert!(block.contains("\"lv_glucose\": None,"));
    }

    #[test]
    fn unknown_fields_collect_into_trailing_group() {
        let template = InputTemplate::parse(TEMPLATE);
        let record = HealthRecord::from_pairs([
            ("lv_age", FieldValue::Number(55.0)),
            ("zz_custom", FieldValue::Number(7.0)),
            ("aa_custom", FieldValue::Category("x".into())),
        ]);
        let block = template.render(&record);
        assert!(block.contains("# 99. Additional Data"));
        let aa_at = block.find("\"aa_custom\"").unwrap();
        let zz_at = block.find("\"zz_custom\"").unwrap();
        assert!(aa_at < zz_at);
        assert!(aa_at > block.find("# 99.").unwrap());
    }

    #[test]
    fn whole_numbers_render_without_decimal_point() {
        let template = InputTemplate::parse(TEMPLATE);
        let record = HealthRecord::from_pairs([
            ("lv_age", FieldValue::Number(55.0)),
            ("lv_glucose", FieldValue::Number(101.5)),
        ]);
        let block = template.render(&record);
        assert!(block.contains("\"lv_age\": 55,"));
        assert!(block.contains("\"lv_glucose\": 101.5,"));
    }
}
