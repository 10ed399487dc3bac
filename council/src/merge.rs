//! Per-field merge strategies for combining provider payloads.

use indexmap::IndexMap;
use lectern_provider::Payload;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// How the values of one field are combined across responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FieldStrategy {
    /// Longest non-empty string; ties go to the first response.
    Longest,
    /// Concatenate lists, dropping exact duplicates, in first-seen order.
    Union,
    /// Most frequent non-null value; ties go to the first seen.
    MajorityVote,
    /// Weight-averaged number.
    WeightedAverage,
    /// Union deduplicated by normalized text (lowercased, whitespace
    /// collapsed). For lists of objects, `key` names the text field.
    NormalizedUnion {
        #[serde(default)]
        key: Option<String>,
    },
    /// Merge an object field with its own schema.
    Nested(MergeSchema),
}

/// Merge strategies by top-level field name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergeSchema {
    #[serde(default)]
    pub fields: IndexMap<String, FieldStrategy>,
}

impl MergeSchema {
    /// A schema with no declared fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field's strategy.
    pub fn with_field(mut self, name: impl Into<String>, strategy: FieldStrategy) -> Self {
        self.fields.insert(name.into(), strategy);
        self
    }

    /// Strategies for the standard extraction fields.
    pub fn standard() -> Self {
        let methodology = Self::new()
            .with_field("approach", FieldStrategy::MajorityVote)
            .with_field("design", FieldStrategy::MajorityVote)
            .with_field("data_sources", FieldStrategy::Union);

        Self::new()
            .with_field("thesis", FieldStrategy::Longest)
            .with_field("summary", FieldStrategy::Longest)
            .with_field("conclusions", FieldStrategy::Longest)
            .with_field("keywords", FieldStrategy::Union)
            .with_field("methodology", FieldStrategy::Nested(methodology))
            .with_field(
                "findings",
                FieldStrategy::NormalizedUnion {
                    key: Some("finding".to_string()),
                },
            )
            .with_field(
                "claims",
                FieldStrategy::NormalizedUnion {
                    key: Some("claim".to_string()),
                },
            )
            .with_field("confidence", FieldStrategy::WeightedAverage)
    }

    /// Merge weighted payloads into one.
    ///
    /// Declared fields come first, in schema order. Undeclared fields keep
    /// the value from the first payload that has them.
    pub fn merge(&self, inputs: &[(&Payload, f64)]) -> Payload {
        let mut merged = Payload::new();

        for (name, strategy) in &self.fields {
            let values: Vec<(&Value, f64)> = inputs
                .iter()
                .filter_map(|(payload, weight)| {
                    payload
                        .get(name)
                        .filter(|v| !v.is_null())
                        .map(|v| (v, *weight))
                })
                .collect();
            if values.is_empty() {
                continue;
            }
            if let Some(value) = strategy.apply(&values) {
                merged.insert(name.clone(), value);
            }
        }

        for (payload, _) in inputs {
            for (name, value) in payload.iter() {
                if !self.fields.contains_key(name) && !merged.contains_key(name) {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }

        merged
    }
}

impl FieldStrategy {
    /// Combine the non-null values of one field.
    pub fn apply(&self, values: &[(&Value, f64)]) -> Option<Value> {
        match self {
            Self::Longest => longest(values),
            Self::Union => Some(Value::Array(union_by(values, |v| v.clone()))),
            Self::MajorityVote => majority(values),
            Self::WeightedAverage => weighted_average(values),
            Self::NormalizedUnion { key } => Some(Value::Array(union_by(values, |v| {
                Value::String(normalized_key(v, key.as_deref()))
            }))),
            Self::Nested(schema) => {
                let objects: Vec<(&Payload, f64)> = values
                    .iter()
                    .filter_map(|(v, w)| v.as_object().map(|o| (o, *w)))
                    .collect();
                if objects.is_empty() {
                    return values.first().map(|(v, _)| (*v).clone());
                }
                Some(Value::Object(schema.merge(&objects)))
            }
        }
    }
}

/// Lowercase and collapse runs of whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalized_key(value: &Value, key: Option<&str>) -> String {
    let text = match (value, key) {
        (Value::Object(map), Some(key)) => map.get(key).and_then(Value::as_str),
        (Value::String(s), _) => Some(s.as_str()),
        _ => None,
    };
    match text {
        Some(text) => normalize_text(text),
        None => normalize_text(&value.to_string()),
    }
}

fn longest(values: &[(&Value, f64)]) -> Option<Value> {
    let mut best: Option<&str> = None;
    for (value, _) in values {
        if let Some(s) = value.as_str() {
            if s.trim().is_empty() {
                continue;
            }
            if best.is_none_or(|b| s.chars().count() > b.chars().count()) {
                best = Some(s);
            }
        }
    }
    match best {
        Some(s) => Some(Value::String(s.to_string())),
        None => values
            .iter()
            .map(|(v, _)| *v)
            .find(|v| !v.as_str().is_some_and(|s| s.trim().is_empty()))
            .cloned(),
    }
}

/// Flatten list values (scalars count as one-item lists) and keep the first
/// item for each key.
fn union_by<F>(values: &[(&Value, f64)], key: F) -> Vec<Value>
where
    F: Fn(&Value) -> Value,
{
    let mut seen: Vec<Value> = Vec::new();
    let mut items = Vec::new();
    for (value, _) in values {
        let elements: Vec<&Value> = match value {
            Value::Array(list) => list.iter().collect(),
            other => vec![*other],
        };
        for element in elements {
            if element.is_null() {
                continue;
            }
            let k = key(element);
            if !seen.contains(&k) {
                seen.push(k);
                items.push(element.clone());
            }
        }
    }
    items
}

fn majority(values: &[(&Value, f64)]) -> Option<Value> {
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for (value, _) in values {
        match counts.iter().position(|(v, _)| v == value) {
            Some(i) => counts[i].1 += 1,
            None => counts.push((*value, 1)),
        }
    }

    let mut best: Option<(&Value, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, n)| count > n) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v.clone())
}

fn weighted_average(values: &[(&Value, f64)]) -> Option<Value> {
    let numbers: Vec<(f64, f64)> = values
        .iter()
        .filter_map(|(v, w)| v.as_f64().map(|n| (n, w.max(0.0))))
        .collect();
    if numbers.is_empty() {
        return None;
    }

    let total_weight: f64 = numbers.iter().map(|(_, w)| w).sum();
    let average = if total_weight > 0.0 {
        numbers.iter().map(|(n, w)| n * w).sum::<f64>() / total_weight
    } else {
        numbers.iter().map(|(n, _)| n).sum::<f64>() / numbers.len() as f64
    };
    Number::from_f64(average).map(Value::Number)
}
