//! Agreement and confidence scoring.

use std::collections::HashSet;

use lectern_provider::Payload;
use serde_json::Value;

use crate::merge::normalize_text;

/// Weight of the response rate in the consensus confidence.
pub const RESPONSE_RATE_WEIGHT: f64 = 0.6;

/// Weight of the agreement score in the consensus confidence.
pub const AGREEMENT_WEIGHT: f64 = 0.4;

/// Confidence assigned when a single response stands in for the council.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// `0.6 * response_rate + 0.4 * agreement`, clamped to `[0, 1]`.
pub fn consensus_confidence(response_rate: f64, agreement: f64) -> f64 {
    (RESPONSE_RATE_WEIGHT * response_rate + AGREEMENT_WEIGHT * agreement).clamp(0.0, 1.0)
}

/// Jaccard similarity of two sets. Two empty sets agree fully.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn value_set(value: &Value) -> HashSet<String> {
    let normalize = |v: &Value| match v {
        Value::String(s) => normalize_text(s),
        other => normalize_text(&other.to_string()),
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(normalize)
            .collect(),
        Value::Null => HashSet::new(),
        other => HashSet::from([normalize(other)]),
    }
}

/// Mean pairwise Jaccard similarity over the given fields.
///
/// Each field present in at least one payload contributes its mean
/// pairwise similarity (1.0 when fewer than two payloads carry it). With no
/// field present the score is 1.0.
pub fn agreement_score(payloads: &[&Payload], fields: &[String]) -> f64 {
    let mut scores = Vec::new();

    for field in fields {
        let sets: Vec<HashSet<String>> = payloads
            .iter()
            .filter_map(|p| p.get(field))
            .filter(|v| !v.is_null())
            .map(value_set)
            .collect();

        match sets.len() {
            0 => continue,
            1 => scores.push(1.0),
            n => {
                let mut total = 0.0;
                let mut pairs = 0usize;
                for i in 0..n {
                    for j in (i + 1)..n {
                        total += jaccard(&sets[i], &sets[j]);
                        pairs += 1;
                    }
                }
                scores.push(total / pairs as f64);
            }
        }
    }

    if scores.is_empty() {
        1.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}
