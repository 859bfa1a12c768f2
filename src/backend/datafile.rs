//! Project configuration ("datafile") and the decisions derived from it.
//!
//! Only the parts needed to pick a rollout variation and to know which
//! segments to ask the data platform about are modelled. Traffic bucketing is
//! not: the first rule whose audiences match serves its first variation.

use super::{Attributes, Decision};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Datafile {
    pub revision: String,
    pub feature_flags: Vec<FeatureFlag>,
    pub rollouts: Vec<Rollout>,
    pub typed_audiences: Vec<Audience>,
    pub audiences: Vec<Audience>,
    pub integrations: Vec<Integration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    pub rollout_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rollout {
    pub id: String,
    pub experiments: Vec<Rule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub id: String,
    pub key: String,
    pub audience_ids: Vec<String>,
    pub variations: Vec<Variation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Variation {
    pub id: String,
    pub key: String,
    pub feature_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Audience {
    pub id: String,
    pub name: String,
    /// Condition tree. Legacy audiences carry it as a JSON-encoded string.
    pub conditions: Value,
}

impl Audience {
    fn condition_tree(&self) -> Value {
        match &self.conditions {
            Value::String(encoded) => serde_json::from_str(encoded).unwrap_or(Value::Null),
            tree => tree.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Integration {
    pub key: String,
    pub host: Option<String>,
    pub public_key: Option<String>,
}

/// Connection details for the segment data platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdpSettings {
    pub host: String,
    pub public_key: String,
}

impl Datafile {
    pub fn flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.feature_flags.iter().find(|flag| flag.key == key)
    }

    fn rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.iter().find(|rollout| rollout.id == id)
    }

    fn audience(&self, id: &str) -> Option<&Audience> {
        self.typed_audiences
            .iter()
            .chain(self.audiences.iter())
            .find(|audience| audience.id == id)
    }

    pub fn odp(&self) -> Option<OdpSettings> {
        let odp = self.integrations.iter().find(|i| i.key == "odp")?;
        Some(OdpSettings {
            host: odp.host.clone()?,
            public_key: odp.public_key.clone()?,
        })
    }

    /// Every segment referenced by a `qualified` audience condition, sorted.
    pub fn segments(&self) -> Vec<String> {
        let mut found = BTreeSet::new();
        for audience in self.typed_audiences.iter().chain(self.audiences.iter()) {
            collect_segments(&audience.condition_tree(), &mut found);
        }
        found.into_iter().collect()
    }

    pub fn decide(&self, flag_key: &str, attributes: &Attributes, segments: &[String]) -> Decision {
        let Some(flag) = self.flag(flag_key) else {
            return Decision {
                variation_key: None,
                enabled: false,
                reasons: vec![format!("No flag was found for key \"{}\".", flag_key)],
            };
        };

        let user = User {
            attributes,
            segments,
        };
        let rules = self
            .rollout(&flag.rollout_id)
            .map(|rollout| rollout.experiments.as_slice())
            .unwrap_or_default();

        for rule in rules {
            if !self.rule_matches(rule, &user) {
                continue;
            }
            if let Some(variation) = rule.variations.first() {
                return Decision {
                    variation_key: Some(variation.key.clone()),
                    enabled: variation.feature_enabled,
                    reasons: Vec::new(),
                };
            }
        }

        Decision::default()
    }

    fn rule_matches(&self, rule: &Rule, user: &User<'_>) -> bool {
        if rule.audience_ids.is_empty() {
            return true;
        }
        rule.audience_ids.iter().any(|id| {
            self.audience(id)
                .and_then(|audience| evaluate(&audience.condition_tree(), user))
                .unwrap_or(false)
        })
    }
}

struct User<'a> {
    attributes: &'a Attributes,
    segments: &'a [String],
}

fn collect_segments(tree: &Value, found: &mut BTreeSet<String>) {
    match tree {
        Value::Array(items) => items.iter().for_each(|item| collect_segments(item, found)),
        Value::Object(leaf) => {
            if leaf.get("match").and_then(Value::as_str) == Some("qualified") {
                if let Some(segment) = leaf.get("value").and_then(Value::as_str) {
                    found.insert(segment.to_string());
                }
            }
        }
        _ => {}
    }
}

/// Three-valued evaluation of a condition tree; `None` is "unknown".
fn evaluate(tree: &Value, user: &User<'_>) -> Option<bool> {
    match tree {
        Value::Array(items) => {
            let (operator, operands) = match items.split_first() {
                Some((Value::String(op), rest)) => (op.as_str(), rest),
                _ => ("or", items.as_slice()),
            };
            match operator {
                "and" => {
                    let mut unknown = false;
                    for operand in operands {
                        match evaluate(operand, user) {
                            Some(false) => return Some(false),
                            None => unknown = true,
                            Some(true) => {}
                        }
                    }
                    if unknown { None } else { Some(true) }
                }
                "not" => operands.first().and_then(|operand| evaluate(operand, user)).map(|v| !v),
                _ => {
                    let mut unknown = false;
                    for operand in operands {
                        match evaluate(operand, user) {
                            Some(true) => return Some(true),
                            None => unknown = true,
                            Some(false) => {}
                        }
                    }
                    if unknown { None } else { Some(false) }
                }
            }
        }
        Value::Object(leaf) => evaluate_leaf(leaf, user),
        _ => None,
    }
}

fn evaluate_leaf(leaf: &serde_json::Map<String, Value>, user: &User<'_>) -> Option<bool> {
    let kind = leaf.get("type").and_then(Value::as_str)?;
    let matcher = leaf.get("match").and_then(Value::as_str).unwrap_or("exact");
    let expected = leaf.get("value").unwrap_or(&Value::Null);

    match (kind, matcher) {
        ("third_party_dimension", "qualified") => {
            let segment = expected.as_str()?;
            Some(user.segments.iter().any(|s| s == segment))
        }
        ("custom_attribute", "exists") => {
            let name = leaf.get("name").and_then(Value::as_str)?;
            Some(user.attributes.get(name).is_some_and(|value| !value.is_null()))
        }
        ("custom_attribute", "exact") => {
            let name = leaf.get("name").and_then(Value::as_str)?;
            let actual = user.attributes.get(name)?;
            match (actual.as_f64(), expected.as_f64()) {
                (Some(actual), Some(expected)) => Some(actual == expected),
                _ => Some(actual == expected),
            }
        }
        _ => None,
    }
}
