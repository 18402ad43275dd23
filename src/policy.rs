//! Policy normalization and masking-action dispatch.
//!
//! Policies arrive as arbitrary JSON and are never rejected: unknown keys
//! and entity tags are dropped, malformed values are coerced, and templates
//! that would echo the original value are stripped.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::entity::EntityType;
use crate::pseudonym::{Pseudonymizer, RenderOptions};

/// Trailing characters of the original value to retain in the masked form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepParts {
    pub last: usize,
}

/// What the rewriter does with a selected span.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskAction {
    Remove,
    Placeholder(Option<String>),
    Pseudonymize {
        template: Option<String>,
        keep_parts: Option<KeepParts>,
    },
    Format {
        keep_parts: Option<KeepParts>,
    },
}

impl MaskAction {
    pub fn name(&self) -> &'static str {
        match self {
            MaskAction::Remove => "remove",
            MaskAction::Placeholder(_) => "placeholder",
            MaskAction::Pseudonymize { .. } => "pseudonymize",
            MaskAction::Format { .. } => "format",
        }
    }
}

/// Canonical masking policy, immutable after [`Policy::normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    /// Bypass detection and mask every ASCII alphanumeric rune.
    pub mask_all: bool,
    pub entities: BTreeSet<EntityType>,
    pub thresholds: BTreeMap<EntityType, f64>,
    pub actions: BTreeMap<EntityType, MaskAction>,
    /// Rewriter fallback hint; defaults to true when no actions are set.
    pub preserve_length: Option<bool>,
}

impl Policy {
    /// Normalize an arbitrary JSON value into the canonical policy shape.
    pub fn normalize(value: &Value) -> Policy {
        let Some(obj) = value.as_object() else {
            return Policy::default();
        };

        let mask_all = obj.get("mask_all").and_then(Value::as_bool).unwrap_or(false);

        let entities = obj
            .get("entities")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .filter_map(EntityType::from_tag)
                    .collect()
            })
            .unwrap_or_default();

        let thresholds = obj
            .get("thresholds")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(tag, v)| {
                        Some((EntityType::from_tag(tag)?, coerce_number(v)?))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let actions = obj
            .get("actions")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(tag, cfg)| {
                        let entity = EntityType::from_tag(tag)?;
                        Some((entity, normalize_action(cfg.as_object()?)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let preserve_length = obj
            .get("preserve_length")
            .map(|v| v.as_bool().unwrap_or(false));

        Policy {
            mask_all,
            entities,
            thresholds,
            actions,
            preserve_length,
        }
    }

    /// Parse and normalize a JSON string; anything unparseable becomes the
    /// empty policy.
    pub fn from_json_str(raw: &str) -> Policy {
        serde_json::from_str::<Value>(raw)
            .map(|v| Policy::normalize(&v))
            .unwrap_or_default()
    }

    /// Threshold for a type, defaulting to 0 when unset.
    pub fn threshold_for(&self, entity_type: EntityType) -> f64 {
        self.thresholds.get(&entity_type).copied().unwrap_or(0.0)
    }

    /// Render the canonical JSON shape (for reports).
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("mask_all".into(), Value::Bool(self.mask_all));
        obj.insert(
            "entities".into(),
            Value::Array(
                self.entities
                    .iter()
                    .map(|t| Value::String(t.as_str().to_string()))
                    .collect(),
            ),
        );
        let thresholds: Map<String, Value> = self
            .thresholds
            .iter()
            .filter_map(|(t, v)| {
                Some((t.as_str().to_string(), Value::Number(serde_json::Number::from_f64(*v)?)))
            })
            .collect();
        obj.insert("thresholds".into(), Value::Object(thresholds));
        let actions: Map<String, Value> = self
            .actions
            .iter()
            .map(|(t, a)| (t.as_str().to_string(), action_to_value(a)))
            .collect();
        obj.insert("actions".into(), Value::Object(actions));
        if let Some(p) = self.preserve_length {
            obj.insert("preserve_length".into(), Value::Bool(p));
        }
        Value::Object(obj)
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn normalize_action(cfg: &Map<String, Value>) -> MaskAction {
    let action = cfg
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("remove")
        .to_ascii_lowercase();

    let template = cfg
        .get("template")
        .and_then(Value::as_str)
        .filter(|t| !template_echoes_original(t))
        .map(str::to_string);

    let keep_parts = cfg
        .get("keep_parts")
        .and_then(Value::as_object)
        .and_then(|kp| kp.get("last"))
        .and_then(Value::as_u64)
        .map(|last| KeepParts { last: last as usize });

    match action.as_str() {
        "placeholder" => MaskAction::Placeholder(template),
        "pseudonymize" => MaskAction::Pseudonymize {
            template,
            keep_parts,
        },
        "format" => MaskAction::Format { keep_parts },
        // "remove" and anything unrecognized.
        _ => MaskAction::Remove,
    }
}

/// Templates that would echo the original value back into the output are
/// never honored.
fn template_echoes_original(template: &str) -> bool {
    template.contains("{orig}") || template.contains("{text}")
}

fn action_to_value(action: &MaskAction) -> Value {
    let mut obj = Map::new();
    obj.insert("action".into(), Value::String(action.name().to_string()));
    match action {
        MaskAction::Placeholder(Some(template))
        | MaskAction::Pseudonymize {
            template: Some(template),
            ..
        } => {
            obj.insert("template".into(), Value::String(template.clone()));
        }
        _ => {}
    }
    let keep_parts = match action {
        MaskAction::Pseudonymize { keep_parts, .. } | MaskAction::Format { keep_parts } => {
            *keep_parts
        }
        _ => None,
    };
    if let Some(kp) = keep_parts {
        obj.insert(
            "keep_parts".into(),
            serde_json::json!({ "last": kp.last }),
        );
    }
    Value::Object(obj)
}

/// Built-in pseudonym template for a type, used when the policy sets none.
pub fn default_template(entity_type: EntityType) -> String {
    match entity_type {
        EntityType::PersonName => "NAME_{hash8}".to_string(),
        EntityType::Address => "ADDRESS_{hash6}".to_string(),
        EntityType::Email => "EMAIL_{hash6}@mask.local".to_string(),
        EntityType::Phone => "PHONE_{hash6}_{orig_last:4}".to_string(),
        EntityType::PostalCode => "ZIP_{hash4}".to_string(),
        other => format!("{}_{{hash6}}", other.as_str().to_uppercase()),
    }
}

/// Compute the text-rewriter replacement for one span.
///
/// Spans of a type with no configured action fall back to pseudonymization
/// with the type's default template.
pub fn replacement_for(
    policy: &Policy,
    entity_type: EntityType,
    original: &str,
    pseudonymizer: &mut Pseudonymizer,
) -> String {
    let tag = entity_type.as_str();
    match policy.actions.get(&entity_type) {
        Some(MaskAction::Remove) => String::new(),
        Some(MaskAction::Placeholder(template)) => template
            .clone()
            .unwrap_or_else(|| format!("[{tag}]")),
        Some(MaskAction::Pseudonymize {
            template,
            keep_parts,
        }) => {
            let template = template
                .clone()
                .unwrap_or_else(|| default_template(entity_type));
            pseudonymizer.pseudonymize_with(
                original,
                tag,
                &template,
                &RenderOptions {
                    keep_last: keep_parts.map(|kp| kp.last),
                    ..Default::default()
                },
            )
        }
        Some(MaskAction::Format { keep_parts }) => pseudonymizer.pseudonymize_with(
            original,
            tag,
            "{shape}",
            &RenderOptions {
                keep_last: keep_parts.map(|kp| kp.last),
                ..Default::default()
            },
        ),
        None => {
            let template = default_template(entity_type);
            pseudonymizer.pseudonymize(original, tag, &template)
        }
    }
}

/// PDF-side replacement resolution.
///
/// Returns `None` both for `remove` (blank rectangle) and for spans whose
/// type has no configured action; the PDF planner decides the fallback for
/// the latter.
pub fn resolve_pdf_mask_text(
    policy: &Policy,
    pseudonymizer: Option<&mut Pseudonymizer>,
    entity_type: EntityType,
    original: &str,
) -> Option<String> {
    let tag = entity_type.as_str();
    match policy.actions.get(&entity_type)? {
        MaskAction::Remove => None,
        MaskAction::Placeholder(template) => Some(
            template
                .clone()
                .unwrap_or_else(|| format!("[{tag}]")),
        ),
        MaskAction::Pseudonymize {
            template,
            keep_parts,
        } => {
            let template = template
                .clone()
                .unwrap_or_else(|| default_template(entity_type));
            let p = pseudonymizer?;
            Some(p.pseudonymize_with(
                original,
                tag,
                &template,
                &RenderOptions {
                    keep_last: keep_parts.map(|kp| kp.last),
                    ..Default::default()
                },
            ))
        }
        MaskAction::Format { keep_parts } => {
            let p = pseudonymizer?;
            Some(p.pseudonymize_with(
                original,
                tag,
                "{shape}",
                &RenderOptions {
                    keep_last: keep_parts.map(|kp| kp.last),
                    ..Default::default()
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudonym::HashAlgo;
    use serde_json::json;

    fn pseudo() -> Pseudonymizer {
        Pseudonymizer::new(b"e".to_vec(), b"d".to_vec(), HashAlgo::Sha256)
    }

    #[test]
    fn test_normalize_basic() {
        let raw = json!({
            "mask_all": false,
            "entities": ["email", "phone"],
            "thresholds": {"email": 0.8, "phone": 0.7},
            "actions": {
                "email": {"action": "pseudonymize", "template": "EMAIL_{hash8}@mask.local"},
                "phone": {"action": "format", "keep_parts": {"last": 4}},
                "credentials": {"action": "remove"},
            },
        });
        let p = Policy::normalize(&raw);
        assert!(p.entities.contains(&EntityType::Email));
        assert!(p.entities.contains(&EntityType::Phone));
        assert_eq!(p.threshold_for(EntityType::Email), 0.8);
        assert!(matches!(
            p.actions.get(&EntityType::Email),
            Some(MaskAction::Pseudonymize { template: Some(_), .. })
        ));
        assert!(matches!(
            p.actions.get(&EntityType::Phone),
            Some(MaskAction::Format { keep_parts: Some(KeepParts { last: 4 }) })
        ));
        assert!(matches!(
            p.actions.get(&EntityType::Credentials),
            Some(MaskAction::Remove)
        ));
    }

    #[test]
    fn test_normalize_is_lenient() {
        let raw = json!({
            "entities": ["email", "no_such_type", 7],
            "thresholds": {"email": "0.6", "phone": "high", "mystery": 0.5},
            "actions": {"email": {"action": "EXPLODE"}},
            "unknown_key": {"ignored": true},
        });
        let p = Policy::normalize(&raw);
        assert_eq!(p.entities.len(), 1);
        assert_eq!(p.threshold_for(EntityType::Email), 0.6);
        assert!(!p.thresholds.contains_key(&EntityType::Phone));
        // Unrecognized action falls back to remove.
        assert!(matches!(p.actions.get(&EntityType::Email), Some(MaskAction::Remove)));
    }

    #[test]
    fn test_non_object_policy_is_empty() {
        assert_eq!(Policy::normalize(&json!([1, 2])), Policy::default());
        assert_eq!(Policy::from_json_str("not json"), Policy::default());
    }

    #[test]
    fn test_template_echoing_original_is_stripped() {
        let raw = json!({
            "entities": ["email"],
            "actions": {"email": {"action": "pseudonymize", "template": "{orig}"}},
        });
        let p = Policy::normalize(&raw);
        assert!(matches!(
            p.actions.get(&EntityType::Email),
            Some(MaskAction::Pseudonymize { template: None, .. })
        ));

        let raw = json!({
            "entities": ["email"],
            "actions": {"email": {"action": "placeholder", "template": "was {text}"}},
        });
        let p = Policy::normalize(&raw);
        assert!(matches!(
            p.actions.get(&EntityType::Email),
            Some(MaskAction::Placeholder(None))
        ));
    }

    #[test]
    fn test_negative_keep_parts_dropped() {
        let raw = json!({
            "entities": ["phone"],
            "actions": {"phone": {"action": "format", "keep_parts": {"last": -3}}},
        });
        let p = Policy::normalize(&raw);
        assert!(matches!(
            p.actions.get(&EntityType::Phone),
            Some(MaskAction::Format { keep_parts: None })
        ));
    }

    #[test]
    fn test_default_templates() {
        assert_eq!(default_template(EntityType::PersonName), "NAME_{hash8}");
        assert_eq!(default_template(EntityType::Email), "EMAIL_{hash6}@mask.local");
        assert_eq!(default_template(EntityType::Phone), "PHONE_{hash6}_{orig_last:4}");
        assert_eq!(default_template(EntityType::PostalCode), "ZIP_{hash4}");
        assert_eq!(default_template(EntityType::Credentials), "CREDENTIALS_{hash6}");
    }

    #[test]
    fn test_replacement_dispatch() {
        let raw = json!({
            "entities": ["email", "phone", "credentials", "person_name"],
            "actions": {
                "email": {"action": "pseudonymize", "template": "EMAIL_{hash6}@mask.local"},
                "phone": {"action": "pseudonymize", "template": "PHONE_{hash6}_{orig_last:4}"},
                "credentials": {"action": "remove"},
                "person_name": {"action": "placeholder"},
            },
        });
        let policy = Policy::normalize(&raw);
        let mut p = pseudo();

        let email = replacement_for(&policy, EntityType::Email, "alice@example.com", &mut p);
        assert!(email.ends_with("@mask.local") && email.len() > "@mask.local".len());

        let phone = replacement_for(&policy, EntityType::Phone, "415-555-1234", &mut p);
        assert!(phone.ends_with("1234"));

        let cred = replacement_for(&policy, EntityType::Credentials, "eyJabc.123.456", &mut p);
        assert_eq!(cred, "");

        let name = replacement_for(&policy, EntityType::PersonName, "Alice", &mut p);
        assert_eq!(name, "[person_name]");

        // Unset action falls back to the default template.
        let zip = replacement_for(&policy, EntityType::PostalCode, "94103", &mut p);
        assert!(zip.starts_with("ZIP_"));
    }

    #[test]
    fn test_format_action_keeps_shape_and_tail() {
        let raw = json!({
            "entities": ["phone"],
            "actions": {"phone": {"action": "format", "keep_parts": {"last": 4}}},
        });
        let policy = Policy::normalize(&raw);
        let mut p = pseudo();
        let out = replacement_for(&policy, EntityType::Phone, "415-555-1234", &mut p);
        assert!(out.starts_with("999-999-9999"));
        assert!(out.ends_with("1234"));
    }

    #[test]
    fn test_resolve_pdf_mask_text() {
        let raw = json!({
            "entities": ["email", "credentials"],
            "actions": {
                "email": {"action": "pseudonymize", "template": "EMAIL_{hash6}@mask.local"},
                "credentials": {"action": "remove"},
            },
        });
        let policy = Policy::normalize(&raw);
        let mut p = pseudo();

        let email =
            resolve_pdf_mask_text(&policy, Some(&mut p), EntityType::Email, "alice@example.com");
        assert!(email.is_some_and(|s| s.ends_with("@mask.local")));

        let cred =
            resolve_pdf_mask_text(&policy, Some(&mut p), EntityType::Credentials, "eyJa.b.c");
        assert!(cred.is_none());

        // No configured action: the planner decides, so this resolves None.
        let zip = resolve_pdf_mask_text(&policy, Some(&mut p), EntityType::PostalCode, "94103");
        assert!(zip.is_none());
    }

    #[test]
    fn test_to_value_round_trips() {
        let raw = json!({
            "mask_all": false,
            "entities": ["email"],
            "thresholds": {"email": 0.75},
            "actions": {"email": {"action": "pseudonymize", "template": "E_{hash4}"}},
            "preserve_length": false,
        });
        let policy = Policy::normalize(&raw);
        let rendered = policy.to_value();
        assert_eq!(Policy::normalize(&rendered), policy);
    }
}
