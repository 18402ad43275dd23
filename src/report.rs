//! Entity ledger: the per-span record set emitted by dry-run mode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::entity::Span;
use crate::policy::Policy;

/// One retained span, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_text: Option<String>,
    pub action: String,
    pub confidence: f64,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// The full dry-run ledger for one document.
#[derive(Debug, Serialize)]
pub struct LedgerReport {
    pub document_path: String,
    pub document_type: String,
    pub generated_at: DateTime<Utc>,
    pub total_entities: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub actions_applied: BTreeMap<String, usize>,
    pub total_characters: usize,
    pub entities: Vec<EntityRecord>,
    pub policy_used: Value,
}

/// Assigns sequential `<type>_<counter>` ids across one document.
#[derive(Debug, Default)]
pub struct LedgerBuilder {
    counter: u64,
}

impl LedgerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_entity_id(&mut self, entity_type: &str) -> String {
        self.counter += 1;
        format!("{}_{:04}", entity_type, self.counter)
    }

    /// Record one span with the action the policy would apply.
    pub fn record(
        &mut self,
        span: &Span,
        action: &str,
        masked_text: Option<String>,
        page_number: Option<usize>,
        span_id: Option<String>,
    ) -> EntityRecord {
        let tag = span.entity_type.as_str();
        EntityRecord {
            entity_id: self.next_entity_id(tag),
            entity_type: tag.to_string(),
            start: span.start,
            end: span.end,
            text: span.text.clone(),
            masked_text,
            action: action.to_string(),
            confidence: span.score,
            source: span.source.clone(),
            page_number,
            span_id,
        }
    }
}

/// Build the ledger for a set of post-aggregation spans. The per-span
/// action is the configured action's name, or `mask` when the policy sets
/// none.
pub fn build_ledger(
    document_path: &str,
    document_type: &str,
    spans: &[Span],
    policy: &Policy,
    total_characters: usize,
) -> LedgerReport {
    build_report(
        document_path,
        document_type,
        vec![(None, spans)],
        policy,
        total_characters,
    )
}

/// Ledger over per-page span groups; each record carries its page number.
pub fn build_pdf_ledger(
    document_path: &str,
    pages: &[(u32, Vec<Span>)],
    policy: &Policy,
    total_characters: usize,
) -> LedgerReport {
    let groups = pages
        .iter()
        .map(|(number, spans)| (Some(*number as usize), spans.as_slice()))
        .collect();
    build_report(document_path, "pdf", groups, policy, total_characters)
}

fn build_report(
    document_path: &str,
    document_type: &str,
    groups: Vec<(Option<usize>, &[Span])>,
    policy: &Policy,
    total_characters: usize,
) -> LedgerReport {
    let mut builder = LedgerBuilder::new();
    let mut entities_by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut actions_applied: BTreeMap<String, usize> = BTreeMap::new();
    let mut entities = Vec::new();

    for (page_number, spans) in groups {
        for span in spans {
            let action = policy
                .actions
                .get(&span.entity_type)
                .map(|a| a.name())
                .unwrap_or("mask");
            *entities_by_type
                .entry(span.entity_type.as_str().to_string())
                .or_insert(0) += 1;
            *actions_applied.entry(action.to_string()).or_insert(0) += 1;
            entities.push(builder.record(span, action, None, page_number, None));
        }
    }

    LedgerReport {
        document_path: document_path.to_string(),
        document_type: document_type.to_string(),
        generated_at: Utc::now(),
        total_entities: entities.len(),
        entities_by_type,
        actions_applied,
        total_characters,
        entities,
        policy_used: policy.to_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use serde_json::json;

    #[test]
    fn test_entity_ids_are_sequential() {
        let mut builder = LedgerBuilder::new();
        let span = Span::new(EntityType::Email, 0, 5, "a@b.c", 0.9, "rules");
        let first = builder.record(&span, "remove", None, None, None);
        let second = builder.record(&span, "remove", None, None, None);
        assert_eq!(first.entity_id, "email_0001");
        assert_eq!(second.entity_id, "email_0002");
    }

    #[test]
    fn test_build_ledger_counts_types_and_actions() {
        let policy = Policy::normalize(&json!({
            "entities": ["email", "phone"],
            "actions": {"email": {"action": "remove"}},
        }));
        let spans = vec![
            Span::new(EntityType::Email, 0, 5, "a@b.c", 0.9, "rules"),
            Span::new(EntityType::Email, 10, 15, "d@e.f", 0.8, "rules"),
            Span::new(EntityType::Phone, 20, 30, "5551234567", 0.8, "rules"),
        ];
        let report = build_ledger("in.txt", "text", &spans, &policy, 42);
        assert_eq!(report.total_entities, 3);
        assert_eq!(report.entities_by_type.get("email"), Some(&2));
        assert_eq!(report.entities_by_type.get("phone"), Some(&1));
        assert_eq!(report.actions_applied.get("remove"), Some(&2));
        assert_eq!(report.actions_applied.get("mask"), Some(&1));
        assert_eq!(report.total_characters, 42);
    }

    #[test]
    fn test_pdf_ledger_carries_page_numbers() {
        let policy = Policy::normalize(&json!({"entities": ["email"]}));
        let pages = vec![
            (1u32, vec![Span::new(EntityType::Email, 0, 5, "a@b.c", 0.9, "rules")]),
            (3u32, vec![Span::new(EntityType::Email, 2, 7, "d@e.f", 0.9, "rules")]),
        ];
        let report = build_pdf_ledger("in.pdf", &pages, &policy, 10);
        assert_eq!(report.document_type, "pdf");
        assert_eq!(report.entities[0].page_number, Some(1));
        assert_eq!(report.entities[1].page_number, Some(3));
    }

    #[test]
    fn test_optional_fields_omitted_from_json() {
        let mut builder = LedgerBuilder::new();
        let span = Span::new(EntityType::Email, 0, 5, "a@b.c", 0.9, "rules");
        let record = builder.record(&span, "mask", None, None, None);
        let rendered = serde_json::to_string(&record).unwrap();
        assert!(!rendered.contains("masked_text"));
        assert!(!rendered.contains("page_number"));
        assert!(!rendered.contains("span_id"));
    }
}
