//! Optional named-entity recognition seam.
//!
//! The core never links a model. A backend, when one is available, plugs in
//! through [`NameRecognizer`]; with no backend the detector yields nothing
//! and never fails.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::entity::{EntityType, Span};

const SOURCE: &str = "ner";

/// A person-name span as reported by a backend: byte offsets plus
/// confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonMatch {
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

/// Capability provided by a pluggable NER backend.
pub trait NameRecognizer: Send + Sync {
    fn person_spans(&self, text: &str) -> Vec<PersonMatch>;
}

/// Map backend PERSON matches to `person_name` spans. Out-of-bounds or
/// empty matches from a misbehaving backend are dropped.
pub fn detect_person_names(
    text: &str,
    selected: &BTreeSet<EntityType>,
    backend: Option<&dyn NameRecognizer>,
) -> Result<Vec<Span>> {
    if !selected.contains(&EntityType::PersonName) {
        return Ok(Vec::new());
    }
    let Some(backend) = backend else {
        return Ok(Vec::new());
    };

    let spans = backend
        .person_spans(text)
        .into_iter()
        .filter(|m| {
            m.start < m.end
                && m.end <= text.len()
                && text.is_char_boundary(m.start)
                && text.is_char_boundary(m.end)
        })
        .map(|m| {
            Span::new(
                EntityType::PersonName,
                m.start,
                m.end,
                &text[m.start..m.end],
                m.score,
                SOURCE,
            )
        })
        .collect();
    Ok(spans)
}
