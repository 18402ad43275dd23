//! Span reconciliation: overlap merging and policy filtering.

use crate::entity::Span;
use crate::policy::Policy;

/// Merge overlapping same-type spans into their union, keeping the highest
/// score.
///
/// Spans are sorted by `(start ascending, end descending)` and walked once;
/// consecutive spans merge iff they share a type and the next one starts at
/// or before the current end. Idempotent.
pub fn merge_overlaps(spans: Vec<Span>) -> Vec<Span> {
    let mut sorted = spans;
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for span in iter {
        if span.entity_type == current.entity_type && span.start <= current.end {
            current.end = current.end.max(span.end);
            current.score = current.score.max(span.score);
        } else {
            merged.push(current);
            current = span;
        }
    }
    merged.push(current);
    merged
}

/// Drop spans whose type is unselected or whose score is below the type's
/// threshold. An empty selection yields an empty result. Input order is
/// preserved.
pub fn filter_by_policy(spans: Vec<Span>, policy: &Policy) -> Vec<Span> {
    if policy.entities.is_empty() {
        return Vec::new();
    }
    spans
        .into_iter()
        .filter(|span| {
            policy.entities.contains(&span.entity_type)
                && span.score >= policy.threshold_for(span.entity_type)
        })
        .collect()
}
