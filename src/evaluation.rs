//! Counter-only evaluation against a labelled truth set. Nothing here ever
//! records span content, only counts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::entity::{EntityType, Span};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub truth_count: usize,
    pub predicted_count: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// A prediction is a true positive iff it overlaps at least one so-far
/// unmatched truth span of the same type; each truth span matches at most
/// once. Unmatched truths are false negatives, unmatched predictions false
/// positives.
pub fn evaluate_entities(truth: &[Span], predicted: &[Span]) -> EvaluationMetrics {
    let mut by_type: BTreeMap<EntityType, Vec<(&Span, bool)>> = BTreeMap::new();
    for t in truth {
        by_type.entry(t.entity_type).or_default().push((t, false));
    }

    let mut tp = 0usize;
    let mut fp = 0usize;

    for p in predicted {
        let matched = by_type.get_mut(&p.entity_type).and_then(|candidates| {
            candidates
                .iter_mut()
                .find(|(t, used)| !used && overlap(p, t) > 0)
        });
        match matched {
            Some(slot) => {
                slot.1 = true;
                tp += 1;
            }
            None => fp += 1,
        }
    }

    let truth_count = truth.len();
    let matched_truths: usize = by_type
        .values()
        .map(|v| v.iter().filter(|(_, used)| *used).count())
        .sum();
    let false_negatives = truth_count - matched_truths;

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + false_negatives);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    EvaluationMetrics {
        truth_count,
        predicted_count: predicted.len(),
        true_positives: tp,
        false_positives: fp,
        false_negatives,
        precision,
        recall,
        f1,
    }
}

fn overlap(a: &Span, b: &Span) -> usize {
    a.end.min(b.end).saturating_sub(a.start.max(b.start))
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
