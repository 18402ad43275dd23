//! Line-based street address heuristics.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::entity::{EntityType, Span};

const SOURCE: &str = "heuristics";

const STREET_SUFFIXES: &[&str] = &[
    "st", "street", "ave", "avenue", "rd", "road", "blvd", "lane", "ln", "dr", "drive", "ct",
    "court", "pl", "place", "trl", "trail", "pkwy", "parkway", "sq", "square", "hwy", "highway",
    "cir", "circle", "way",
];

const UNIT_KEYWORDS: &[&str] = &["apt", "unit", "suite", "ste", "#"];

const ADDRESS_LABELS: &[&str] = &["address", "addr"];

const NEXT_LINE_CUES: &[&str] = &[
    "city", "town", "village", "state", "province", "region", "zip", "postal", "postcode",
];

/// A line qualifies when it starts with a number and contains a street
/// suffix, or contains a suffix together with a unit keyword. Explicit
/// `address:`-style labels also qualify. A following line with
/// city/state/postal cues raises the confidence.
pub fn detect_addresses(text: &str, selected: &BTreeSet<EntityType>) -> Result<Vec<Span>> {
    if !selected.contains(&EntityType::Address) {
        return Ok(Vec::new());
    }

    let mut lines = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        lines.push((offset, line));
        offset += line.len();
    }

    let mut results = Vec::new();
    for (idx, (line_start, line)) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        let low = stripped.to_lowercase();
        let has_label = ADDRESS_LABELS.iter().any(|lbl| low.contains(lbl));
        let street_like = looks_like_street_line(&low);
        if !has_label && !street_like {
            continue;
        }

        let context_cue = lines
            .get(idx + 1)
            .map(|(_, next)| {
                let next_low = next.trim().to_lowercase();
                NEXT_LINE_CUES.iter().any(|cue| next_low.contains(cue))
            })
            .unwrap_or(false);

        let mut score = if street_like { 0.7 } else { 0.6 };
        if street_like && context_cue {
            score += 0.1;
        }

        let lead = line.len() - line.trim_start().len();
        let start = line_start + lead;
        let end = start + stripped.len();
        results.push(Span::new(EntityType::Address, start, end, stripped, score, SOURCE));
    }
    Ok(results)
}

fn looks_like_street_line(low: &str) -> bool {
    let tokens: Vec<&str> = low
        .split_whitespace()
        .map(|t| t.trim_matches(|c| c == ',' || c == '.' || c == ' '))
        .collect();
    let Some(first) = tokens.first() else {
        return false;
    };
    let starts_with_number = !first.is_empty() && first.chars().all(|c| c.is_ascii_digit());
    let has_suffix = tokens.iter().any(|t| STREET_SUFFIXES.contains(t));
    let has_unit = tokens.iter().any(|t| UNIT_KEYWORDS.contains(t));
    (starts_with_number && has_suffix) || (has_suffix && has_unit)
}
