//! Protected health information: diagnosis/procedure codes and record
//! numbers behind labels.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::entity::{EntityType, Span};

/// Bytes scanned after an MRN/insurance label for the identifier token.
const LABEL_WINDOW: usize = 64;

struct PhiPatterns {
    // Letter + two digits, optional dotted extension (simplified ICD-10).
    icd10: Regex,
    // Five digits; collides with US ZIP on purpose, thresholds arbitrate.
    cpt: Regex,
    mrn_label: Regex,
    alnum_token: Regex,
}

fn patterns() -> Option<&'static PhiPatterns> {
    static PATTERNS: OnceLock<Option<PhiPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(PhiPatterns {
                icd10: Regex::new(r"\b[A-TV-Z][0-9]{2}(?:\.[A-Z0-9]{1,4})?\b").ok()?,
                cpt: Regex::new(r"\b[0-9]{5}\b").ok()?,
                mrn_label: Regex::new(
                    r"(?i)\b(MRN|Med\.? Rec\.? No\.?|Medical Record Number|Member ID|Policy #|Insurance ID)\b",
                )
                .ok()?,
                alnum_token: Regex::new(r"\b[A-Z0-9]{6,12}\b").ok()?,
            })
        })
        .as_ref()
}

pub fn detect_phi(text: &str, selected: &BTreeSet<EntityType>) -> Result<Vec<Span>> {
    if !selected.contains(&EntityType::Health) {
        return Ok(Vec::new());
    }
    let pats = patterns().ok_or_else(|| anyhow!("phi patterns failed to compile"))?;
    let mut results = Vec::new();

    for m in pats.icd10.find_iter(text) {
        results.push(Span::new(
            EntityType::Health,
            m.start(),
            m.end(),
            m.as_str(),
            0.85,
            "icd10",
        ));
    }

    for m in pats.cpt.find_iter(text) {
        results.push(Span::new(
            EntityType::Health,
            m.start(),
            m.end(),
            m.as_str(),
            0.8,
            "cpt",
        ));
    }

    // Record and insurance numbers: label, then the first alphanumeric
    // token in the window after it.
    for label in pats.mrn_label.find_iter(text) {
        let window_start = label.end();
        let window_end = (window_start + LABEL_WINDOW).min(text.len());
        let window = &text[window_start..window_end];
        if let Some(m) = pats.alnum_token.find(window) {
            results.push(Span::new(
                EntityType::Health,
                window_start + m.start(),
                window_start + m.end(),
                m.as_str(),
                0.9,
                "mrn_or_insurance",
            ));
        }
    }

    Ok(results)
}
