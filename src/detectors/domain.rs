//! Domain-sensitive markers: transportation, legal, commercial,
//! communications, employment/education, and dictionary-backed special
//! categories. Everything rolls up into the `metadata` entity type.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::detectors::context_window;
use crate::entity::{EntityType, Span};

const PLATE_WINDOW: usize = 32;
const EMP_EDU_WINDOW: usize = 48;

const GDPR_TERMS: &str = include_str!("../../dictionaries/gdpr_special.txt");
const CHILDREN_TERMS: &str = include_str!("../../dictionaries/children.txt");

struct DomainPatterns {
    vin: Regex,
    plate_label: Regex,
    plate_token: Regex,
    legal_case: Regex,
    docket: Regex,
    privileged: Regex,
    settlement: Regex,
    commercial_label: Regex,
    currency: Regex,
    header: Regex,
    meeting: Regex,
    emp_edu_label: Regex,
    emp_edu_token: Regex,
    gdpr: Regex,
    children: Regex,
}

fn patterns() -> Option<&'static DomainPatterns> {
    static PATTERNS: OnceLock<Option<DomainPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(DomainPatterns {
                vin: Regex::new(r"\b[A-HJ-NPR-Z0-9]{17}\b").ok()?,
                plate_label: Regex::new(r"(?i)(plate|license plate)").ok()?,
                plate_token: Regex::new(r"\b[A-Z0-9\-]{5,8}\b").ok()?,
                legal_case: Regex::new(r"(?i)Case\s*(No\.|#)?\s*[:#]?\s*[A-Za-z0-9\-:]+").ok()?,
                docket: Regex::new(r"(?i)(Dkt\.|Docket)\s*[:#]?\s*[A-Za-z0-9\-:]+").ok()?,
                privileged: Regex::new(r"(?i)(Attorney\s*-?\s*Client|Privileged|Confidential)\b.*")
                    .ok()?,
                settlement: Regex::new(r"(?i)(Settlement\s+Agreement|Settlement\s+Terms)").ok()?,
                commercial_label: Regex::new(
                    r"(?i)(pricing|price|margin|discount|msrp|cogs|roadmap|confidential|nda|customer list|supplier list)",
                )
                .ok()?,
                currency: Regex::new(r"\$\d[\d,]*(?:\.\d{2})?\b").ok()?,
                header: Regex::new(r"(?m)^(From|To|Subject|Date|Message-ID|Received):\s+.+$")
                    .ok()?,
                meeting: Regex::new(r"(?i)(meeting|attendees|agenda)").ok()?,
                emp_edu_label: Regex::new(
                    r"(?i)(Employee ID|EmpID|Student ID|Transcript|GPA|Performance Review)",
                )
                .ok()?,
                emp_edu_token: Regex::new(r"\b[A-Z0-9\-]{5,12}\b").ok()?,
                gdpr: dictionary_regex(GDPR_TERMS)?,
                children: dictionary_regex(CHILDREN_TERMS)?,
            })
        })
        .as_ref()
}

/// Case-insensitive word-boundary alternation over the dictionary terms,
/// longest first so multi-word terms win over their prefixes.
fn dictionary_regex(raw: &str) -> Option<Regex> {
    let mut terms: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return None;
    }
    terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let escaped: Vec<String> = terms.iter().map(|t| regex::escape(t)).collect();
    Regex::new(&format!(r"(?i)\b({})\b", escaped.join("|"))).ok()
}

pub fn detect_domain_sensitive(text: &str, selected: &BTreeSet<EntityType>) -> Result<Vec<Span>> {
    if !selected.contains(&EntityType::Metadata) {
        return Ok(Vec::new());
    }
    let pats = patterns().ok_or_else(|| anyhow!("domain patterns failed to compile"))?;
    let mut results = Vec::new();

    let mut add = |start: usize, end: usize, source: &str, score: f64| {
        results.push(Span::new(
            EntityType::Metadata,
            start,
            end,
            &text[start..end],
            score,
            source,
        ));
    };

    for m in pats.vin.find_iter(text) {
        add(m.start(), m.end(), "vin", 0.9);
    }

    // License plates: label, then the first plate-like token after it.
    for label in pats.plate_label.find_iter(text) {
        let window_start = label.end();
        let window_end = (window_start + PLATE_WINDOW).min(text.len());
        if let Some(m) = pats.plate_token.find(&text[window_start..window_end]) {
            add(window_start + m.start(), window_start + m.end(), "license_plate", 0.85);
        }
    }

    for m in pats.legal_case.find_iter(text) {
        add(m.start(), m.end(), "legal_case", 0.85);
    }
    for m in pats.docket.find_iter(text) {
        add(m.start(), m.end(), "docket", 0.85);
    }
    for m in pats.privileged.find_iter(text) {
        add(m.start(), m.end(), "privileged", 0.9);
    }
    for m in pats.settlement.find_iter(text) {
        add(m.start(), m.end(), "settlement", 0.8);
    }

    // Commercial keywords, boosted when money is nearby.
    for m in pats.commercial_label.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 32);
        let score = if pats.currency.is_match(window) { 0.9 } else { 0.8 };
        add(m.start(), m.end(), "commercial", score);
    }

    for m in pats.header.find_iter(text) {
        add(m.start(), m.end(), "email_header", 0.9);
    }
    for m in pats.meeting.find_iter(text) {
        add(m.start(), m.end(), "meeting", 0.8);
    }

    for label in pats.emp_edu_label.find_iter(text) {
        let window_start = label.end();
        let window_end = (window_start + EMP_EDU_WINDOW).min(text.len());
        if let Some(m) = pats.emp_edu_token.find(&text[window_start..window_end]) {
            add(
                window_start + m.start(),
                window_start + m.end(),
                "employment_education",
                0.85,
            );
        }
    }

    for m in pats.gdpr.find_iter(text) {
        add(m.start(), m.end(), "special_gdpr", 0.8);
    }
    for m in pats.children.find_iter(text) {
        add(m.start(), m.end(), "children", 0.85);
    }

    Ok(results)
}
