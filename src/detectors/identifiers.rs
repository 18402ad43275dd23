//! Device, network and location identifiers. Everything here rolls up into
//! the `metadata` entity type; the subrule is kept in the span source.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::detectors::context_window;
use crate::entity::{EntityType, Span};

struct IdentifierPatterns {
    ipv4: Regex,
    ipv6: Regex,
    mac: Regex,
    cookie: Regex,
    hostname: Regex,
    host_context: Regex,
    fifteen_digits: Regex,
    meid_hex: Regex,
    imei_meid_context: Regex,
    gps: Regex,
    gps_label: Regex,
    geohash: Regex,
    geohash_label: Regex,
    date: Regex,
    travel_label: Regex,
}

fn patterns() -> Option<&'static IdentifierPatterns> {
    static PATTERNS: OnceLock<Option<IdentifierPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(IdentifierPatterns {
                ipv4: Regex::new(
                    r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
                )
                .ok()?,
                ipv6: Regex::new(r"\b(?:(?:[A-Fa-f0-9]{1,4}:){2,7}[A-Fa-f0-9]{1,4})\b").ok()?,
                mac: Regex::new(r"\b(?:[0-9A-Fa-f]{2}[:\-]){5}[0-9A-Fa-f]{2}\b").ok()?,
                cookie: Regex::new(
                    r"(?i)\b(sessionid|jsessionid|csrftoken|auth_token|sid)=[A-Za-z0-9\-_.]{8,}",
                )
                .ok()?,
                hostname: Regex::new(
                    r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[A-Za-z]{2,}\b",
                )
                .ok()?,
                host_context: Regex::new(r"(?i)(host|hostname|domain)").ok()?,
                fifteen_digits: Regex::new(r"\b\d{15}\b").ok()?,
                meid_hex: Regex::new(r"\b[0-9A-Fa-f]{14}\b").ok()?,
                imei_meid_context: Regex::new(r"(?i)(imei|meid)").ok()?,
                gps: Regex::new(
                    r"\b([+-]?(?:[1-8]?\d(?:\.\d+)?|90(?:\.0+)?))\s*,\s*([+-]?(?:1[0-7]\d(?:\.\d+)?|\d?\d(?:\.\d+)?|180(?:\.0+)?))\b",
                )
                .ok()?,
                gps_label: Regex::new(r"(?i)(gps|coord|latitude|longitude|lat|lon)").ok()?,
                geohash: Regex::new(r"\b[0123456789bcdefghjkmnpqrstuvwxyz]{5,9}\b").ok()?,
                geohash_label: Regex::new(r"(?i)(geohash)").ok()?,
                date: Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4})\b").ok()?,
                travel_label: Regex::new(
                    r"(?i)(flight|itinerary|arrival|departure|gate|terminal|boarding)",
                )
                .ok()?,
            })
        })
        .as_ref()
}

pub fn detect_identifiers(text: &str, selected: &BTreeSet<EntityType>) -> Result<Vec<Span>> {
    if !selected.contains(&EntityType::Metadata) {
        return Ok(Vec::new());
    }
    let pats = patterns().ok_or_else(|| anyhow!("identifier patterns failed to compile"))?;
    let mut results = Vec::new();

    let mut add = |start: usize, end: usize, value: &str, source: &str, score: f64| {
        results.push(Span::new(EntityType::Metadata, start, end, value, score, source));
    };

    for m in pats.ipv4.find_iter(text) {
        add(m.start(), m.end(), m.as_str(), "ipv4", 0.9);
    }
    for m in pats.ipv6.find_iter(text) {
        add(m.start(), m.end(), m.as_str(), "ipv6", 0.85);
    }
    for m in pats.mac.find_iter(text) {
        add(m.start(), m.end(), m.as_str(), "mac", 0.9);
    }
    for m in pats.cookie.find_iter(text) {
        add(m.start(), m.end(), m.as_str(), "cookie", 0.95);
    }

    // Hostnames only where the neighborhood mentions host/domain.
    for m in pats.hostname.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 32);
        if pats.host_context.is_match(window) {
            add(m.start(), m.end(), m.as_str(), "hostname", 0.85);
        }
    }

    for m in pats.fifteen_digits.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 24);
        if pats.imei_meid_context.is_match(window) {
            add(m.start(), m.end(), m.as_str(), "imei", 0.9);
        }
    }
    for m in pats.meid_hex.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 24);
        if pats.imei_meid_context.is_match(window) {
            add(m.start(), m.end(), m.as_str(), "meid", 0.9);
        }
    }

    // Decimal coordinate pairs; a nearby GPS label raises the score.
    for m in pats.gps.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 32);
        let score = if pats.gps_label.is_match(window) { 0.95 } else { 0.85 };
        add(m.start(), m.end(), m.as_str(), "gps", score);
    }

    for m in pats.geohash.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 16);
        if pats.geohash_label.is_match(window) {
            add(m.start(), m.end(), m.as_str(), "geohash", 0.9);
        }
    }

    // Itinerary heuristic: a date near travel vocabulary.
    for m in pats.date.find_iter(text) {
        let window = context_window(text, m.start(), m.end(), 40);
        if pats.travel_label.is_match(window) {
            add(m.start(), m.end(), m.as_str(), "itinerary", 0.8);
        }
    }

    Ok(results)
}
