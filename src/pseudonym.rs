//! Keyed pseudonym generation with environment- and document-scoped keys.
//!
//! Deterministic given the same keys and inputs; unlinkable across different
//! keys. Supports template tokens `{hashN}`, `{index}`, `{date:FMT}`,
//! `{shape}` and `{orig_last:N}`.

use std::collections::HashMap;
use std::env;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

pub const ENV_KEY_VAR: &str = "DOC_MASKING_ENV_KEY";
pub const DOC_KEY_VAR: &str = "DOC_MASKING_DOC_KEY";

/// Separator between the entity type and the value inside the HMAC message,
/// so `("ab", "c")` and `("a", "bc")` never collide.
const FIELD_SEPARATOR: char = '\u{241F}';

/// Digest used for the keyed HMAC. SHA-1 exists only for legacy templates
/// that expect 40-character hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgo {
    #[default]
    Sha256,
    Sha1,
}

/// Per-call overrides for template rendering.
#[derive(Debug, Default)]
pub struct RenderOptions {
    /// Overrides the per-type counter for `{index}`.
    pub index: Option<u64>,
    /// Overrides the current UTC time for `{date:FMT}`.
    pub date: Option<DateTime<Utc>>,
    /// Appends the last N characters of the value unless the template
    /// already contains `{orig_last:`.
    pub keep_last: Option<usize>,
}

/// HMAC-based pseudonymizer.
///
/// One instance is owned by one document's processing; reuse across
/// documents requires [`Pseudonymizer::set_document_key`], which also
/// resets the per-type counters.
pub struct Pseudonymizer {
    env_key: Zeroizing<Vec<u8>>,
    doc_key: Zeroizing<Vec<u8>>,
    algo: HashAlgo,
    counters: HashMap<String, u64>,
}

impl Pseudonymizer {
    pub fn new(env_key: impl Into<Vec<u8>>, doc_key: impl Into<Vec<u8>>, algo: HashAlgo) -> Self {
        Self {
            env_key: Zeroizing::new(env_key.into()),
            doc_key: Zeroizing::new(doc_key.into()),
            algo,
            counters: HashMap::new(),
        }
    }

    /// Build from `DOC_MASKING_ENV_KEY` / `DOC_MASKING_DOC_KEY`; unset
    /// variables become empty keys.
    pub fn from_environment(algo: HashAlgo) -> Self {
        let env_key = env::var(ENV_KEY_VAR).unwrap_or_default();
        let doc_key = env::var(DOC_KEY_VAR).unwrap_or_default();
        Self::new(env_key.into_bytes(), doc_key.into_bytes(), algo)
    }

    /// Switch to a new document scope. Counters restart at zero so indexes
    /// are document-local.
    pub fn set_document_key(&mut self, doc_key: impl Into<Vec<u8>>) {
        self.doc_key = Zeroizing::new(doc_key.into());
        self.counters.clear();
    }

    /// Next value of the per-type counter, starting at 1.
    pub fn next_index(&mut self, entity_type: &str) -> u64 {
        let counter = self.counters.entry(entity_type.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn scoped_key(&self) -> Zeroizing<Vec<u8>> {
        if self.doc_key.is_empty() {
            return self.env_key.clone();
        }
        Zeroizing::new(hmac_digest(self.algo, &self.env_key, &self.doc_key))
    }

    fn digest_hex(&self, message: &str) -> String {
        let scoped = self.scoped_key();
        hex::encode(hmac_digest(self.algo, &scoped, message.as_bytes()))
    }

    /// Render a pseudonym for `original` using the default options.
    pub fn pseudonymize(&mut self, original: &str, entity_type: &str, template: &str) -> String {
        self.pseudonymize_with(original, entity_type, template, &RenderOptions::default())
    }

    /// Render a pseudonym with explicit index/date/keep overrides.
    ///
    /// Expansion is total: unknown tokens pass through literally and a bad
    /// date format leaves the token in place.
    pub fn pseudonymize_with(
        &mut self,
        original: &str,
        entity_type: &str,
        template: &str,
        opts: &RenderOptions,
    ) -> String {
        let normalized = original.trim();
        let index = opts
            .index
            .unwrap_or_else(|| self.next_index(entity_type));
        let date = opts.date.unwrap_or_else(Utc::now);
        let digest = self.digest_hex(&format!("{entity_type}{FIELD_SEPARATOR}{normalized}"));

        let mut out = expand_template(template, normalized, &digest, index, &date);

        if let Some(n) = opts.keep_last {
            if n > 0 && !template.contains("{orig_last:") {
                out.push_str(last_chars(normalized, n));
            }
        }
        out
    }
}

fn hmac_digest(algo: HashAlgo, key: &[u8], message: &[u8]) -> Vec<u8> {
    match algo {
        HashAlgo::Sha256 => {
            let mut mac =
                HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgo::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Single left-to-right scan over the template, expanding known tokens and
/// leaving everything else untouched.
fn expand_template(
    template: &str,
    normalized: &str,
    digest: &str,
    index: u64,
    date: &DateTime<Utc>,
) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            // Unterminated brace: emit the remainder verbatim.
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        match expand_token(token, normalized, digest, index, date) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_token(
    token: &str,
    normalized: &str,
    digest: &str,
    index: u64,
    date: &DateTime<Utc>,
) -> Option<String> {
    if token == "index" {
        return Some(index.to_string());
    }
    if token == "shape" {
        return Some(token_shape(normalized));
    }
    if let Some(n) = token.strip_prefix("hash").and_then(|n| n.parse::<usize>().ok()) {
        return Some(digest[..n.min(digest.len())].to_string());
    }
    if let Some(fmt) = token.strip_prefix("date:") {
        return format_date(date, fmt);
    }
    if let Some(n) = token
        .strip_prefix("orig_last:")
        .and_then(|n| n.parse::<usize>().ok())
    {
        return Some(last_chars(normalized, n).to_string());
    }
    None
}

/// Character-class projection: digits to `9`, uppercase to `A`, lowercase
/// to `a`, whitespace to a space, anything else kept.
pub fn token_shape(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_numeric() {
                '9'
            } else if ch.is_alphabetic() {
                if ch.is_uppercase() {
                    'A'
                } else {
                    'a'
                }
            } else if ch.is_whitespace() {
                ' '
            } else {
                ch
            }
        })
        .collect()
}

/// Formats without panicking; chrono surfaces bad specifiers as a write
/// error, which we turn into `None` so the token stays literal.
fn format_date(date: &DateTime<Utc>, fmt: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", date.format(fmt)).ok()?;
    Some(out)
}

/// Last `n` characters (not bytes) of `value`.
fn last_chars(value: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = value.chars().count();
    let skip = total.saturating_sub(n);
    match value.char_indices().nth(skip) {
        Some((offset, _)) => &value[offset..],
        None => "",
    }
}
