//! Text rewriting: span substitution and the mask-all bypass.

use anyhow::Result;

use crate::entity::Span;

/// Character used for length-preserving masks.
pub const MASK_CHAR: char = 'x';

/// Replace every ASCII letter and digit with `x`, preserving whitespace,
/// punctuation and any non-ASCII content. Output length equals input
/// length.
pub fn mask_alphanumeric(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { MASK_CHAR } else { ch })
        .collect()
}

/// Rewrite `text` by substituting each span, emitting untouched runs
/// in between.
///
/// Spans are processed in document order. A span starting before the
/// previous one ended is clamped to the previous end and skipped when that
/// leaves it empty. Offsets landing inside a multi-byte sequence are
/// clamped to the nearest earlier char boundary.
///
/// `replace` computes the substitution for one span; when it is absent or
/// fails, the fallback is a length-preserving `x`-run, or `[<type>]` when
/// `preserve_length` is false.
pub fn mask_text_spans(
    text: &str,
    spans: &[Span],
    preserve_length: bool,
    mut replace: Option<&mut dyn FnMut(&Span, &str) -> Result<String>>,
) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    let mut ordered: Vec<&Span> = spans.iter().collect();
    ordered.sort_by_key(|s| s.start);

    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;

    for span in ordered {
        let mut start = span.start.max(last);
        let mut end = span.end.min(text.len());
        start = floor_char_boundary(text, start);
        end = floor_char_boundary(text, end);
        if end <= start {
            continue;
        }

        out.push_str(&text[last..start]);
        let original = &text[start..end];

        let replacement = match replace.as_mut() {
            Some(f) => f(span, original).ok(),
            None => None,
        };
        match replacement {
            Some(r) => out.push_str(&r),
            None if preserve_length => {
                out.extend(std::iter::repeat(MASK_CHAR).take(original.chars().count()));
            }
            None => {
                out.push('[');
                out.push_str(span.entity_type.as_str());
                out.push(']');
            }
        }
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// Largest char boundary at or below `idx`.
fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
