//! PDF rewriting: map entity-bearing text spans back to page rectangles and
//! apply redactions.
//!
//! The content stream of each page is walked to recover shown text with an
//! approximate rectangle per show-text operation. Redacted operations have
//! their string operands blanked (the text leaves the document), then a
//! white rectangle and, when configured, the replacement text are drawn
//! over the same area. The per-span entity check at this layer covers the
//! baseline types only (email, phone, postal code); richer analysis belongs
//! to the text path over extracted text.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context as _, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};

use crate::detectors::rules;
use crate::entity::EntityType;
use crate::policy::{default_template, resolve_pdf_mask_text, Policy};
use crate::processor::{MaskOptions, ProcessError, ProcessSummary};
use crate::pseudonym::Pseudonymizer;
use crate::redaction::mask_alphanumeric;
use crate::security::derive_document_key;

/// Mean glyph advance as a fraction of the font size; lopdf exposes no font
/// metrics, so rectangle widths are estimated.
const MEAN_GLYPH_ADVANCE: f64 = 0.5;

/// Name under which the replacement font is registered on touched pages.
const MASK_FONT_NAME: &str = "FmDM";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// One shown text run with its approximate page rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpan {
    pub text: String,
    pub rect: Rect,
    pub font_size: f64,
    /// Index of the producing operation in the page's content stream.
    pub op_index: usize,
}

/// A planned redaction: blank the rectangle, optionally draw replacement
/// text over it.
#[derive(Debug, Clone, PartialEq)]
pub struct Redaction {
    pub span_index: usize,
    pub rect: Rect,
    pub replacement: Option<String>,
}

/// Decide which page spans to redact and what to draw instead.
///
/// Under `mask_all` every span is masked alphanumerically. Otherwise a span
/// qualifies when its text matches a selected baseline entity pattern; the
/// replacement follows the policy's action for that type, `remove` leaving
/// a blank rectangle. Spans of a type with no configured action fall back
/// to the default pseudonym template when default templates are enabled,
/// else to an alphanumeric mask.
pub fn plan_page_redactions(
    spans: &[PageSpan],
    policy: &Policy,
    pseudonymizer: &mut Option<Pseudonymizer>,
    use_default_templates: bool,
) -> Vec<Redaction> {
    let mut redactions = Vec::new();

    for (span_index, span) in spans.iter().enumerate() {
        if span.text.trim().is_empty() {
            continue;
        }

        if policy.mask_all {
            redactions.push(Redaction {
                span_index,
                rect: span.rect,
                replacement: Some(mask_alphanumeric(&span.text)),
            });
            continue;
        }

        let Some(entity_type) = baseline_entity_match(&span.text, &policy.entities) else {
            continue;
        };

        let replacement = if policy.actions.contains_key(&entity_type) {
            // `remove` and a missing pseudonymizer both resolve to a blank
            // rectangle.
            resolve_pdf_mask_text(policy, pseudonymizer.as_mut(), entity_type, &span.text)
        } else if use_default_templates {
            match pseudonymizer.as_mut() {
                Some(p) => Some(p.pseudonymize(
                    &span.text,
                    entity_type.as_str(),
                    &default_template(entity_type),
                )),
                None => Some(mask_alphanumeric(&span.text)),
            }
        } else {
            Some(mask_alphanumeric(&span.text))
        };

        redactions.push(Redaction {
            span_index,
            rect: span.rect,
            replacement,
        });
    }
    redactions
}

/// First selected baseline type whose pattern matches the span text.
fn baseline_entity_match(text: &str, selected: &BTreeSet<EntityType>) -> Option<EntityType> {
    let pats = rules::patterns()?;
    if selected.contains(&EntityType::Email) && pats.email.is_match(text) {
        return Some(EntityType::Email);
    }
    if selected.contains(&EntityType::Phone) && pats.phone.is_match(text) {
        return Some(EntityType::Phone);
    }
    if selected.contains(&EntityType::PostalCode) && pats.us_zip.is_match(text) {
        return Some(EntityType::PostalCode);
    }
    None
}

/// Walk a page content stream and recover shown text runs with their
/// positions. Tracks BT/ET, Tf, Td/TD/Tm/T*/TL and the four show-text
/// operators; the text matrix origin provides the baseline, widths are
/// estimated from the font size.
pub(crate) fn spans_from_content(content: &Content) -> Vec<PageSpan> {
    let mut spans = Vec::new();

    let mut font_size = 11.0f64;
    let mut leading = 0.0f64;
    let mut line_x = 0.0f64;
    let mut line_y = 0.0f64;
    let mut cur_x = 0.0f64;
    let mut cur_y = 0.0f64;

    let mut emit = |text: String,
                    op_index: usize,
                    font_size: f64,
                    cur_x: &mut f64,
                    cur_y: f64,
                    spans: &mut Vec<PageSpan>| {
        if text.is_empty() {
            return;
        }
        let width = text.chars().count() as f64 * font_size * MEAN_GLYPH_ADVANCE;
        let rect = Rect {
            x0: *cur_x,
            y0: cur_y - 0.2 * font_size,
            x1: *cur_x + width,
            y1: cur_y + 0.8 * font_size,
        };
        spans.push(PageSpan {
            text,
            rect,
            font_size,
            op_index,
        });
        *cur_x += width;
    };

    for (index, op) in content.operations.iter().enumerate() {
        match op.operator.as_str() {
            "BT" => {
                line_x = 0.0;
                line_y = 0.0;
                cur_x = 0.0;
                cur_y = 0.0;
            }
            "Tf" => {
                if let Some(size) = op.operands.get(1).and_then(number) {
                    font_size = size;
                }
            }
            "TL" => {
                if let Some(l) = op.operands.first().and_then(number) {
                    leading = l;
                }
            }
            "Td" | "TD" => {
                let tx = op.operands.first().and_then(number).unwrap_or(0.0);
                let ty = op.operands.get(1).and_then(number).unwrap_or(0.0);
                if op.operator == "TD" {
                    leading = -ty;
                }
                line_x += tx;
                line_y += ty;
                cur_x = line_x;
                cur_y = line_y;
            }
            "Tm" => {
                line_x = op.operands.get(4).and_then(number).unwrap_or(0.0);
                line_y = op.operands.get(5).and_then(number).unwrap_or(0.0);
                cur_x = line_x;
                cur_y = line_y;
            }
            "T*" => {
                line_y -= leading;
                cur_x = line_x;
                cur_y = line_y;
            }
            "Tj" => {
                if let Some(text) = op.operands.first().and_then(string_bytes) {
                    emit(decode_text_bytes(text), index, font_size, &mut cur_x, cur_y, &mut spans);
                }
            }
            "'" => {
                line_y -= leading;
                cur_x = line_x;
                cur_y = line_y;
                if let Some(text) = op.operands.first().and_then(string_bytes) {
                    emit(decode_text_bytes(text), index, font_size, &mut cur_x, cur_y, &mut spans);
                }
            }
            "\"" => {
                line_y -= leading;
                cur_x = line_x;
                cur_y = line_y;
                if let Some(text) = op.operands.get(2).and_then(string_bytes) {
                    emit(decode_text_bytes(text), index, font_size, &mut cur_x, cur_y, &mut spans);
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = op.operands.first() {
                    let mut text = String::new();
                    for part in parts {
                        if let Some(bytes) = string_bytes(part) {
                            text.push_str(&decode_text_bytes(bytes));
                        }
                    }
                    emit(text, index, font_size, &mut cur_x, cur_y, &mut spans);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Blank the string operands of every redacted show-text operation, then
/// append the white fill and replacement-text overlays. One rewrite per
/// page, so redactions apply atomically.
pub(crate) fn apply_redactions_to_content(
    mut content: Content,
    spans: &[PageSpan],
    redactions: &[Redaction],
) -> Content {
    let blanked: BTreeSet<usize> = redactions
        .iter()
        .filter_map(|r| spans.get(r.span_index).map(|s| s.op_index))
        .collect();

    for index in &blanked {
        if let Some(op) = content.operations.get_mut(*index) {
            blank_show_text(op);
        }
    }

    for redaction in redactions {
        let rect = redaction.rect;
        content.operations.extend([
            Operation::new("q", vec![]),
            Operation::new("rg", vec![real(1.0), real(1.0), real(1.0)]),
            Operation::new(
                "re",
                vec![real(rect.x0), real(rect.y0), real(rect.width()), real(rect.height())],
            ),
            Operation::new("f", vec![]),
            Operation::new("Q", vec![]),
        ]);

        if let Some(replacement) = &redaction.replacement {
            let font_size = spans
                .get(redaction.span_index)
                .map(|s| s.font_size)
                .unwrap_or(11.0);
            let baseline = rect.y0 + 0.2 * font_size;
            content.operations.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![Object::Name(MASK_FONT_NAME.as_bytes().to_vec()), real(font_size)],
                ),
                Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]),
                Operation::new("Td", vec![real(rect.x0), real(baseline)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        replacement.clone().into_bytes(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ]);
        }
    }
    content
}

fn blank_show_text(op: &mut Operation) {
    let empty = Object::String(Vec::new(), StringFormat::Literal);
    match op.operator.as_str() {
        "Tj" | "'" => op.operands = vec![empty],
        "\"" => {
            if let Some(slot) = op.operands.get_mut(2) {
                *slot = empty;
            }
        }
        "TJ" => op.operands = vec![Object::Array(vec![empty])],
        _ => {}
    }
}

/// Process one PDF end to end: extract spans per page, plan and apply
/// redactions, clear document metadata, save pruned and compressed.
pub fn process_pdf_file(
    input: &Path,
    output: &Path,
    opts: &MaskOptions,
) -> Result<ProcessSummary, ProcessError> {
    if !input.exists() {
        return Err(ProcessError::InputMissing(input.to_path_buf()));
    }

    let bytes = std::fs::read(input).map_err(ProcessError::from_io)?;
    let mut doc = Document::load_mem(&bytes)
        .map_err(|e| ProcessError::Pdf(format!("failed to load {}: {e}", input.display())))?;

    let mut pseudonymizer = opts.build_pseudonymizer(|| {
        derive_document_key(&input.to_string_lossy(), Some(&bytes)).to_vec()
    });

    let mut total_characters = 0usize;
    let mut touched_pages = Vec::new();

    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in pages {
        let data = doc
            .get_page_content(page_id)
            .map_err(|e| ProcessError::Pdf(format!("unreadable page content: {e}")))?;
        let content = Content::decode(&data)
            .map_err(|e| ProcessError::Pdf(format!("undecodable page content: {e}")))?;

        let spans = spans_from_content(&content);
        total_characters += spans.iter().map(|s| s.text.chars().count()).sum::<usize>();

        let redactions = plan_page_redactions(
            &spans,
            &opts.policy,
            &mut pseudonymizer,
            opts.use_default_templates,
        );
        if redactions.is_empty() {
            continue;
        }

        let needs_font = redactions.iter().any(|r| r.replacement.is_some());
        let rewritten = apply_redactions_to_content(content, &spans, &redactions);
        let encoded = rewritten
            .encode()
            .map_err(|e| ProcessError::Pdf(format!("failed to encode page content: {e}")))?;
        doc.change_page_content(page_id, encoded)
            .map_err(|e| ProcessError::Pdf(format!("failed to rewrite page: {e}")))?;
        if needs_font {
            touched_pages.push(page_id);
        }
    }

    for page_id in touched_pages {
        add_mask_font(&mut doc, page_id)
            .map_err(|e| ProcessError::Pdf(format!("failed to register font: {e}")))?;
    }

    clear_document_metadata(&mut doc);

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(ProcessError::from_io)?;
        }
    }

    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    doc.save(output)
        .map_err(|e| ProcessError::Pdf(format!("failed to save {}: {e}", output.display())))?;

    Ok(ProcessSummary::success(
        input,
        output,
        total_characters,
        "PDF processed successfully!",
    ))
}

/// Register the Helvetica replacement font on a page, following references
/// and materializing inherited resources when needed.
fn add_mask_font(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let resources_id = ensure_page_resources(doc, page_id)?;

    let referenced_fonts = {
        let resources = doc
            .get_object(resources_id)
            .and_then(Object::as_dict)
            .context("resources is not a dictionary")?;
        match resources.get(b"Font") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    };

    if let Some(fonts_id) = referenced_fonts {
        let fonts = doc
            .get_object_mut(fonts_id)
            .and_then(Object::as_dict_mut)
            .context("font resource is not a dictionary")?;
        fonts.set(MASK_FONT_NAME, Object::Reference(font_id));
    } else {
        let resources = doc
            .get_object_mut(resources_id)
            .and_then(Object::as_dict_mut)
            .context("resources is not a dictionary")?;
        if !matches!(resources.get(b"Font"), Ok(Object::Dictionary(_))) {
            resources.set("Font", Dictionary::new());
        }
        let fonts = resources
            .get_mut(b"Font")
            .and_then(Object::as_dict_mut)
            .context("font entry is not a dictionary")?;
        fonts.set(MASK_FONT_NAME, Object::Reference(font_id));
    }
    Ok(())
}

/// Object id of the page's resources dictionary. Inline dictionaries are
/// moved into their own object; inherited ones are copied down so the edit
/// stays page-local.
fn ensure_page_resources(doc: &mut Document, page_id: ObjectId) -> Result<ObjectId> {
    enum Slot {
        Ref(ObjectId),
        Inline,
        Missing(Option<ObjectId>),
    }

    let slot = {
        let page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .context("page is not a dictionary")?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => Slot::Ref(*id),
            Ok(Object::Dictionary(_)) => Slot::Inline,
            _ => Slot::Missing(doc.get_page_resources(page_id).1.first().copied()),
        }
    };

    match slot {
        Slot::Ref(id) => Ok(id),
        Slot::Inline => {
            let inline = {
                let page = doc
                    .get_object_mut(page_id)
                    .and_then(Object::as_dict_mut)
                    .context("page is not a dictionary")?;
                page.remove(b"Resources")
                    .unwrap_or_else(|| Object::Dictionary(Dictionary::new()))
            };
            let resources_id = doc.add_object(inline);
            set_page_resources_ref(doc, page_id, resources_id)?;
            Ok(resources_id)
        }
        Slot::Missing(inherited) => {
            let base = inherited
                .and_then(|id| doc.get_object(id).ok())
                .and_then(|o| o.as_dict().ok())
                .cloned()
                .unwrap_or_else(Dictionary::new);
            let resources_id = doc.add_object(Object::Dictionary(base));
            set_page_resources_ref(doc, page_id, resources_id)?;
            Ok(resources_id)
        }
    }
}

fn set_page_resources_ref(doc: &mut Document, page_id: ObjectId, resources_id: ObjectId) -> Result<()> {
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .context("page is not a dictionary")?;
    page.set("Resources", Object::Reference(resources_id));
    Ok(())
}

/// Drop the Info dictionary and the catalog's XMP metadata stream before
/// save, so author/title/producer never survive into the output.
pub(crate) fn clear_document_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .ok();
    if let Some(root_id) = root_id {
        if let Ok(catalog) = doc.get_object_mut(root_id).and_then(Object::as_dict_mut) {
            catalog.remove(b"Metadata");
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

fn string_bytes(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::String(bytes, _) => Some(bytes),
        _ => None,
    }
}

/// Content-stream strings carry single-byte encodings in the documents this
/// path handles; map bytes directly to code points.
fn decode_text_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudonym::HashAlgo;
    use serde_json::json;

    fn show_text_content(lines: &[&str]) -> Content {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
            Operation::new("TL", vec![Object::Integer(14)]),
            Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
        ];
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                operations.push(Operation::new("T*", vec![]));
            }
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(line.as_bytes().to_vec(), StringFormat::Literal)],
            ));
        }
        operations.push(Operation::new("ET", vec![]));
        Content { operations }
    }

    #[test]
    fn test_spans_from_content_positions() {
        let content = show_text_content(&["Contact: alice@example.com", "second line"]);
        let spans = spans_from_content(&content);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Contact: alice@example.com");
        assert_eq!(spans[0].rect.x0, 72.0);
        assert_eq!(spans[0].font_size, 12.0);
        // T* moved the second line down by the leading.
        assert!(spans[1].rect.y1 < spans[0].rect.y1);
        assert!(spans[0].rect.width() > 0.0);
    }

    #[test]
    fn test_spans_from_tj_array() {
        let parts = vec![
            Object::String(b"al".to_vec(), StringFormat::Literal),
            Object::Integer(-120),
            Object::String(b"ice".to_vec(), StringFormat::Literal),
        ];
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Td", vec![Object::Integer(10), Object::Integer(20)]),
                Operation::new("TJ", vec![Object::Array(parts)]),
                Operation::new("ET", vec![]),
            ],
        };
        let spans = spans_from_content(&content);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "alice");
    }

    #[test]
    fn test_plan_mask_all_masks_every_span() {
        let content = show_text_content(&["your name: abc"]);
        let spans = spans_from_content(&content);
        let policy = Policy::normalize(&json!({"mask_all": true}));
        let mut pseudo = None;
        let redactions = plan_page_redactions(&spans, &policy, &mut pseudo, false);
        assert_eq!(redactions.len(), 1);
        assert_eq!(redactions[0].replacement.as_deref(), Some("xxxx xxxx: xxx"));
    }

    #[test]
    fn test_plan_selects_baseline_entities_only() {
        let content = show_text_content(&[
            "Contact: alice@example.com",
            "no entities here",
            "ZIP 94103",
        ]);
        let spans = spans_from_content(&content);
        let policy = Policy::normalize(&json!({"entities": ["email"]}));
        let mut pseudo = None;
        let redactions = plan_page_redactions(&spans, &policy, &mut pseudo, false);
        // Only the e-mail line qualifies: ZIP is not selected.
        assert_eq!(redactions.len(), 1);
        assert_eq!(redactions[0].span_index, 0);
        // Without actions or default templates the span text is masked.
        assert_eq!(
            redactions[0].replacement.as_deref(),
            Some("xxxxxxx: xxxxx@xxxxxxx.xxx")
        );
    }

    #[test]
    fn test_plan_remove_action_leaves_blank_rectangle() {
        let content = show_text_content(&["Contact: alice@example.com"]);
        let spans = spans_from_content(&content);
        let policy = Policy::normalize(&json!({
            "entities": ["email"],
            "actions": {"email": {"action": "remove"}},
        }));
        let mut pseudo = Some(Pseudonymizer::new(b"e".to_vec(), b"d".to_vec(), HashAlgo::Sha256));
        let redactions = plan_page_redactions(&spans, &policy, &mut pseudo, false);
        assert_eq!(redactions.len(), 1);
        assert!(redactions[0].replacement.is_none());
    }

    #[test]
    fn test_plan_default_templates_pseudonymize() {
        let content = show_text_content(&["alice@example.com"]);
        let spans = spans_from_content(&content);
        let policy = Policy::normalize(&json!({"entities": ["email"]}));
        let mut pseudo = Some(Pseudonymizer::new(b"e".to_vec(), b"d".to_vec(), HashAlgo::Sha256));
        let redactions = plan_page_redactions(&spans, &policy, &mut pseudo, true);
        assert_eq!(redactions.len(), 1);
        let replacement = redactions[0].replacement.as_deref().unwrap();
        assert!(replacement.ends_with("@mask.local"));
        assert!(!replacement.contains("alice@example.com"));
    }

    #[test]
    fn test_apply_blanks_text_and_draws_overlay() {
        let content = show_text_content(&["Contact: alice@example.com"]);
        let spans = spans_from_content(&content);
        let redactions = vec![Redaction {
            span_index: 0,
            rect: spans[0].rect,
            replacement: Some("EMAIL_x@mask.local".to_string()),
        }];
        let rewritten = apply_redactions_to_content(content, &spans, &redactions);

        // The original Tj operand is now empty.
        let tj = rewritten
            .operations
            .iter()
            .find(|op| op.operator == "Tj")
            .unwrap();
        assert_eq!(tj.operands, vec![Object::String(Vec::new(), StringFormat::Literal)]);

        // A white rectangle and the replacement text were appended.
        assert!(rewritten.operations.iter().any(|op| op.operator == "re"));
        let shown: Vec<&Operation> = rewritten
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .collect();
        assert_eq!(shown.len(), 2);
        assert_eq!(
            shown[1].operands,
            vec![Object::String(b"EMAIL_x@mask.local".to_vec(), StringFormat::Literal)]
        );
    }

    #[test]
    fn test_apply_without_replacement_only_fills() {
        let content = show_text_content(&["secret"]);
        let spans = spans_from_content(&content);
        let redactions = vec![Redaction {
            span_index: 0,
            rect: spans[0].rect,
            replacement: None,
        }];
        let rewritten = apply_redactions_to_content(content, &spans, &redactions);
        assert!(rewritten.operations.iter().any(|op| op.operator == "re"));
        // No second BT block was appended.
        let bt_count = rewritten.operations.iter().filter(|op| op.operator == "BT").count();
        assert_eq!(bt_count, 1);
    }

    #[test]
    fn test_clear_document_metadata() {
        let mut doc = Document::with_version("1.5");
        let info_id = doc.add_object(dictionary! {
            "Author" => Object::string_literal("Alice"),
            "Title" => Object::string_literal("Secret"),
        });
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog" });
        doc.trailer.set("Info", Object::Reference(info_id));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        clear_document_metadata(&mut doc);
        assert!(doc.trailer.get(b"Info").is_err());
    }
}
