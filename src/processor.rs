//! Document orchestration: environment configuration, the text pipeline,
//! and the machine-readable result contract.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::aggregator::{filter_by_policy, merge_overlaps};
use crate::entity::Span;
use crate::policy::{replacement_for, Policy};
use crate::pseudonym::{HashAlgo, Pseudonymizer, DOC_KEY_VAR, ENV_KEY_VAR};
use crate::redaction::{mask_alphanumeric, mask_text_spans};
use crate::registry::build_default_registry;
use crate::security::derive_document_key;

pub const POLICY_VAR: &str = "DOCMASK_ENTITY_POLICY";
pub const DEFAULT_TEMPLATES_VAR: &str = "DOCMASK_USE_DEFAULT_TEMPLATES";

/// Failure classes surfaced on the CLI's JSON error line.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("input file does not exist: {}", .0.display())]
    InputMissing(PathBuf),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("unable to decode file as UTF-8: {0}")]
    Decode(String),
    #[error("{0}")]
    Pdf(String),
    #[error("unexpected error: {0}")]
    Internal(String),
}

impl ProcessError {
    /// Wire-level error class name.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::InputMissing(_) => "FileNotFoundError",
            ProcessError::Permission(_) => "PermissionError",
            ProcessError::Decode(_) => "UnicodeDecodeError",
            ProcessError::Pdf(_) => "PdfError",
            ProcessError::Internal(_) => "InternalError",
        }
    }

    pub(crate) fn from_io(err: io::Error) -> ProcessError {
        match err.kind() {
            io::ErrorKind::PermissionDenied => ProcessError::Permission(err.to_string()),
            _ => ProcessError::Internal(err.to_string()),
        }
    }
}

/// Success payload of one processing run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub status: &'static str,
    pub message: String,
    pub output: String,
    pub input_file: String,
    pub characters_processed: usize,
}

impl ProcessSummary {
    pub(crate) fn success(
        input: &Path,
        output: &Path,
        characters_processed: usize,
        message: &str,
    ) -> Self {
        Self {
            status: "success",
            message: message.to_string(),
            output: output.to_string_lossy().into_owned(),
            input_file: input.to_string_lossy().into_owned(),
            characters_processed,
        }
    }
}

/// Per-run configuration, read once from the environment by the command
/// layer; the library never touches `std::env` past this point.
#[derive(Debug, Clone, Default)]
pub struct MaskOptions {
    pub policy: Policy,
    pub env_key: Vec<u8>,
    /// Explicit document key; derived from path and content when absent.
    pub doc_key: Option<Vec<u8>>,
    pub use_default_templates: bool,
}

impl MaskOptions {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Read `DOCMASK_ENTITY_POLICY`, `DOCMASK_USE_DEFAULT_TEMPLATES`,
    /// `DOC_MASKING_ENV_KEY` and `DOC_MASKING_DOC_KEY`. An unparseable
    /// policy value degrades to the empty policy.
    pub fn from_environment() -> Self {
        let policy = env::var(POLICY_VAR)
            .map(|raw| Policy::from_json_str(&raw))
            .unwrap_or_default();
        let use_default_templates = env::var(DEFAULT_TEMPLATES_VAR)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let env_key = env::var(ENV_KEY_VAR)
            .map(String::into_bytes)
            .unwrap_or_default();
        let doc_key = env::var(DOC_KEY_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(String::into_bytes);
        Self {
            policy,
            env_key,
            doc_key,
            use_default_templates,
        }
    }

    /// The pseudonym path is taken when the policy carries actions or
    /// default templates are enabled; otherwise spans get plain masking.
    pub fn wants_pseudonyms(&self) -> bool {
        !self.policy.actions.is_empty() || self.use_default_templates
    }

    /// Build the per-document pseudonymizer; `derive_key` supplies the
    /// document key when none was set externally.
    pub(crate) fn build_pseudonymizer(
        &self,
        derive_key: impl FnOnce() -> Vec<u8>,
    ) -> Option<Pseudonymizer> {
        if !self.wants_pseudonyms() {
            return None;
        }
        let doc_key = self.doc_key.clone().unwrap_or_else(derive_key);
        Some(Pseudonymizer::new(
            self.env_key.clone(),
            doc_key,
            HashAlgo::Sha256,
        ))
    }
}

/// Masked output plus the spans that were rewritten.
#[derive(Debug)]
pub struct MaskedText {
    pub output: String,
    pub spans: Vec<Span>,
}

/// Run the detection pipeline for `policy` without rewriting anything.
pub fn detect_entities(content: &str, policy: &Policy) -> Vec<Span> {
    let registry = build_default_registry(None);
    let raw = registry.run_selected(content, &policy.entities);
    filter_by_policy(merge_overlaps(raw), policy)
}

/// The core text pipeline: detect, aggregate, filter, rewrite.
pub fn mask_text(
    content: &str,
    opts: &MaskOptions,
    pseudonymizer: &mut Option<Pseudonymizer>,
) -> MaskedText {
    if opts.policy.mask_all {
        return MaskedText {
            output: mask_alphanumeric(content),
            spans: Vec::new(),
        };
    }

    let spans = detect_entities(content, &opts.policy);
    let preserve_length = opts
        .policy
        .preserve_length
        .unwrap_or(opts.policy.actions.is_empty());

    let output = match pseudonymizer {
        Some(p) => {
            let mut replace = |span: &Span, original: &str| -> anyhow::Result<String> {
                Ok(replacement_for(&opts.policy, span.entity_type, original, p))
            };
            mask_text_spans(content, &spans, preserve_length, Some(&mut replace))
        }
        None => mask_text_spans(content, &spans, preserve_length, None),
    };

    MaskedText { output, spans }
}

/// Process one UTF-8 text file end to end.
pub fn process_text_file(
    input: &Path,
    output: &Path,
    opts: &MaskOptions,
) -> Result<ProcessSummary, ProcessError> {
    if !input.exists() {
        return Err(ProcessError::InputMissing(input.to_path_buf()));
    }
    let bytes = fs::read(input).map_err(ProcessError::from_io)?;
    let content =
        String::from_utf8(bytes).map_err(|e| ProcessError::Decode(e.to_string()))?;

    let mut pseudonymizer = opts.build_pseudonymizer(|| {
        derive_document_key(&input.to_string_lossy(), Some(content.as_bytes())).to_vec()
    });
    let masked = mask_text(&content, opts, &mut pseudonymizer);

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ProcessError::from_io)?;
        }
    }
    fs::write(output, &masked.output).map_err(ProcessError::from_io)?;

    Ok(ProcessSummary::success(
        input,
        output,
        masked.output.chars().count(),
        "File processed successfully!",
    ))
}
