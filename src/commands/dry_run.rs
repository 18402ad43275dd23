use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use lopdf::content::Content;
use lopdf::Document;

use crate::commands::is_pdf;
use crate::pdf::spans_from_content;
use crate::policy::Policy;
use crate::processor::{detect_entities, MaskOptions};
use crate::report::{build_ledger, build_pdf_ledger, LedgerReport};

#[derive(Args)]
pub struct DryRunArgs {
    /// Input document to analyze (text or PDF)
    pub input: PathBuf,

    /// Policy JSON file; falls back to DOCMASK_ENTITY_POLICY
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Write the ledger JSON here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Detect entities without masking anything and emit the entity ledger.
/// The ledger JSON goes to stdout (or `--output`); a per-type summary goes
/// to stderr.
pub fn run(args: DryRunArgs) -> Result<()> {
    let policy = match &args.policy {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read policy file {}", path.display()))?;
            Policy::from_json_str(&raw)
        }
        None => MaskOptions::from_environment().policy,
    };

    let report = if is_pdf(&args.input) {
        pdf_ledger(&args.input, &policy)?
    } else {
        let content = fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?;
        let spans = detect_entities(&content, &policy);
        build_ledger(
            &args.input.to_string_lossy(),
            "text",
            &spans,
            &policy,
            content.chars().count(),
        )
    };

    print_summary(&report);

    let rendered =
        serde_json::to_string_pretty(&report).context("failed to serialize ledger")?;
    match &args.output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote ledger to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Run detection over the text of each PDF page.
fn pdf_ledger(input: &Path, policy: &Policy) -> Result<LedgerReport> {
    let bytes =
        fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let doc = Document::load_mem(&bytes)
        .with_context(|| format!("failed to parse {}", input.display()))?;

    let mut pages = Vec::new();
    let mut total_characters = 0usize;
    for (number, page_id) in doc.get_pages() {
        let data = doc
            .get_page_content(page_id)
            .with_context(|| format!("unreadable content on page {number}"))?;
        let content = Content::decode(&data)
            .with_context(|| format!("undecodable content on page {number}"))?;
        let page_text = spans_from_content(&content)
            .into_iter()
            .map(|s| s.text)
            .collect::<Vec<_>>()
            .join("\n");
        total_characters += page_text.chars().count();
        pages.push((number, detect_entities(&page_text, policy)));
    }

    Ok(build_pdf_ledger(
        &input.to_string_lossy(),
        &pages,
        policy,
        total_characters,
    ))
}

fn print_summary(report: &LedgerReport) {
    eprintln!(
        "{} {}",
        style("Entities found:").bold(),
        report.total_entities
    );
    for (entity_type, count) in &report.entities_by_type {
        eprintln!("  {} {}", style(entity_type).dim(), count);
    }
}
