use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use serde_json::json;

use crate::commands::is_pdf;
use crate::pdf;
use crate::processor::{self, MaskOptions};

#[derive(Args)]
pub struct MaskArgs {
    /// Input document; a .pdf extension selects the PDF rewriter
    pub input: PathBuf,

    /// Destination for the masked document
    pub output: PathBuf,
}

/// Mask one document and report the outcome as a single JSON line on
/// stdout. Exit code 0 on success, 1 on any error.
pub fn run(args: MaskArgs) -> ExitCode {
    let opts = MaskOptions::from_environment();

    let result = if is_pdf(&args.input) {
        pdf::process_pdf_file(&args.input, &args.output, &opts)
    } else {
        processor::process_text_file(&args.input, &args.output, &opts)
    };

    match result {
        Ok(summary) => {
            println!("{}", serde_json::to_string(&summary).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(err) => {
            let line = json!({
                "status": "error",
                "message": err.to_string(),
                "error": err.kind(),
            });
            println!("{line}");
            ExitCode::FAILURE
        }
    }
}
