use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use docmask::commands::{self, dry_run::DryRunArgs, mask::MaskArgs};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "docmask",
    version,
    about = "Mask sensitive entities in text and PDF documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mask a document according to the entity policy
    Mask(MaskArgs),
    /// Detect entities and emit the ledger without masking
    DryRun(DryRunArgs),
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            // Bad usage keeps the machine-readable contract: one JSON line,
            // exit code 1.
            let line = json!({
                "status": "error",
                "message": err.to_string(),
                "error": "InvalidArguments",
            });
            println!("{line}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Mask(args) => commands::mask::run(args),
        Command::DryRun(args) => match commands::dry_run::run(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}
