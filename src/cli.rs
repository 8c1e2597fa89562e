use clap::Parser;
use std::path::PathBuf;

use claims_loader::{ClaimsFilter, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "claims_loader")]
#[command(about = "Per-doctor diagnosed / operated-on patient counts from a claims SQLite DB", long_about = None)]
pub struct Args {
    /// Path to an existing claims SQLite database.
    pub database_path: PathBuf,

    /// ICD-9 diagnosis code of interest. Repeat or comma-separate.
    #[arg(long = "diagnosis-code", value_delimiter = ',', required = true)]
    pub diagnosis_codes: Vec<String>,

    /// CPT procedure code of interest. Repeat or comma-separate.
    #[arg(long = "procedure-code", value_delimiter = ',', required = true)]
    pub procedure_codes: Vec<String>,

    /// SQL LIKE pattern; encounters with any diagnosis slot matching it are dropped (e.g. '152.%').
    #[arg(long)]
    pub exclude: Option<String>,

    /// JSON schema descriptor overriding table/column names.
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Output format. Defaults to the output file extension, else csv.
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Write to this file instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Drop and rebuild the derived tables even if they already exist.
    #[arg(long)]
    pub rebuild: bool,
}

impl Args {
    pub fn filter(&self) -> ClaimsFilter {
        ClaimsFilter {
            diagnosis_codes: self.diagnosis_codes.clone(),
            procedure_codes: self.procedure_codes.clone(),
            excluded_diagnoses: self.exclude.clone(),
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match (self.format, &self.output) {
            (Some(format), _) => format,
            (None, Some(path)) => OutputFormat::from_path(path),
            (None, None) => OutputFormat::Csv,
        }
    }
}
