mod cli;

use anyhow::Context;
use clap::Parser;

use claims_loader::{ClaimsSchema, export, with_loader};

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    run(&args).context("claims_loader failed")
}

fn run(args: &cli::Args) -> anyhow::Result<()> {
    let schema = match &args.schema {
        Some(path) => ClaimsSchema::from_json_file(path)?,
        None => ClaimsSchema::default(),
    };

    let table = with_loader(&args.database_path, args.filter(), schema, |loader| {
        if args.rebuild {
            tracing::info!("rebuild=true (dropping derived tables first)");
            loader.drop_derived_tables()?;
        }
        loader.doctor_diagnosis_procedure_data()
    })?;

    let format = args.output_format();
    match &args.output {
        Some(path) => {
            export::write_table_to_path(&table, format, path)?;
            tracing::info!("Wrote {} doctors to {}", table.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            export::write_table(&table, format, stdout.lock())?;
        }
    }
    Ok(())
}
