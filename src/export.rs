use anyhow::{Context, Result};
use csv::Writer;
use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use crate::aggregate::DoctorTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

impl OutputFormat {
    /// `.json` selects JSON; anything else is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|x| x.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Csv,
        }
    }
}

pub fn write_table<W: Write>(table: &DoctorTable, format: OutputFormat, out: W) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(table, out),
        OutputFormat::Json => write_json(table, out),
    }
}

fn write_csv<W: Write>(table: &DoctorTable, out: W) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer
        .write_record(["doctor_id", "num_diagnosed", "num_operated_on"])
        .context("Failed writing doctor table CSV header")?;
    for row in table.rows() {
        writer
            .write_record([
                row.doctor_id,
                row.num_diagnosed.to_string(),
                row.num_operated_on.to_string(),
            ])
            .context("Failed writing doctor table row")?;
    }
    writer
        .flush()
        .context("Failed flushing doctor table CSV writer")?;
    Ok(())
}

fn write_json<W: Write>(table: &DoctorTable, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, &table.rows())
        .context("Failed serializing doctor table JSON")?;
    writeln!(out).context("Failed writing doctor table JSON")?;
    out.flush().context("Failed flushing doctor table JSON")?;
    Ok(())
}

/// Write through a `.tmp` sibling, then rename over `output_path`.
pub fn write_table_to_path(
    table: &DoctorTable,
    format: OutputFormat,
    output_path: &Path,
) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating output directory {}", parent.display()))?;
    }

    write_via_temp(output_path, |out| write_table(table, format, out))
}

/// Run `write` against a `.tmp` sibling of `output_path`, then rename it into
/// place. The temp file is removed if writing or renaming fails.
fn write_via_temp<F>(output_path: &Path, write: F) -> Result<()>
where
    F: FnOnce(BufWriter<fs::File>) -> Result<()>,
{
    let file_name = output_path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("doctor_counts");
    let tmp_path = output_path.with_file_name(format!("{file_name}.tmp"));

    let file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed creating temp output {}", tmp_path.display()))?;

    let written = write(BufWriter::new(file)).and_then(|()| {
        fs::rename(&tmp_path, output_path).with_context(|| {
            format!(
                "Failed moving temp output {} to {}",
                tmp_path.display(),
                output_path.display()
            )
        })
    });

    if written.is_err() {
        if let Err(err) = fs::remove_file(&tmp_path) {
            tracing::warn!("Failed removing temp output {}: {err}", tmp_path.display());
        }
    }
    written
}
