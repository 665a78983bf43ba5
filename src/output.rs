use std::collections::BTreeMap;
use std::io::{self, Write};

use clap::ValueEnum;

use crate::domain::ResolutionResult;
use crate::scheduler::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Tsv,
}

pub fn write_resolution<W: Write>(
    out: &mut W,
    resolution: &Resolution,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => write_json(out, resolution),
        OutputFormat::Tsv => write_tsv(out, resolution),
    }
}

/// Pretty JSON object keyed by input accession.
pub fn write_json<W: Write>(out: &mut W, resolution: &Resolution) -> io::Result<()> {
    let by_input: BTreeMap<&str, &ResolutionResult> = resolution
        .entries
        .iter()
        .map(|entry| (entry.input.as_str(), &entry.result))
        .collect();
    let json = serde_json::to_string_pretty(&by_input).map_err(io::Error::other)?;
    out.write_all(json.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

/// One row per input in input order, duplicates included.
pub fn write_tsv<W: Write>(out: &mut W, resolution: &Resolution) -> io::Result<()> {
    writeln!(out, "accession\tbioproject_id\tgeo_id")?;
    for entry in &resolution.entries {
        writeln!(
            out,
            "{}\t{}\t{}",
            entry.input,
            entry.result.bioproject(),
            entry.result.geo()
        )?;
    }
    Ok(())
}
