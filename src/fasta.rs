//! Fasta/raw-sequence ingestion (`bio::io::fasta`) and exclusion-mask-file
//! parsing. Conventional I/O plumbing, deliberately kept thin and outside
//! the core.

use std::io::BufRead;
use std::path::Path;

use bio::io::fasta;

/// Reads the single reference record out of a Fasta file, uppercasing it.
/// Rejects anything but exactly one record, since `Reference` models one
/// fixed baseline sequence.
pub fn read_reference(path: impl AsRef<Path>) -> anyhow::Result<String> {
    let reader = fasta::Reader::from_file(path.as_ref())
        .map_err(|e| anyhow::anyhow!("opening reference fasta {:?}: {e}", path.as_ref()))?;
    let mut records = reader.records();
    let record = records
        .next()
        .ok_or_else(|| anyhow::anyhow!("reference fasta {:?} is empty", path.as_ref()))??;
    if records.next().is_some() {
        anyhow::bail!("reference fasta {:?} must contain exactly one record", path.as_ref());
    }
    Ok(String::from_utf8(record.seq().to_ascii_uppercase())?)
}

/// One sample sequence read from a (possibly multi-record) Fasta file.
pub struct SampleRecord {
    pub guid: String,
    pub sequence: String,
}

pub fn read_samples(path: impl AsRef<Path>) -> anyhow::Result<Vec<SampleRecord>> {
    let reader = fasta::Reader::from_file(path.as_ref())
        .map_err(|e| anyhow::anyhow!("opening samples fasta {:?}: {e}", path.as_ref()))?;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        out.push(SampleRecord {
            guid: record.id().to_string(),
            sequence: String::from_utf8(record.seq().to_ascii_uppercase())?,
        });
    }
    Ok(out)
}

/// A mask file is a newline-separated list of zero-indexed positions, or
/// inclusive `start-end` ranges; blank lines and `#`-prefixed comments are
/// skipped.
pub fn read_mask_positions(path: impl AsRef<Path>) -> anyhow::Result<Vec<usize>> {
    let file = std::fs::File::open(path.as_ref())
        .map_err(|e| anyhow::anyhow!("opening mask file {:?}: {e}", path.as_ref()))?;
    let mut positions = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((start, end)) = line.split_once('-') {
            let start: usize = start
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("malformed mask line {line:?}"))?;
            let end: usize = end
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("malformed mask line {line:?}"))?;
            positions.extend(start..=end);
        } else {
            let pos: usize = line.parse().map_err(|_| anyhow::anyhow!("malformed mask line {line:?}"))?;
            positions.push(pos);
        }
    }
    Ok(positions)
}
