//! Data loaders for snapshot CSV files, snapshot lists and stored tables.
//!
//! This module provides parsers for:
//! - Snapshot CSV files (one particle per row, singles and binaries mixed)
//! - Snapshot list files (`path [time]` per line)
//! - Numeric CSV tables written by [`super::writers`], used to resume a run

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use regex::Regex;
use thiserror::Error;

use super::particles::ParticleSet;
use super::series::{SeriesError, SeriesTable};

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Columns every snapshot file must carry.
pub const SNAPSHOT_COLUMNS: [&str; 8] = ["type", "mass", "x", "y", "z", "vx", "vy", "vz"];

/// One snapshot split into its two populations.
///
/// Binaries are already reduced to centre-of-mass records.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Simulation time of the snapshot.
    pub time: f64,
    pub single: ParticleSet,
    pub binary: ParticleSet,
    /// Source file path.
    pub source_path: Option<PathBuf>,
}

impl Snapshot {
    /// Total number of records, singles plus binaries.
    #[inline]
    pub fn len(&self) -> usize {
        self.single.len() + self.binary.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.single.is_empty() && self.binary.is_empty()
    }
}

/// One line of a snapshot list.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Single,
    Binary,
}

fn parse_kind(value: &str) -> Option<Kind> {
    match value.trim().to_lowercase().as_str() {
        "s" | "single" => Some(Kind::Single),
        "b" | "binary" => Some(Kind::Binary),
        _ => None,
    }
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str, line: u64) -> Result<f64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| LoaderError::ParseError(format!("line {}: missing '{}'", line, name)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| LoaderError::ParseError(format!("line {}: invalid {} '{}'", line, name, raw)))
}

/// Load one snapshot CSV file.
///
/// The header must contain [`SNAPSHOT_COLUMNS`] (case-insensitive, any
/// order); a `pot` column is optional. The `type` column is `single`/`s`
/// or `binary`/`b`. Masses must be positive.
///
/// # Arguments
///
/// * `path` - Path to the snapshot file
/// * `time` - Simulation time attached to the snapshot
///
/// # Errors
///
/// Returns an error if the file cannot be read, lacks required columns,
/// contains unparsable values or has no particle rows.
pub fn load_snapshot<P: AsRef<Path>>(path: P, time: f64) -> Result<Snapshot> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    // Get headers and map to lowercase
    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_lowercase(), i))
        .collect();

    let missing: Vec<&str> = SNAPSHOT_COLUMNS
        .iter()
        .copied()
        .filter(|c| !col_map.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        return Err(LoaderError::MissingColumns(missing.join(", ")));
    }
    let idx = |name: &str| col_map[name];
    let pot_idx = col_map.get("pot").copied();

    let mut single = ParticleSet::with_capacity(1024);
    let mut binary = ParticleSet::new();

    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());

        let kind_raw = record.get(idx("type")).unwrap_or_default();
        let kind = parse_kind(kind_raw).ok_or_else(|| {
            LoaderError::ParseError(format!("line {}: unknown particle type '{}'", line, kind_raw))
        })?;

        let mass = parse_field(&record, idx("mass"), "mass", line)?;
        if !(mass > 0.0) {
            return Err(LoaderError::ParseError(format!(
                "line {}: mass must be positive, got {}",
                line, mass
            )));
        }
        let pos = [
            parse_field(&record, idx("x"), "x", line)?,
            parse_field(&record, idx("y"), "y", line)?,
            parse_field(&record, idx("z"), "z", line)?,
        ];
        let vel = [
            parse_field(&record, idx("vx"), "vx", line)?,
            parse_field(&record, idx("vy"), "vy", line)?,
            parse_field(&record, idx("vz"), "vz", line)?,
        ];

        let target = match kind {
            Kind::Single => &mut single,
            Kind::Binary => &mut binary,
        };
        match pot_idx {
            Some(i) => target.push_with_potential(mass, pos, vel, parse_field(&record, i, "pot", line)?),
            None => target.push(mass, pos, vel),
        }
    }

    if single.is_empty() && binary.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    // an empty population still carries the potential column of its file
    if pot_idx.is_some() {
        for set in [&mut single, &mut binary] {
            if set.is_empty() {
                set.pot = Some(Vec::new());
            }
        }
    }

    Ok(Snapshot {
        time,
        single,
        binary,
        source_path: Some(path.to_path_buf()),
    })
}

/// Parse the simulation time from a snapshot file name.
///
/// Snapshot files are named `<prefix>.<time>`, e.g. `data.12.5` is
/// time 12.5. Returns `None` when the name has no numeric suffix.
pub fn time_from_file_name(path: &Path) -> Option<f64> {
    let name = path.file_name()?.to_str()?;
    let pattern = Regex::new(r"^.*?\.([0-9]+(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?)$").ok()?;
    pattern.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Load a snapshot list file.
///
/// Each non-empty line holds a snapshot path, optionally followed by its
/// time. Lines starting with `#` are skipped. Without an explicit time the
/// time is parsed from the file name (see [`time_from_file_name`]).
///
/// # Errors
///
/// Returns an error if the list cannot be read, a time cannot be
/// determined, or the list is empty.
pub fn load_snapshot_list<P: AsRef<Path>>(path: P) -> Result<Vec<SnapshotEntry>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut entries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(file) = parts.next() else {
            continue;
        };
        let file = PathBuf::from(file);

        let time = match parts.next() {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                LoaderError::ParseError(format!("line {}: invalid time '{}'", line_no + 1, raw))
            })?,
            None => time_from_file_name(&file).ok_or_else(|| {
                LoaderError::ParseError(format!(
                    "line {}: no time given and none in file name '{}'",
                    line_no + 1,
                    file.display()
                ))
            })?,
        };

        entries.push(SnapshotEntry { path: file, time });
    }

    if entries.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    Ok(entries)
}

/// Load a numeric CSV table with a header row.
///
/// # Returns
///
/// The column names and the table. A file with only a header yields an
/// empty table.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<(Vec<String>, SeriesTable)> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    let mut table = SeriesTable::new(headers.len());
    let mut row = Vec::with_capacity(headers.len());
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());

        row.clear();
        for (idx, name) in headers.iter().enumerate() {
            row.push(parse_field(&record, idx, name, line)?);
        }
        table.push_row(&row)?;
    }

    Ok((headers, table))
}
