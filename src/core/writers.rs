//! CSV writers for the Lagrangian and core time series.
//!
//! Values are written with Rust's shortest round-trip float formatting, so a
//! table read back with [`super::loaders::load_table`] is bit-identical.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use super::series::SeriesTable;
use crate::processors::center::{CenterError, CoreHistory};
use crate::processors::lagrangian::{LagrangianError, LagrangianMultiple};

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Header count does not match the table width.
    #[error("header has {headers} names, table has {columns} columns")]
    HeaderMismatch { headers: usize, columns: usize },

    /// Series could not be flattened.
    #[error(transparent)]
    Lagrangian(#[from] LagrangianError),

    /// Core history could not be flattened.
    #[error(transparent)]
    Center(#[from] CenterError),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Write a numeric table to CSV with one header row.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `headers` - Column names, one per table column
/// * `table` - Rows to write
///
/// # Errors
///
/// Returns an error if:
/// - `headers` and the table width differ
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_table_csv<S: AsRef<str>>(path: &Path, headers: &[S], table: &SeriesTable) -> Result<()> {
    if headers.len() != table.ncols() {
        return Err(WriteError::HeaderMismatch {
            headers: headers.len(),
            columns: table.ncols(),
        });
    }

    ensure_parent_dirs(path)?;

    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut csv_writer = csv::Writer::from_writer(BufWriter::new(file));

    let path_str = path.display().to_string();

    csv_writer
        .write_record(headers.iter().map(|h| h.as_ref()))
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for row in table.rows() {
        csv_writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write the single, binary and combined Lagrangian series as one table.
///
/// Column layout follows [`LagrangianMultiple::column_names`].
pub fn write_lagrangian_csv(path: &Path, lagr: &LagrangianMultiple) -> Result<()> {
    let table = lagr.to_table()?;
    write_table_csv(path, &lagr.column_names(), &table)
}

/// Write the centre and core radius history.
pub fn write_core_csv(path: &Path, history: &CoreHistory) -> Result<()> {
    let table = history.to_table()?;
    write_table_csv(path, &CoreHistory::COLUMNS, &table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AverageMode, MassFractions};
    use crate::core::loaders::load_table;
    use crate::core::particles::{Center, ParticleSet};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_table_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let mut table = SeriesTable::new(2);
        table.push_row(&[0.1, 1e-20]).unwrap();
        table.push_row(&[2.0, -3.5]).unwrap();

        write_table_csv(&path, &["a", "b"], &table).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "a,b");
        assert_eq!(lines.len(), 3); // header + 2 data rows
        assert_eq!(lines[2], "2,-3.5");

        let (headers, restored) = load_table(&path).unwrap();
        assert_eq!(headers, vec!["a", "b"]);
        assert_eq!(restored, table);
    }

    #[test]
    fn test_write_table_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir").join("nested").join("t.csv");

        write_table_csv(&path, &["x"], &SeriesTable::new(1)).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_write_table_header_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");

        let result = write_table_csv(&path, &["a"], &SeriesTable::new(2));

        match result.unwrap_err() {
            WriteError::HeaderMismatch { headers, columns } => {
                assert_eq!(headers, 1);
                assert_eq!(columns, 2);
            }
            _ => panic!("Expected HeaderMismatch error"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_write_core_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.core.csv");
        let mut history = CoreHistory::new();
        let center = Center {
            pos: [0.5, 0.0, -0.5],
            vel: [0.0, 0.1, 0.0],
        };
        history.push(0.0, &center, 0.25);
        history.push(1.0, &center, 0.3);

        write_core_csv(&path, &history).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "time,pos.x,pos.y,pos.z,vel.x,vel.y,vel.z,rc");
        assert_eq!(lines[1], "0,0.5,0,-0.5,0,0.1,0,0.25");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_write_lagrangian_csv_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.lagr.csv");

        let mf = MassFractions::new(vec![0.5]).unwrap();
        let mut lagr = LagrangianMultiple::new(mf.clone());
        let mut single = ParticleSet::new();
        for r in 1..=6 {
            single.push(1.0, [r as f64 * 0.3, 0.0, 0.1], [0.0, 0.7, 0.0]);
        }
        let mut binary = ParticleSet::new();
        binary.push(2.0, [0.0, 0.4, 0.0], [0.2, 0.0, 0.0]);
        binary.push(2.0, [0.0, -0.9, 0.0], [-0.2, 0.0, 0.0]);
        lagr.calc_one_snapshot(3.0, &single, &binary, 0.5, AverageMode::Shell)
            .unwrap();

        write_lagrangian_csv(&path, &lagr).unwrap();

        let (headers, table) = load_table(&path).unwrap();
        assert_eq!(headers[0], "time");
        assert_eq!(headers[1], "single.r[0.5]");
        let restored = LagrangianMultiple::from_table(&mf, &headers, &table).unwrap();
        assert_eq!(restored, lagr);
    }
}
