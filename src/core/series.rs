//! Append-only numeric tables for per-snapshot time series.

use thiserror::Error;

/// Errors raised when a row does not fit a table.
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("row has {found} values, table expects {expected}")]
    RowWidth { expected: usize, found: usize },
}

/// Row-major table with a fixed column count.
///
/// Rows are only ever appended. Storage grows through `Vec` amortized
/// doubling, so appending one row per snapshot does not copy the table.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTable {
    ncols: usize,
    data: Vec<f64>,
}

impl SeriesTable {
    /// Creates an empty table with `ncols` columns.
    pub fn new(ncols: usize) -> Self {
        Self {
            ncols,
            data: Vec::new(),
        }
    }

    /// Creates an empty table with room for `rows` rows.
    pub fn with_capacity(ncols: usize, rows: usize) -> Self {
        Self {
            ncols,
            data: Vec::with_capacity(ncols * rows),
        }
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        if self.ncols == 0 {
            0
        } else {
            self.data.len() / self.ncols
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reserve room for `additional` more rows.
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional * self.ncols);
    }

    /// Append one row.
    pub fn push_row(&mut self, row: &[f64]) -> Result<(), SeriesError> {
        if row.len() != self.ncols {
            return Err(SeriesError::RowWidth {
                expected: self.ncols,
                found: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Row `index`, or `None` past the end.
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.ncols)?;
        self.data.get(start..start + self.ncols)
    }

    /// Iterate over rows in append order.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.ncols.max(1))
    }

    /// Copy of column `col` across all rows.
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows().map(|row| row[col]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_rows() {
        let mut table = SeriesTable::with_capacity(3, 2);
        assert!(table.is_empty());
        table.push_row(&[1.0, 2.0, 3.0]).unwrap();
        table.push_row(&[0.0, 0.0, 0.0]).unwrap();
        table.push_row(&[4.0, 5.0, 6.0]).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.row(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(table.row(1), Some(&[0.0, 0.0, 0.0][..]));
        assert_eq!(table.row(2), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(table.row(3), None);
        assert_eq!(table.column(1), vec![2.0, 0.0, 5.0]);
        assert_eq!(table.rows().count(), 3);
    }

    #[test]
    fn test_row_width_is_enforced() {
        let mut table = SeriesTable::new(2);
        assert_eq!(
            table.push_row(&[1.0]),
            Err(SeriesError::RowWidth {
                expected: 2,
                found: 1
            })
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_reserve_keeps_rows() {
        let mut table = SeriesTable::new(1);
        table.push_row(&[7.0]).unwrap();
        table.reserve(100);
        assert_eq!(table.len(), 1);
        assert_eq!(table.row(0), Some(&[7.0][..]));
    }
}
