// src/design.rs

//! Sample design table: an optional tab-separated file pairing each primary
//! input (e.g. a treatment BAM) with per-sample values (control BAM,
//! condition, replicate).

use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::errors::{PipedagError, Result};
use crate::fs::{normalize, FileSystem};

#[derive(Debug, Clone, PartialEq)]
pub struct DesignTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    key_column: usize,
}

impl DesignTable {
    /// Load the table through `fs`. A missing file is not an error: tasks
    /// reading it simply expand to zero instances.
    pub fn load(fs: &dyn FileSystem, path: &Path, key_column: &str) -> Result<Option<Self>> {
        if !fs.is_file(path) {
            warn!(path = %path.display(), "design table not found; design inputs will be empty");
            return Ok(None);
        }
        let reader = fs.open_read(path)?;
        let table = Self::from_reader(reader, key_column)?;
        debug!(path = %path.display(), rows = table.rows.len(), "loaded design table");
        Ok(Some(table))
    }

    pub fn from_reader<R: Read>(reader: R, key_column: &str) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let key_column = headers
            .iter()
            .position(|h| h == key_column)
            .ok_or_else(|| {
                PipedagError::ConfigError(format!(
                    "design table has no key column '{key_column}' (columns: {})",
                    headers.join(", ")
                ))
            })?;

        let mut rows = Vec::new();
        let mut record = StringRecord::new();
        while rdr.read_record(&mut record)? {
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            headers,
            rows,
            key_column,
        })
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// Non-empty values of a column, in row order, without duplicates.
    pub fn column(&self, column: &str) -> Result<Vec<String>> {
        let idx = self.column_index(column).ok_or_else(|| {
            PipedagError::ConfigError(format!("design table has no column '{column}'"))
        })?;
        let mut values: Vec<String> = Vec::new();
        for row in &self.rows {
            if let Some(v) = row.get(idx).filter(|v| !v.is_empty()) {
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
        }
        Ok(values)
    }

    /// Value of `column` in the row whose key column names `key`.
    ///
    /// Keys are compared as normalized paths, falling back to file names so
    /// that `bams/s1.bam` pairs with a row keyed `s1.bam`.
    pub fn lookup(&self, key: &Path, column: &str) -> Option<String> {
        let idx = self.column_index(column)?;
        let key = normalize(key);
        let row = self
            .rows
            .iter()
            .find(|row| row.get(self.key_column).is_some_and(|k| normalize(Path::new(k)) == key))
            .or_else(|| {
                let name = key.file_name()?;
                self.rows.iter().find(|row| {
                    row.get(self.key_column)
                        .is_some_and(|k| Path::new(k).file_name() == Some(name))
                })
            })?;
        row.get(idx).filter(|v| !v.is_empty()).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
