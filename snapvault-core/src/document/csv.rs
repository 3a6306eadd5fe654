//! Delimited-text snapshot documents
//!
//! Adapter for snapshots stored as delimited text files. Files can be
//! larger than memory: iteration is line by line, and key-sorted reads go
//! through the external merge sort. Cells are minimally typed: unquoted
//! values that parse as integers or floats become numbers, empty cells
//! become null, everything else (and every quoted cell) is text.

use super::sort::ExternalSorter;
use super::{ColumnSpec, Document, DocumentReader, DocumentRow};
use crate::types::{RowKey, Scalar};
use crate::{config, ArchiveError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A document over a delimited text file
#[derive(Debug, Clone)]
pub struct CsvDocument {
    path: PathBuf,
    delimiter: char,
    has_header: bool,
    columns: Vec<ColumnSpec>,
}

impl CsvDocument {
    /// Open a comma-separated file with a header line
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, ',', true)
    }

    /// Open a delimited file. Without a header line, columns are named
    /// after their position.
    pub fn with_options(
        path: impl AsRef<Path>,
        delimiter: char,
        has_header: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            ArchiveError::Document(format!("cannot open {}: {}", path.display(), e))
        })?;
        let mut lines = BufReader::new(file).lines();
        let first = lines.next().transpose()?;
        let columns = match first {
            None => Vec::new(),
            Some(line) => {
                let cells = split_line(&line, delimiter)?;
                if has_header {
                    cells
                        .into_iter()
                        .map(|(text, _)| ColumnSpec::from(text))
                        .collect()
                } else {
                    (0..cells.len())
                        .map(|i| ColumnSpec::from(format!("column_{}", i)))
                        .collect()
                }
            }
        };
        Ok(Self {
            path,
            delimiter,
            has_header,
            columns,
        })
    }

    fn open_rows(&self) -> Result<CsvRows> {
        let mut lines = BufReader::new(File::open(&self.path)?).lines();
        if self.has_header {
            lines.next().transpose()?;
        }
        Ok(CsvRows {
            lines,
            delimiter: self.delimiter,
            arity: self.columns.len(),
            pos: 0,
        })
    }
}

impl Document for CsvDocument {
    fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn sorted_reader(&mut self, key: &[usize]) -> Result<Box<dyn DocumentReader + '_>> {
        for &k in key {
            if k >= self.columns.len() {
                return Err(ArchiveError::Document(format!(
                    "key column position {} out of bounds",
                    k
                )));
            }
        }
        let mut rows = self.open_rows()?;
        if key.is_empty() {
            // File order is the row-index order.
            return Ok(Box::new(CsvIndexReader { rows }));
        }
        let mut sorter = ExternalSorter::new(key.to_vec(), config::SORT_BUFFER_ROWS);
        while let Some((pos, values)) = rows.next_values()? {
            sorter.push(pos, values)?;
        }
        Ok(Box::new(sorter.into_reader()?))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct CsvRows {
    lines: std::io::Lines<BufReader<File>>,
    delimiter: char,
    arity: usize,
    pos: usize,
}

impl CsvRows {
    fn next_values(&mut self) -> Result<Option<(usize, Vec<Scalar>)>> {
        let line = match self.lines.next() {
            Some(line) => line?,
            None => return Ok(None),
        };
        let cells = split_line(&line, self.delimiter)?;
        if cells.len() != self.arity {
            return Err(ArchiveError::Document(format!(
                "row {} has {} values, expected {}",
                self.pos,
                cells.len(),
                self.arity
            )));
        }
        let values = cells
            .into_iter()
            .map(|(text, quoted)| parse_cell(text, quoted))
            .collect();
        let pos = self.pos;
        self.pos += 1;
        Ok(Some((pos, values)))
    }
}

struct CsvIndexReader {
    rows: CsvRows,
}

impl DocumentReader for CsvIndexReader {
    fn next_row(&mut self) -> Result<Option<DocumentRow>> {
        match self.rows.next_values()? {
            Some((pos, values)) => Ok(Some(DocumentRow {
                pos,
                key: RowKey::Index(pos as i64),
                values,
            })),
            None => Ok(None),
        }
    }
}

/// Split one line into cells, tracking which cells were quoted. Quoted
/// cells use `"` with `""` as the escape; an unterminated quote is a
/// malformed document.
fn split_line(line: &str, delimiter: char) -> Result<Vec<(String, bool)>> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cell.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                cell.push(c);
            }
        } else if c == '"' && cell.is_empty() {
            in_quotes = true;
            quoted = true;
        } else if c == delimiter {
            cells.push((std::mem::take(&mut cell), quoted));
            quoted = false;
        } else {
            cell.push(c);
        }
    }
    if in_quotes {
        return Err(ArchiveError::Document(format!(
            "unterminated quote in line '{}'",
            line
        )));
    }
    cells.push((cell, quoted));
    Ok(cells)
}

/// Parse one cell into a scalar. Quoted cells stay text verbatim.
fn parse_cell(text: String, quoted: bool) -> Scalar {
    if quoted {
        return Scalar::Text(text);
    }
    if text.is_empty() {
        return Scalar::Null;
    }
    if let Ok(v) = text.parse::<i64>() {
        return Scalar::Int(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return Scalar::Float(v);
    }
    Scalar::Text(text)
}

/// Writer for reconstructed snapshots as delimited text
pub struct CsvWriter {
    out: BufWriter<File>,
    delimiter: char,
}

impl CsvWriter {
    /// Create a comma-separated output file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            delimiter: ',',
        })
    }

    /// Write one record
    pub fn write_record<S: AsRef<str>>(&mut self, cells: &[S]) -> Result<()> {
        let line = cells
            .iter()
            .map(|cell| quote_cell(cell.as_ref(), self.delimiter))
            .collect::<Vec<_>>()
            .join(&self.delimiter.to_string());
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    /// Flush and close the output file
    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn quote_cell(cell: &str, delimiter: char) -> String {
    if cell.contains(delimiter) || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
