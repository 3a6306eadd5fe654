//! Bounded-memory external merge sort for document rows
//!
//! File documents can be larger than memory, but the merge engine requires
//! rows in ascending key order. The sorter buffers a fixed number of rows,
//! spills sorted runs to anonymous temp files, and merges the runs with a
//! heap. Scratch files live only as long as the sorted reader.

use super::{DocumentReader, DocumentRow};
use crate::store::serialize::{scalar_from_json, scalar_to_json};
use crate::types::{RowKey, Scalar};
use crate::{ArchiveError, Result};
use serde_json::{json, Value as Json};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, Write};

/// Sorts document rows by the key derived from the given key column
/// positions, spilling to disk when the in-memory buffer fills up
pub(crate) struct ExternalSorter {
    key: Vec<usize>,
    run_rows: usize,
    buffer: Vec<(usize, Vec<Scalar>)>,
    runs: Vec<File>,
}

impl ExternalSorter {
    pub fn new(key: Vec<usize>, run_rows: usize) -> Self {
        Self {
            key,
            run_rows: run_rows.max(1),
            buffer: Vec::new(),
            runs: Vec::new(),
        }
    }

    fn key_for(key: &[usize], values: &[Scalar]) -> RowKey {
        let key_values: Vec<&Scalar> = key.iter().map(|&k| &values[k]).collect();
        RowKey::from_values(&key_values)
    }

    /// Add a row at its document position
    pub fn push(&mut self, pos: usize, values: Vec<Scalar>) -> Result<()> {
        self.buffer.push((pos, values));
        if self.buffer.len() >= self.run_rows {
            self.spill()?;
        }
        Ok(())
    }

    fn sort_buffer(key: &[usize], buffer: &mut [(usize, Vec<Scalar>)]) {
        buffer.sort_by(|a, b| {
            Self::key_for(key, &a.1)
                .cmp(&Self::key_for(key, &b.1))
                .then(a.0.cmp(&b.0))
        });
    }

    fn spill(&mut self) -> Result<()> {
        Self::sort_buffer(&self.key, &mut self.buffer);
        let mut out = BufWriter::new(tempfile::tempfile()?);
        for (pos, values) in self.buffer.drain(..) {
            let cells: Vec<Json> = values.iter().map(scalar_to_json).collect();
            let line = json!([pos, cells]);
            writeln!(out, "{}", line)?;
        }
        let mut file = out
            .into_inner()
            .map_err(|e| ArchiveError::Store(e.into_error()))?;
        file.rewind()?;
        self.runs.push(file);
        Ok(())
    }

    /// Finish sorting and return a reader over all rows in key order
    pub fn into_reader(mut self) -> Result<SortedReader> {
        if self.runs.is_empty() {
            // Everything fit in memory.
            Self::sort_buffer(&self.key, &mut self.buffer);
            return Ok(SortedReader {
                key: self.key,
                buffered: self.buffer.into_iter(),
                runs: Vec::new(),
                heap: BinaryHeap::new(),
            });
        }
        if !self.buffer.is_empty() {
            self.spill()?;
        }
        let mut runs: Vec<RunReader> = self
            .runs
            .into_iter()
            .map(|file| RunReader {
                lines: BufReader::new(file).lines(),
            })
            .collect();
        let mut heap = BinaryHeap::new();
        for (idx, run) in runs.iter_mut().enumerate() {
            if let Some((pos, values)) = run.next_row()? {
                heap.push(Reverse(HeapEntry {
                    sort_key: Self::key_for(&self.key, &values),
                    pos,
                    values,
                    run: idx,
                }));
            }
        }
        Ok(SortedReader {
            key: self.key,
            buffered: Vec::new().into_iter(),
            runs,
            heap,
        })
    }
}

struct RunReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl RunReader {
    fn next_row(&mut self) -> Result<Option<(usize, Vec<Scalar>)>> {
        let line = match self.lines.next() {
            Some(line) => line?,
            None => return Ok(None),
        };
        let json: Json = serde_json::from_str(&line)
            .map_err(|e| ArchiveError::Serialization(format!("bad sort run record: {}", e)))?;
        let record = json
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| ArchiveError::Serialization("bad sort run record".into()))?;
        let pos = record[0]
            .as_u64()
            .ok_or_else(|| ArchiveError::Serialization("bad sort run position".into()))?
            as usize;
        let cells = record[1]
            .as_array()
            .ok_or_else(|| ArchiveError::Serialization("bad sort run cells".into()))?;
        let values = cells.iter().map(scalar_from_json).collect::<Result<Vec<_>>>()?;
        Ok(Some((pos, values)))
    }
}

struct HeapEntry {
    sort_key: RowKey,
    pos: usize,
    values: Vec<Scalar>,
    run: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key
            .cmp(&other.sort_key)
            .then(self.pos.cmp(&other.pos))
            .then(self.run.cmp(&other.run))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Reader over externally sorted rows
pub(crate) struct SortedReader {
    key: Vec<usize>,
    buffered: std::vec::IntoIter<(usize, Vec<Scalar>)>,
    runs: Vec<RunReader>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl DocumentReader for SortedReader {
    fn next_row(&mut self) -> Result<Option<DocumentRow>> {
        if let Some((pos, values)) = self.buffered.next() {
            let key = ExternalSorter::key_for(&self.key, &values);
            return Ok(Some(DocumentRow { pos, key, values }));
        }
        let Reverse(entry) = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if let Some((pos, values)) = self.runs[entry.run].next_row()? {
            self.heap.push(Reverse(HeapEntry {
                sort_key: ExternalSorter::key_for(&self.key, &values),
                pos,
                values,
                run: entry.run,
            }));
        }
        Ok(Some(DocumentRow {
            pos: entry.pos,
            key: entry.sort_key,
            values: entry.values,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(reader: &mut dyn DocumentReader) -> Vec<DocumentRow> {
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_in_memory_sort() {
        let mut sorter = ExternalSorter::new(vec![0], 100);
        for (pos, name) in ["Claire", "Alice", "Bob"].iter().enumerate() {
            sorter.push(pos, vec![(*name).into(), (pos as i64).into()]).unwrap();
        }
        let mut reader = sorter.into_reader().unwrap();
        let rows = collect(&mut reader);
        let names: Vec<String> = rows
            .iter()
            .map(|r| r.values[0].to_string())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Claire"]);
        assert_eq!(rows[0].pos, 1);
    }

    #[test]
    fn test_spilled_sort() {
        // A run size of 4 forces several spills for 100 rows.
        let mut sorter = ExternalSorter::new(vec![0], 4);
        for i in 0..100u64 {
            let v = (i * 37) % 100;
            sorter.push(i as usize, vec![Scalar::Int(v as i64)]).unwrap();
        }
        let mut reader = sorter.into_reader().unwrap();
        let rows = collect(&mut reader);
        assert_eq!(rows.len(), 100);
        let keys: Vec<i64> = rows
            .iter()
            .map(|r| match r.values[0] {
                Scalar::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_null_keys_sort_first() {
        let mut sorter = ExternalSorter::new(vec![0], 2);
        sorter.push(0, vec![Scalar::Text("x".into())]).unwrap();
        sorter.push(1, vec![Scalar::Null]).unwrap();
        sorter.push(2, vec![Scalar::Int(5)]).unwrap();
        let mut reader = sorter.into_reader().unwrap();
        let rows = collect(&mut reader);
        assert_eq!(rows[0].values[0], Scalar::Null);
        assert_eq!(rows[1].values[0], Scalar::Int(5));
        assert_eq!(rows[2].values[0], Scalar::Text("x".into()));
    }
}
