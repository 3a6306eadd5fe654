//! Snapshot reconstruction
//!
//! Checkout streams the archive row file once, keeps the rows that were
//! alive at the requested version, extracts the scalar that was current at
//! that version from every value history, and orders the result by the row
//! positions of that version.

use crate::schema::ArchiveSchema;
use crate::store::RowReader;
use crate::types::{Dataset, DatasetRow, Scalar};
use crate::{ArchiveError, Result};

/// Reconstruct the table of the given version from the archive row stream
pub(crate) fn checkout_version(
    reader: &mut dyn RowReader,
    schema: &ArchiveSchema,
    version: u64,
) -> Result<Dataset> {
    let columns = schema.at_version(version);
    let colids: Vec<u32> = columns.iter().map(|c| c.id).collect();
    let mut rows: Vec<(usize, DatasetRow)> = Vec::new();
    while let Some(row) = reader.next_row()? {
        if !row.timestamp.contains(version) {
            continue;
        }
        let pos = row.position_at(version).ok_or_else(|| {
            ArchiveError::Integrity(format!(
                "row {} is live at version {} but has no position",
                row.rowid, version
            ))
        })?;
        let values: Vec<Scalar> = colids
            .iter()
            .map(|colid| {
                row.cells
                    .get(colid)
                    .and_then(|cell| cell.at_version(version))
                    .cloned()
                    .unwrap_or(Scalar::Null)
            })
            .collect();
        rows.push((
            pos,
            DatasetRow {
                rowid: row.rowid,
                values,
            },
        ));
    }
    rows.sort_by_key(|(pos, _)| *pos);
    Ok(Dataset {
        columns,
        rows: rows.into_iter().map(|(_, row)| row).collect(),
    })
}
