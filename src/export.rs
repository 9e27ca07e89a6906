//! Moving tables between sinks and CSV files.

use crate::record::{column_union, ResultRecord, INDEX_COLUMN};
use crate::sink::{RowSink, RowSource};
use crate::value::Value;
use crate::{Error, Result};
use std::io::{Read, Write};
use tracing::info;

/// Write `rows` as CSV. The header is the union of the rows' columns;
/// missing and `Null` cells are written empty.
///
/// # Errors
/// Returns error if the writer fails
pub fn write_csv<W: Write>(rows: &[ResultRecord], writer: W) -> Result<()> {
    let columns = column_union(rows);
    let mut out = csv::Writer::from_writer(writer);
    if columns.is_empty() {
        out.flush()?;
        return Ok(());
    }
    out.write_record(&columns)?;
    for row in rows {
        out.write_record(columns.iter().map(|c| row.get_or_null(c).to_string()))?;
    }
    out.flush()?;
    Ok(())
}

/// Read rows from CSV.
///
/// With `column_names` the file has no header row and cells are named in
/// that order; otherwise the first row is the header. Cells are parsed with
/// [`Value::parse_cell`]; empty cells are left out of the row.
///
/// # Errors
/// Returns error for malformed CSV or a record wider than `column_names`
pub fn read_csv<R: Read>(reader: R, column_names: Option<&[String]>) -> Result<Vec<ResultRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(column_names.is_none())
        .from_reader(reader);
    let names: Vec<String> = match column_names {
        Some(names) => names.to_vec(),
        None => csv_reader.headers()?.iter().map(str::to_string).collect(),
    };

    let mut rows = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() > names.len() {
            return Err(Error::InvalidInput(format!(
                "csv record {} has {} fields but only {} column names",
                line + 1,
                record.len(),
                names.len()
            )));
        }
        let row: ResultRecord = names
            .iter()
            .zip(record.iter())
            .map(|(name, cell)| (name.as_str(), Value::parse_cell(cell)))
            .filter(|(_, v)| !v.is_null())
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Copy every row of `table` from `source` to `target`, optionally dropping
/// the `index` column. Returns the number of rows copied.
///
/// # Errors
/// [`Error::InvalidInput`] when `source` has no such table, otherwise any
/// read or write failure
pub fn copy_table<S, T>(source: &S, target: &mut T, table: &str, drop_index: bool) -> Result<usize>
where
    S: RowSource + ?Sized,
    T: RowSink + ?Sized,
{
    let mut rows = source
        .select(table, &[])?
        .ok_or_else(|| Error::InvalidInput(format!("table '{table}' does not exist in source")))?;
    if drop_index {
        for row in &mut rows {
            row.remove(INDEX_COLUMN);
        }
    }
    target.append(table, &rows)?;
    info!(table, rows = rows.len(), drop_index, "copied table");
    Ok(rows.len())
}
