//! Row <-> Arrow `RecordBatch` conversion
//!
//! Column types are inferred per batch from the values present:
//! `Int` + `Float` widens to `Float64`, and an all-`Null` column is written as
//! a null `Utf8` column. Any other mix is written as `Utf8` cells carrying a
//! type tag (`i:1`, `f:0.5`, `b:true`, `s:text`), and the field is marked with
//! [`CELL_ENCODING_KEY`] so reads rebuild the original values.

use crate::record::{column_union, ResultRecord};
use crate::value::Value;
use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, RecordBatch, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use std::collections::HashMap;
use std::sync::Arc;

/// Field metadata key marking a column of type-tagged cells.
pub(crate) const CELL_ENCODING_KEY: &str = "gridrun:cell_encoding";
const TAGGED: &str = "tagged";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Mixed,
}

impl ColumnType {
    const fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Int(_) => Self::Int,
            Value::Float(_) => Self::Float,
            Value::Str(_) => Self::Str,
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Null, t) | (t, Self::Null) => t,
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => Self::Float,
            (a, b) if a == b => a,
            _ => Self::Mixed,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            Self::Bool => DataType::Boolean,
            Self::Int => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Null | Self::Str | Self::Mixed => DataType::Utf8,
        }
    }

    fn field(self, name: &str) -> Field {
        let field = Field::new(name, self.data_type(), true);
        if self == Self::Mixed {
            field.with_metadata(HashMap::from([(
                CELL_ENCODING_KEY.to_string(),
                TAGGED.to_string(),
            )]))
        } else {
            field
        }
    }
}

fn encode_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(format!("b:{b}")),
        Value::Int(i) => Some(format!("i:{i}")),
        Value::Float(x) => Some(format!("f:{x}")),
        Value::Str(s) => Some(format!("s:{s}")),
    }
}

fn decode_cell(name: &str, cell: &str) -> Result<Value> {
    let bad = || Error::StorageError(format!("column '{name}': malformed tagged cell '{cell}'"));
    let (tag, body) = cell.split_once(':').ok_or_else(bad)?;
    match tag {
        "b" => body.parse().map(Value::Bool).map_err(|_| bad()),
        "i" => body.parse().map(Value::Int).map_err(|_| bad()),
        "f" => body.parse().map(Value::Float).map_err(|_| bad()),
        "s" => Ok(Value::Str(body.to_string())),
        _ => Err(bad()),
    }
}

/// Build a `RecordBatch` from rows. The schema is the union of the rows'
/// columns in first-seen order; every field is nullable.
///
/// # Errors
///
/// Returns [`Error::StorageError`] if the rows carry no columns, or an Arrow
/// error if the batch cannot be assembled.
pub fn rows_to_batch(rows: &[ResultRecord]) -> Result<RecordBatch> {
    let columns = column_union(rows);
    if columns.is_empty() {
        return Err(Error::StorageError(
            "cannot build a record batch from rows without columns".to_string(),
        ));
    }

    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for name in &columns {
        let cells: Vec<&Value> = rows.iter().map(|r| r.get_or_null(name)).collect();
        let column_type = cells
            .iter()
            .fold(ColumnType::Null, |acc, v| acc.merge(ColumnType::of(v)));
        fields.push(column_type.field(name));
        arrays.push(build_array(column_type, &cells));
    }

    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn build_array(column_type: ColumnType, cells: &[&Value]) -> ArrayRef {
    match column_type {
        ColumnType::Bool => Arc::new(cells.iter().map(|v| v.as_bool()).collect::<BooleanArray>()),
        ColumnType::Int => Arc::new(cells.iter().map(|v| v.as_i64()).collect::<Int64Array>()),
        ColumnType::Float => Arc::new(cells.iter().map(|v| v.as_f64()).collect::<Float64Array>()),
        ColumnType::Null | ColumnType::Str => Arc::new(
            cells
                .iter()
                .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
                .collect::<StringArray>(),
        ),
        ColumnType::Mixed => Arc::new(
            cells
                .iter()
                .map(|v| encode_cell(v))
                .collect::<StringArray>(),
        ),
    }
}

/// Convert a `RecordBatch` back into rows, columns in schema order.
///
/// # Errors
///
/// Returns [`Error::StorageError`] for column types gridrun never writes
/// and cannot map to a [`Value`].
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<ResultRecord>> {
    let schema = batch.schema();
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let mut values = column_values(field.name(), array.as_ref())?;
        if field.metadata().get(CELL_ENCODING_KEY).map(String::as_str) == Some(TAGGED) {
            values = values
                .into_iter()
                .map(|v| match v {
                    Value::Str(cell) => decode_cell(field.name(), &cell),
                    other => Ok(other),
                })
                .collect::<Result<_>>()?;
        }
        columns.push((field.name().as_str(), values));
    }

    let rows = (0..batch.num_rows())
        .map(|i| {
            columns
                .iter()
                .map(|(name, values)| (*name, values[i].clone()))
                .collect::<ResultRecord>()
        })
        .collect();
    Ok(rows)
}

fn column_values(name: &str, array: &dyn Array) -> Result<Vec<Value>> {
    macro_rules! cells {
        ($ty:ty, $conv:expr) => {{
            let typed = array.as_any().downcast_ref::<$ty>().ok_or_else(|| {
                Error::StorageError(format!("column '{name}': unexpected array layout"))
            })?;
            (0..typed.len())
                .map(|i| if typed.is_null(i) { Value::Null } else { $conv(typed.value(i)) })
                .collect()
        }};
    }

    let values = match array.data_type() {
        DataType::Null => vec![Value::Null; array.len()],
        DataType::Boolean => cells!(BooleanArray, Value::Bool),
        DataType::Int32 => cells!(Int32Array, |v: i32| Value::Int(i64::from(v))),
        DataType::UInt32 => cells!(UInt32Array, |v: u32| Value::Int(i64::from(v))),
        DataType::Int64 => cells!(Int64Array, Value::Int),
        DataType::Float32 => cells!(Float32Array, |v: f32| Value::Float(f64::from(v))),
        DataType::Float64 => cells!(Float64Array, Value::Float),
        DataType::Utf8 => cells!(StringArray, |v: &str| Value::Str(v.to_string())),
        DataType::LargeUtf8 => cells!(LargeStringArray, |v: &str| Value::Str(v.to_string())),
        other => {
            return Err(Error::StorageError(format!(
                "column '{name}' has unsupported type {other}"
            )))
        }
    };
    Ok(values)
}
