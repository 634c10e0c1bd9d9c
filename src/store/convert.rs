//! Conversion of dynamically typed SQLite rows into an Arrow record batch.
//!
//! SQLite stores a type per value, not per column, so each column's Arrow
//! type is the widest storage class observed in it:
//! `NULL < INTEGER < REAL < TEXT < BLOB`. Narrower values are widened
//! (integers become floats, numbers become their decimal text, text becomes
//! its UTF-8 bytes). An all-NULL column is archived as nullable UTF-8. The
//! leading rowid column is always `Int64`.

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, BinaryBuilder, Float64Builder, Int64Builder, StringBuilder},
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    record_batch::RecordBatch,
};
use rusqlite::types::Value;

use super::ExtractedRows;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum StorageClass {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageClass {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => StorageClass::Null,
            Value::Integer(_) => StorageClass::Integer,
            Value::Real(_) => StorageClass::Real,
            Value::Text(_) => StorageClass::Text,
            Value::Blob(_) => StorageClass::Blob,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            StorageClass::Integer => DataType::Int64,
            StorageClass::Real => DataType::Float64,
            StorageClass::Null | StorageClass::Text => DataType::Utf8,
            StorageClass::Blob => DataType::Binary,
        }
    }
}

/// Build a record batch from extracted rows.
///
/// The first column (the rowid) is declared non-nullable; all source columns
/// are nullable.
pub fn rows_to_batch(extracted: &ExtractedRows) -> Result<RecordBatch, ArrowError> {
    let mut fields = Vec::with_capacity(extracted.columns.len());
    let mut arrays = Vec::with_capacity(extracted.columns.len());

    for (idx, name) in extracted.columns.iter().enumerate() {
        let class = extracted
            .rows
            .iter()
            .map(|row| StorageClass::of(&row[idx]))
            .max()
            .unwrap_or(StorageClass::Null);
        let data_type = if idx == 0 {
            DataType::Int64
        } else {
            class.data_type()
        };
        let column = extracted.rows.iter().map(|row| &row[idx]);
        let array = build_array(&data_type, extracted.rows.len(), column);
        fields.push(Field::new(name, data_type, idx != 0));
        arrays.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

fn build_array<'a>(
    data_type: &DataType,
    len: usize,
    values: impl Iterator<Item = &'a Value>,
) -> ArrayRef {
    match data_type {
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(len);
            for value in values {
                match value {
                    Value::Integer(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(len);
            for value in values {
                match value {
                    Value::Integer(v) => builder.append_value(*v as f64),
                    Value::Real(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Binary => {
            let mut builder = BinaryBuilder::with_capacity(len, 0);
            for value in values {
                match value {
                    Value::Blob(bytes) => builder.append_value(bytes),
                    Value::Null => builder.append_null(),
                    other => builder.append_value(text_of(other).unwrap_or_default()),
                }
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::with_capacity(len, 0);
            for value in values {
                match text_of(value) {
                    Some(text) => builder.append_value(text),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Blob(_) => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(s) => Some(s.clone()),
    }
}
