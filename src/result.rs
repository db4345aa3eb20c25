//! Query results.

use crate::codec;
use crate::context::SharedContext;
use crate::conversion::{FromRow, FromValue, from_value};
use crate::error::{Error, Result};
use crate::protocol::backend::FieldDescription;
use crate::protocol::types::{FieldFormat, Oid};
use crate::types::{Modifiers, TypeRef};
use crate::value::Value;

/// Column of a result, with its type resolved.
#[derive(Debug, Clone)]
pub struct ResultField {
    pub name: String,
    /// 0 if not a table column
    pub table_oid: Oid,
    /// 0 if not a table column
    pub column_id: i16,
    pub type_: TypeRef,
    pub modifier: i32,
    pub format: FieldFormat,
}

impl ResultField {
    pub fn new(description: &FieldDescription, type_: TypeRef) -> Self {
        Self {
            name: description.name.clone(),
            table_oid: description.table_oid,
            column_id: description.column_id,
            type_,
            modifier: description.type_modifier,
            format: description.format,
        }
    }

    /// Precision, scale or length packed into the column's type modifier.
    pub fn modifiers(&self) -> Modifiers {
        self.type_.modifiers(self.modifier)
    }
}

/// Raw field buffers of one row. `None` is SQL NULL.
pub type RowData = Vec<Option<Vec<u8>>>;

/// Rows of one statement plus its command tag.
///
/// Buffers are decoded on access. The batch owns them until it is dropped
/// or [`released`](ResultBatch::release).
#[derive(Debug)]
pub struct ResultBatch {
    fields: Vec<ResultField>,
    rows: Vec<RowData>,
    command: String,
    rows_affected: Option<u64>,
    context: SharedContext,
}

impl ResultBatch {
    pub fn new(
        fields: Vec<ResultField>,
        rows: Vec<RowData>,
        command: String,
        rows_affected: Option<u64>,
        context: SharedContext,
    ) -> Self {
        Self {
            fields,
            rows,
            command,
            rows_affected,
            context,
        }
    }

    pub fn fields(&self) -> &[ResultField] {
        &self.fields
    }

    pub fn rows(&self) -> &[RowData] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Command tag, e.g. `INSERT 0 3`.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Decode one field.
    pub fn value(&self, row: usize, column: usize) -> Result<Value> {
        let data = self
            .rows
            .get(row)
            .ok_or_else(|| Error::InvalidUsage(format!("row {} out of range", row)))?;
        let (field, bytes) = self
            .fields
            .get(column)
            .zip(data.get(column))
            .ok_or_else(|| Error::InvalidUsage(format!("column {} out of range", column)))?;
        let context = self.context.read();
        codec::decode(&field.type_, field.format, bytes.as_deref(), &context)
    }

    /// Decode one field into a Rust type.
    pub fn get<T: FromValue>(&self, row: usize, column: usize) -> Result<T> {
        from_value(&self.value(row, column)?)
    }

    pub fn decode_row(&self, row: usize) -> Result<Vec<Value>> {
        (0..self.fields.len())
            .map(|column| self.value(row, column))
            .collect()
    }

    /// Decode every row into `T`.
    pub fn collect<T: FromRow>(&self) -> Result<Vec<T>> {
        (0..self.rows.len())
            .map(|row| T::from_row(&self.decode_row(row)?))
            .collect()
    }

    /// Give the row buffers back.
    pub fn release(self) {}
}

/// Outcome of one batch entry.
#[derive(Debug)]
pub enum BatchStatus {
    /// Rows affected, when the command reports a count
    Success(Option<u64>),
    Failed(Error),
    /// Skipped after the batch was aborted
    NotExecuted,
}

impl BatchStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchStatus::Success(_))
    }
}

/// One status per batch entry, in entry order.
#[derive(Debug, Default)]
pub struct BatchResults {
    statuses: Vec<BatchStatus>,
}

impl BatchResults {
    pub fn new(statuses: Vec<BatchStatus>) -> Self {
        Self { statuses }
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BatchStatus> {
        self.statuses.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchStatus> {
        self.statuses.iter()
    }

    pub fn is_success(&self) -> bool {
        self.statuses.iter().all(BatchStatus::is_success)
    }

    /// Index and error of every failed entry.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.statuses
            .iter()
            .enumerate()
            .filter_map(|(index, status)| match status {
                BatchStatus::Failed(err) => Some((index, err)),
                _ => None,
            })
    }

    pub fn into_statuses(self) -> Vec<BatchStatus> {
        self.statuses
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::context::Context;
    use crate::types::SharedRegistry;
    use crate::types::test_support::{int4, text};

    fn field(name: &str, type_: TypeRef, format: FieldFormat) -> ResultField {
        ResultField {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_,
            modifier: -1,
            format,
        }
    }

    fn batch() -> ResultBatch {
        let context = Arc::new(RwLock::new(Context::new(Arc::new(SharedRegistry::new()))));
        ResultBatch::new(
            vec![
                field("id", int4(), FieldFormat::Binary),
                field("note", text(), FieldFormat::Text),
            ],
            vec![
                vec![Some(7_i32.to_be_bytes().to_vec()), Some(b"".to_vec())],
                vec![Some(8_i32.to_be_bytes().to_vec()), None],
            ],
            "SELECT 2".into(),
            Some(2),
            context,
        )
    }

    #[test]
    fn fields_decode_on_access() {
        let batch = batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.column_index("note"), Some(1));
        assert_eq!(batch.get::<i32>(1, 0).unwrap(), 8);
        assert_eq!(batch.value(0, 1).unwrap(), Value::Text(String::new()));
        assert_eq!(batch.value(1, 1).unwrap(), Value::Null);
        assert!(matches!(batch.value(2, 0), Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn rows_collect_into_tuples() {
        let rows: Vec<(i32, Option<String>)> = batch().collect().unwrap();
        assert_eq!(rows, [(7, Some(String::new())), (8, None)]);
    }

    #[test]
    fn batch_statuses() {
        let results = BatchResults::new(vec![
            BatchStatus::Success(Some(1)),
            BatchStatus::Failed(Error::ConnectionBroken),
            BatchStatus::NotExecuted,
        ]);
        assert!(!results.is_success());
        assert_eq!(results.failures().map(|(index, _)| index).collect::<Vec<_>>(), [1]);
    }
}
