//! Prepared statements: parameter binding, caching, batches and cursors.
//!
//! A [`PreparedQuery`] is keyed in the connection's statement cache by its
//! SQL plus the types of its bound values. Rebinding a value of a different
//! type therefore selects (or creates) a different server-side statement.

mod batch;
pub mod cache;
mod cursor;

use std::sync::Arc;

pub use cache::{CachedStatement, Description, StatementCache, StatementCacheKey};
pub use cursor::is_bare_select;

use crate::codec;
use crate::context::Context;
use crate::error::{Error, Result, Warnings};
use crate::protocol::types::{FieldFormat, Oid};
use crate::result::{BatchResults, ResultBatch, ResultField};
use crate::state::{ExtendedOutcome, ExtendedStep, QueryOutcome};
use crate::tokio::Conn;
use crate::types::{Registry, TypeRef};
use crate::value::Value;

use cursor::Cursor;

/// A bound parameter value, optionally with an explicit type.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub value: Value,
    pub type_: Option<TypeRef>,
}

impl Binding {
    pub fn new(value: Value) -> Self {
        Self { value, type_: None }
    }

    pub fn typed(value: Value, type_: TypeRef) -> Self {
        Self {
            value,
            type_: Some(type_),
        }
    }

    /// Parameter type this binding asks for. `None` leaves it to the server.
    ///
    /// Strings stay unspecified so the server can cast them to whatever the
    /// statement expects. Rows and ranges carry no type of their own and
    /// must be bound with one.
    pub fn key_type(&self, registry: &Registry) -> Result<Option<Oid>> {
        if let Some(ty) = &self.type_ {
            return Ok(Some(ty.oid));
        }
        match &self.value {
            Value::Null | Value::Text(_) | Value::Unknown(_) | Value::Enum(_) => Ok(None),
            Value::Array(_) => Ok(codec::infer_array_element(&self.value)
                .and_then(|element| registry.cached(element))
                .map(|element| element.array_oid)
                .filter(|array_oid| *array_oid != 0)),
            Value::Record(_) | Value::Range(_) => Err(Error::InvalidUsage(format!(
                "cannot infer the type of a {} parameter, bind it with bind_typed",
                self.value.kind()
            ))),
            other => Ok(other.natural_oid()),
        }
    }
}

/// Encode `bindings` for a statement whose parameters have `types`.
pub(crate) fn encode_bindings(
    types: &[TypeRef],
    bindings: &[Binding],
    context: &Context,
) -> Result<(Vec<FieldFormat>, Vec<Option<Vec<u8>>>)> {
    if types.len() != bindings.len() {
        return Err(Error::InvalidUsage(format!(
            "statement takes {} parameters, {} bound",
            types.len(),
            bindings.len()
        )));
    }
    let mut formats = Vec::with_capacity(types.len());
    let mut values = Vec::with_capacity(types.len());
    for (ty, binding) in types.iter().zip(bindings) {
        let (format, bytes) = codec::encode(ty, &binding.value, context)?;
        formats.push(format);
        values.push(bytes);
    }
    Ok((formats, values))
}

/// SQLSTATEs telling that a cached statement can no longer be executed:
/// the statement is gone, or its result shape changed under it.
fn invalidates_statement(err: &Error) -> bool {
    matches!(err.sqlstate(), Some("26000" | "0A000"))
}

/// A statement bound to a connection, with its parameters.
///
/// Executing prepares the statement on first use and reuses the named
/// server-side statement afterwards.
pub struct PreparedQuery<'c> {
    conn: &'c mut Conn,
    sql: String,
    params: Vec<Option<Binding>>,
    batch: Vec<Vec<Binding>>,
    cursor: Option<Cursor>,
    warnings: Warnings,
}

impl<'c> PreparedQuery<'c> {
    pub(crate) fn new(conn: &'c mut Conn, sql: String) -> Self {
        Self {
            conn,
            sql,
            params: Vec::new(),
            batch: Vec::new(),
            cursor: None,
            warnings: Warnings::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind parameter `index` (0-based, so `$1` is 0).
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> &mut Self {
        self.set(index, Binding::new(value.into()))
    }

    /// Bind with an explicit type, e.g. a composite or range.
    pub fn bind_typed(&mut self, index: usize, value: impl Into<Value>, type_: TypeRef) -> &mut Self {
        self.set(index, Binding::typed(value.into(), type_))
    }

    fn set(&mut self, index: usize, binding: Binding) -> &mut Self {
        if self.params.len() <= index {
            self.params.resize(index + 1, None);
        }
        self.params[index] = Some(binding);
        self
    }

    pub fn clear_parameters(&mut self) {
        self.params.clear();
    }

    fn bindings(&self) -> Result<Vec<Binding>> {
        self.params
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                binding.clone().ok_or_else(|| {
                    Error::InvalidUsage(format!("parameter ${} is not bound", index + 1))
                })
            })
            .collect()
    }

    fn ensure_no_cursor(&self) -> Result<()> {
        if self.cursor.is_some() {
            return Err(Error::InvalidUsage(
                "close the cursor before executing the statement again".into(),
            ));
        }
        Ok(())
    }

    /// Parameter types and result columns of the statement, with every
    /// parameter type inferred by the server.
    pub async fn describe(&mut self) -> Result<Arc<Description>> {
        let key = StatementCacheKey::new(self.sql.clone(), Vec::new());
        self.conn.describe(&key, &mut self.warnings).await
    }

    fn key_types(&self, bindings: &[Binding]) -> Result<Vec<Option<Oid>>> {
        bindings
            .iter()
            .map(|binding| binding.key_type(self.conn.registry()))
            .collect()
    }

    /// Execute with the bound parameters.
    pub async fn execute(&mut self) -> Result<ResultBatch> {
        self.ensure_no_cursor()?;
        self.warnings.clear();
        let bindings = self.bindings()?;
        let (statement, outcome) = self.run(&bindings, None).await?;
        Ok(self.result_batch(statement.description.fields.clone(), outcome.result))
    }

    /// Snapshot the bound parameters as one batch entry.
    pub fn add_batch(&mut self) -> Result<()> {
        let bindings = self.bindings()?;
        if let Some(first) = self.batch.first()
            && first.len() != bindings.len()
        {
            return Err(Error::CacheConsistency(format!(
                "batch entry has {} parameters, earlier entries have {}",
                bindings.len(),
                first.len()
            )));
        }
        self.batch.push(bindings);
        Ok(())
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Run every batch entry in order and report one status per entry.
    pub async fn execute_batch(&mut self) -> Result<BatchResults> {
        self.ensure_no_cursor()?;
        batch::execute(self).await
    }

    /// Switch to cursor-backed execution. The cursor is declared by the
    /// first [`fetch`](Self::fetch).
    pub fn open_cursor(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Err(Error::InvalidUsage("a cursor is already open".into()));
        }
        if !is_bare_select(&self.sql) {
            return Err(Error::InvalidUsage(
                "cursors need a single SELECT statement".into(),
            ));
        }
        let name = self.conn.next_cursor_name();
        self.cursor = Some(Cursor::new(name));
        Ok(())
    }

    /// Fetch up to `count` rows from the open cursor.
    ///
    /// A count of 0 only declares the cursor and returns no rows.
    pub async fn fetch(&mut self, count: u32) -> Result<ResultBatch> {
        let mut cursor = self
            .cursor
            .take()
            .ok_or_else(|| Error::InvalidUsage("no open cursor".into()))?;
        let result = self.fetch_from(&mut cursor, count).await;
        self.cursor = Some(cursor);
        result
    }

    async fn fetch_from(&mut self, cursor: &mut Cursor, count: u32) -> Result<ResultBatch> {
        self.warnings.clear();
        if !cursor.declared {
            self.declare(cursor).await?;
        }
        if count == 0 {
            return Ok(self.result_batch(cursor.fields.clone(), QueryOutcome::default()));
        }
        let result_formats = cursor.fields.iter().map(|field| field.format).collect();
        let steps = vec![
            ExtendedStep::Parse {
                name: String::new(),
                sql: cursor.fetch_sql(count),
                param_oids: Vec::new(),
            },
            ExtendedStep::Bind {
                portal: String::new(),
                statement: String::new(),
                param_formats: Vec::new(),
                params: Vec::new(),
                result_formats,
            },
            ExtendedStep::Execute {
                portal: String::new(),
                max_rows: 0,
            },
        ];
        let outcome = self.conn.run_extended(steps, &mut self.warnings).await?;
        Ok(self.result_batch(cursor.fields.clone(), outcome.result))
    }

    async fn declare(&mut self, cursor: &mut Cursor) -> Result<()> {
        let bindings = self.bindings()?;
        let key = StatementCacheKey::new(self.sql.clone(), self.key_types(&bindings)?);
        let description = self
            .conn
            .describe(&key.describe_key(), &mut self.warnings)
            .await?;
        let (param_formats, params) = {
            let context = self.conn.context().read();
            encode_bindings(&description.param_types, &bindings, &context)?
        };
        let steps = vec![
            ExtendedStep::Parse {
                name: String::new(),
                sql: cursor.declare_sql(&self.sql),
                param_oids: description.param_types.iter().map(|ty| ty.oid).collect(),
            },
            ExtendedStep::Bind {
                portal: String::new(),
                statement: String::new(),
                param_formats,
                params,
                result_formats: Vec::new(),
            },
            ExtendedStep::Execute {
                portal: String::new(),
                max_rows: 0,
            },
        ];
        self.conn.run_extended(steps, &mut self.warnings).await?;
        cursor.declared = true;
        cursor.fields = description.fields.clone();

        if let Some(housekeeper) = self.conn.housekeeper() {
            let executor = self.conn.executor().downgrade();
            let close = cursor.close_sql();
            cursor.cleanup = Some(housekeeper.add(Box::new(move || {
                // Closing the connection already dropped the cursor.
                if let Some(executor) = executor.upgrade() {
                    executor.lazy_execute(&close);
                }
            })));
        }
        tracing::debug!("declared cursor {}", cursor.name);
        Ok(())
    }

    /// Close the open cursor, if any, on the server.
    pub async fn close_cursor(&mut self) -> Result<()> {
        let Some(cursor) = self.cursor.take() else {
            return Ok(());
        };
        if let Some(key) = cursor.cleanup
            && let Some(housekeeper) = self.conn.housekeeper()
        {
            housekeeper.remove(key);
        }
        if cursor.declared {
            self.conn
                .simple(&cursor.close_sql(), &mut self.warnings)
                .await?;
        }
        Ok(())
    }

    /// Notices of the last execution, describe and prepare included.
    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    /// Close the cursor and release the statement.
    ///
    /// The server-side statement stays cached on the connection for reuse.
    pub async fn close(mut self) -> Result<()> {
        self.close_cursor().await
    }

    /// Execute once, preparing on a cache miss.
    ///
    /// `previous` holds the parameter types of the preceding batch entry;
    /// they fill slots this entry leaves unspecified. Slots still open after
    /// that take the types of an unnamed describe parsed with the slots
    /// that are known, so the server infers only the open ones.
    async fn run(
        &mut self,
        bindings: &[Binding],
        previous: Option<&[TypeRef]>,
    ) -> Result<(Arc<CachedStatement>, ExtendedOutcome)> {
        let mut param_types = self.key_types(bindings)?;
        if let Some(previous) = previous {
            batch::fill_unspecified(&mut param_types, previous);
        }
        if param_types.contains(&None) {
            let described = StatementCacheKey::new(self.sql.clone(), param_types.clone());
            let description = self
                .conn
                .describe(&described.describe_key(), &mut self.warnings)
                .await?;
            batch::fill_unspecified(&mut param_types, &description.param_types);
        }

        let key = StatementCacheKey::new(self.sql.clone(), param_types);
        let statement = match self.conn.statement_cache().get(&key) {
            Some(statement) => statement,
            None => self.prepare(key.clone()).await?,
        };

        let (param_formats, params) = {
            let context = self.conn.context().read();
            encode_bindings(&statement.description.param_types, bindings, &context)?
        };
        let steps = vec![
            ExtendedStep::Bind {
                portal: String::new(),
                statement: statement.name.clone(),
                param_formats,
                params,
                result_formats: statement.description.result_formats(),
            },
            ExtendedStep::Execute {
                portal: String::new(),
                max_rows: 0,
            },
        ];
        match self.conn.run_extended(steps, &mut self.warnings).await {
            Ok(outcome) => Ok((statement, outcome)),
            Err(err) => {
                if invalidates_statement(&err) {
                    tracing::debug!("dropping cached statement {}: {}", statement.name, err);
                    self.conn.statement_cache().invalidate(&key);
                }
                Err(err)
            }
        }
    }

    async fn prepare(&mut self, key: StatementCacheKey) -> Result<Arc<CachedStatement>> {
        let name = self.conn.statement_cache().next_statement_name();
        let description = self
            .conn
            .describe_statement(&name, &key.sql, key.parse_oids(), &mut self.warnings)
            .await?;
        let description = Arc::new(description);
        let statement = Arc::new(CachedStatement {
            name,
            description: Arc::clone(&description),
        });
        let cache = self.conn.statement_cache();
        cache.insert_description(key.clone(), description);
        cache.insert(key, Arc::clone(&statement));
        Ok(statement)
    }

    fn result_batch(&self, fields: Vec<ResultField>, outcome: QueryOutcome) -> ResultBatch {
        ResultBatch::new(
            fields,
            outcome.rows,
            outcome.command,
            outcome.rows_affected,
            Arc::clone(self.conn.context()),
        )
    }
}

impl std::fmt::Debug for PreparedQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedQuery")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("batch", &self.batch.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}
