//! Blocking wrapper of [`crate::statement::PreparedQuery`].

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::error::{Result, Warnings};
use crate::result::{BatchResults, ResultBatch};
use crate::statement::{self, Description};
use crate::types::TypeRef;
use crate::value::Value;

/// A statement bound to a blocking [`super::Conn`].
#[derive(Debug)]
pub struct PreparedQuery<'c> {
    runtime: &'c Runtime,
    inner: statement::PreparedQuery<'c>,
}

impl<'c> PreparedQuery<'c> {
    pub(super) fn new(runtime: &'c Runtime, inner: statement::PreparedQuery<'c>) -> Self {
        Self { runtime, inner }
    }

    pub fn sql(&self) -> &str {
        self.inner.sql()
    }

    /// Bind parameter `index` (0-based).
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> &mut Self {
        self.inner.bind(index, value);
        self
    }

    pub fn bind_typed(&mut self, index: usize, value: impl Into<Value>, type_: TypeRef) -> &mut Self {
        self.inner.bind_typed(index, value, type_);
        self
    }

    pub fn clear_parameters(&mut self) {
        self.inner.clear_parameters();
    }

    pub fn describe(&mut self) -> Result<Arc<Description>> {
        self.runtime.block_on(self.inner.describe())
    }

    pub fn execute(&mut self) -> Result<ResultBatch> {
        self.runtime.block_on(self.inner.execute())
    }

    pub fn add_batch(&mut self) -> Result<()> {
        self.inner.add_batch()
    }

    pub fn execute_batch(&mut self) -> Result<BatchResults> {
        self.runtime.block_on(self.inner.execute_batch())
    }

    pub fn open_cursor(&mut self) -> Result<()> {
        self.inner.open_cursor()
    }

    pub fn fetch(&mut self, count: u32) -> Result<ResultBatch> {
        self.runtime.block_on(self.inner.fetch(count))
    }

    pub fn close_cursor(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.close_cursor())
    }

    pub fn warnings(&self) -> &Warnings {
        self.inner.warnings()
    }

    pub fn close(self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}
