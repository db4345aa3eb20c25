//! Synchronous PostgreSQL connection.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::context::SharedContext;
use crate::error::{Error, Result, Warnings};
use crate::handler::NotificationHandler;
use crate::housekeeper::Housekeeper;
use crate::opts::Opts;
use crate::protocol::types::Oid;
use crate::result::ResultBatch;
use crate::server::ServerInfo;
use crate::state::connection::KeyData;
use crate::tokio::Conn as AsyncConn;
use crate::types::{Registry, SharedRegistryFactory, TypeRef};
use crate::value::Value;

use super::cancel::CancelHandle;
use super::statement::PreparedQuery;

/// Synchronous PostgreSQL connection.
///
/// Owns a current-thread runtime; the connection's transport only makes
/// progress while one of these methods blocks on it.
pub struct Conn {
    runtime: Runtime,
    inner: AsyncConn,
}

impl Conn {
    /// Connect to the first reachable address of `opts`.
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        Self::connect_with(opts, SharedRegistryFactory::global())
    }

    pub fn connect_with(opts: Opts, factory: &SharedRegistryFactory) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let inner = runtime.block_on(AsyncConn::connect_with(opts, factory))?;
        Ok(Self { runtime, inner })
    }

    /// Run `sql` and return the result of its last statement.
    pub fn query(&mut self, sql: &str) -> Result<ResultBatch> {
        self.runtime.block_on(self.inner.query(sql))
    }

    pub fn query_batch(&mut self, sql: &str) -> Result<Vec<ResultBatch>> {
        self.runtime.block_on(self.inner.query_batch(sql))
    }

    pub fn query_batch_prepared(
        &mut self,
        sql: &str,
        params: &[Vec<Value>],
    ) -> Result<Vec<ResultBatch>> {
        self.runtime
            .block_on(self.inner.query_batch_prepared(sql, params))
    }

    pub fn prepare(&mut self, sql: impl Into<String>) -> PreparedQuery<'_> {
        PreparedQuery::new(&self.runtime, self.inner.prepare(sql))
    }

    pub fn type_by_name(&mut self, name: &str) -> Result<TypeRef> {
        self.runtime.block_on(self.inner.type_by_name(name))
    }

    pub fn type_by_oid(&mut self, oid: Oid) -> Result<TypeRef> {
        self.runtime.block_on(self.inner.type_by_oid(oid))
    }

    /// Ask the server to cancel the running request. Never fails.
    pub fn cancel(&self) {
        self.runtime.block_on(self.inner.cancel())
    }

    /// Handle for cancelling this connection's request from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.inner.cancel_handle())
    }

    pub fn set_notification_handler<H: NotificationHandler + 'static>(&mut self, handler: H) {
        self.inner.set_notification_handler(handler);
    }

    pub fn set_housekeeper(&mut self, housekeeper: Arc<dyn Housekeeper>) {
        self.inner.set_housekeeper(housekeeper);
    }

    pub fn warnings(&self) -> &Warnings {
        self.inner.warnings()
    }

    pub fn server_info(&self) -> &ServerInfo {
        self.inner.server_info()
    }

    pub fn key_data(&self) -> Option<KeyData> {
        self.inner.key_data()
    }

    pub fn context(&self) -> &SharedContext {
        self.inner.context()
    }

    pub fn registry(&self) -> &Registry {
        self.inner.registry()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// End the session, letting the transport send Terminate first.
    pub fn close(self) {
        let Self { runtime, inner } = self;
        inner.close();
        // Give the transport a turn to send Terminate.
        runtime.block_on(tokio::task::yield_now());
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Conn").field(&self.inner).finish()
    }
}
