//! Asynchronous PostgreSQL connection.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::buffer_set::BufferSet;
use crate::codec;
use crate::context::{Context, SharedContext};
use crate::error::{Error, Result, Warnings};
use crate::handler::{ConnListener, NotificationHandler, NotificationSlot};
use crate::housekeeper::Housekeeper;
use crate::opts::{Opts, ServerAddress, SslMode};
use crate::protocol::backend::FieldDescription;
use crate::protocol::types::{FieldFormat, ObjectKind, Oid};
use crate::result::{ResultBatch, ResultField};
use crate::server::{ServerConnectionInfo, ServerInfo};
use crate::state::connection::KeyData;
use crate::state::{
    Action, ConnectionStateMachine, ExtendedOutcome, ExtendedStep, QueryOutcome, StateMachine,
};
use crate::statement::{Description, PreparedQuery, StatementCache, StatementCacheKey};
use crate::types::{Registry, SharedRegistry, SharedRegistryFactory, TypeRef};
use crate::value::Value;

use super::cancel::{self, CancelHandle};
use super::executor::RequestExecutor;
use super::loader::CatalogLoader;
use super::stream::Stream;
use super::worker::Worker;

/// Asynchronous PostgreSQL connection.
///
/// Requests go to a background task owning the socket, so a `Conn` must be
/// created inside a tokio runtime.
pub struct Conn {
    executor: RequestExecutor,
    loader: CatalogLoader,
    registry: Registry,
    context: SharedContext,
    info: ServerConnectionInfo,
    key_data: Option<KeyData>,
    server_params: Vec<(String, String)>,
    cache: StatementCache,
    opts: Opts,
    housekeeper: Option<Arc<dyn Housekeeper>>,
    notifications: NotificationSlot,
    warnings: Warnings,
    cursor_counter: u64,
}

impl Conn {
    /// Connect to the first reachable address of `opts`.
    ///
    /// With `shared_registry` set, types are shared with every other
    /// connection to the same server through the process-wide factory.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        Self::connect_with(opts, SharedRegistryFactory::global()).await
    }

    /// Connect, taking shared registries from `factory`.
    ///
    /// Addresses are tried in order. When none completes the handshake, the
    /// error of the last attempt is returned.
    pub async fn connect_with(opts: Opts, factory: &SharedRegistryFactory) -> Result<Self> {
        let mut last_error = None;
        for address in &opts.addresses {
            match Self::connect_to(address, &opts, factory).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    tracing::warn!("connection to {} failed: {}", address, err);
                    last_error = Some(failover_error(address, err));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::connection("unknown connection failure")))
    }

    async fn connect_to(
        address: &ServerAddress,
        opts: &Opts,
        factory: &SharedRegistryFactory,
    ) -> Result<Self> {
        let stream = Stream::connect(address).await?;

        let mut options = opts.clone();
        let tls_available = cfg!(feature = "tokio-tls");
        if address.is_unix() || (!tls_available && options.ssl_mode == SslMode::Prefer) {
            options.ssl_mode = SslMode::Disable;
        }

        let mut buffer_set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(options);
        let stream = handshake(stream, address, &mut machine, &mut buffer_set).await?;

        let mut warnings = Warnings::new();
        warnings.chain(machine.take_notices());
        let server_params = machine.take_server_params();
        let server = ServerInfo::from_params(&server_params)?;
        let database = opts.database.clone().unwrap_or_else(|| opts.user.clone());
        let info = ServerConnectionInfo::new(server, address.clone(), database);

        let shared = if opts.shared_registry {
            factory.get(&info)
        } else {
            Arc::new(SharedRegistry::new())
        };
        let mut context = Context::new(Arc::clone(&shared));
        for (name, value) in &server_params {
            context.update_system_parameter(name, value);
        }
        let context = Arc::new(RwLock::new(context));

        let notifications: NotificationSlot = Arc::new(Mutex::new(None));
        let listener = ConnListener::new(Arc::clone(&context), Arc::clone(&notifications));
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Worker::new(stream, buffer_set, Box::new(listener)).run(receiver));

        let executor = RequestExecutor::new(sender);
        let loader = CatalogLoader::new(
            executor.clone(),
            opts.internal_query_timeout,
            Some(info.server.version.clone()),
        );
        let mut conn = Self {
            executor,
            loader,
            registry: Registry::new(shared),
            context,
            info,
            key_data: machine.key_data(),
            server_params,
            cache: StatementCache::new(
                opts.prepared_statement_cache_size,
                opts.description_cache_size,
            ),
            opts: opts.clone(),
            housekeeper: None,
            notifications,
            warnings,
            cursor_counter: 0,
        };
        if let Err(err) = conn.initialize().await {
            conn.executor.terminate();
            return Err(err);
        }
        tracing::debug!("connected to {} (server {})", address, conn.info.server.version);
        Ok(conn)
    }

    async fn initialize(&mut self) -> Result<()> {
        self.registry.seed(&mut self.loader).await?;
        self.loader.prepare().await?;

        let outcomes = self
            .executor
            .query("SHOW lc_monetary")
            .wait(self.opts.internal_query_timeout)
            .await?
            .into_result(&mut self.warnings)?;
        let locale = outcomes
            .first()
            .and_then(|outcome| outcome.rows.first())
            .and_then(|row| row.first())
            .and_then(Option::as_deref);
        if let Some(locale) = locale {
            self.context
                .write()
                .set_monetary_locale(&String::from_utf8_lossy(locale));
        }
        Ok(())
    }

    /// Run `sql` over the simple query protocol and return the result of
    /// its last statement.
    pub async fn query(&mut self, sql: &str) -> Result<ResultBatch> {
        let mut batches = self.query_batch(sql).await?;
        Ok(batches.pop().unwrap_or_else(|| {
            ResultBatch::new(Vec::new(), Vec::new(), String::new(), None, Arc::clone(&self.context))
        }))
    }

    /// Run `sql` over the simple query protocol, one result per statement.
    pub async fn query_batch(&mut self, sql: &str) -> Result<Vec<ResultBatch>> {
        self.warnings.clear();
        let mut warnings = std::mem::take(&mut self.warnings);
        let result = self.simple(sql, &mut warnings).await;
        self.warnings = warnings;
        let mut batches = Vec::new();
        for outcome in result? {
            batches.push(self.result_batch(outcome).await?);
        }
        Ok(batches)
    }

    /// Run `sql` once per parameter set, with text parameters and results.
    ///
    /// `sql` of the form `@name` executes the connection's utility statement
    /// `name` instead of parsing anything.
    pub async fn query_batch_prepared(
        &mut self,
        sql: &str,
        params: &[Vec<Value>],
    ) -> Result<Vec<ResultBatch>> {
        self.warnings.clear();
        let mut warnings = std::mem::take(&mut self.warnings);
        let result = self.run_text_batch(sql, params, &mut warnings).await;
        self.warnings = warnings;
        let mut batches = Vec::with_capacity(params.len());
        for outcome in result? {
            batches.push(self.result_batch(outcome).await?);
        }
        Ok(batches)
    }

    async fn run_text_batch(
        &mut self,
        sql: &str,
        params: &[Vec<Value>],
        warnings: &mut Warnings,
    ) -> Result<Vec<QueryOutcome>> {
        let (statement, mut parse) = match sql.strip_prefix('@') {
            Some(name) => (name.to_string(), None),
            None => (
                String::new(),
                Some(ExtendedStep::Parse {
                    name: String::new(),
                    sql: sql.to_string(),
                    param_oids: Vec::new(),
                }),
            ),
        };
        let mut outcomes = Vec::with_capacity(params.len());
        for values in params {
            let mut steps = Vec::with_capacity(4);
            steps.extend(parse.take());
            steps.push(ExtendedStep::Bind {
                portal: String::new(),
                statement: statement.clone(),
                param_formats: vec![FieldFormat::Text],
                params: values
                    .iter()
                    .map(|value| self.text_param(value))
                    .collect::<Result<_>>()?,
                result_formats: vec![FieldFormat::Text],
            });
            steps.push(ExtendedStep::Describe(ObjectKind::Portal, String::new()));
            steps.push(ExtendedStep::Execute {
                portal: String::new(),
                max_rows: 0,
            });
            let outcome = self.run_extended(steps, warnings).await?;
            let mut result = outcome.result;
            result.fields = outcome.described_fields.unwrap_or_default();
            outcomes.push(result);
        }
        Ok(outcomes)
    }

    /// Text form of a parameter, using the type its value implies.
    fn text_param(&self, value: &Value) -> Result<Option<Vec<u8>>> {
        if value.is_null() {
            return Ok(None);
        }
        let text = match value.natural_oid().and_then(|oid| self.registry.cached(oid)) {
            Some(ty) => codec::encode_text(&ty, value, &self.context.read())?,
            None => codec::encode_untyped(value).ok_or_else(|| {
                Error::Encode(format!("cannot infer the type of a {} parameter", value.kind()))
            })?,
        };
        Ok(Some(text.into_bytes()))
    }

    /// Statement bound to this connection. Nothing is sent until it runs.
    pub fn prepare(&mut self, sql: impl Into<String>) -> PreparedQuery<'_> {
        PreparedQuery::new(self, sql.into())
    }

    /// Type named `name`, e.g. `int4`, `public.mood` or `text[]`.
    pub async fn type_by_name(&mut self, name: &str) -> Result<TypeRef> {
        let ty = self.registry.resolve_name(name, &mut self.loader).await?;
        self.registry.ensure_attributes(&ty, &mut self.loader).await?;
        Ok(ty)
    }

    pub async fn type_by_oid(&mut self, oid: Oid) -> Result<TypeRef> {
        self.resolve_type(oid).await
    }

    /// Ask the server to cancel the running request. Never fails.
    pub async fn cancel(&self) {
        cancel::cancel(
            &self.info.address,
            self.key_data,
            self.opts.internal_query_timeout,
        )
        .await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(
            self.info.address.clone(),
            self.key_data,
            self.opts.internal_query_timeout,
        )
    }

    /// Receive LISTEN/NOTIFY notifications. They are dropped while unset.
    pub fn set_notification_handler<H: NotificationHandler + 'static>(&mut self, handler: H) {
        *self.notifications.lock() = Some(Box::new(handler));
    }

    pub fn clear_notification_handler(&mut self) {
        *self.notifications.lock() = None;
    }

    /// Register cleanups of server-side objects left open by dropped
    /// statements with `housekeeper`.
    pub fn set_housekeeper(&mut self, housekeeper: Arc<dyn Housekeeper>) {
        self.housekeeper = Some(housekeeper);
    }

    /// Notices of the last `query*` call.
    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.info.server
    }

    pub fn connection_info(&self) -> &ServerConnectionInfo {
        &self.info
    }

    pub fn key_data(&self) -> Option<KeyData> {
        self.key_data
    }

    /// ParameterStatus values reported during startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Submission handle of this connection's transport.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// True once the transport stopped, e.g. after a fatal error.
    pub fn is_closed(&self) -> bool {
        self.executor.is_closed()
    }

    /// Drop the caches and end the session.
    pub fn close(mut self) {
        self.cache.clear();
        self.executor.terminate();
    }

    pub(crate) fn statement_cache(&mut self) -> &mut StatementCache {
        &mut self.cache
    }

    pub(crate) fn strict_mode(&self) -> bool {
        self.opts.strict_mode
    }

    pub(crate) fn housekeeper(&self) -> Option<Arc<dyn Housekeeper>> {
        self.housekeeper.clone()
    }

    pub(crate) fn next_cursor_name(&mut self) -> String {
        self.cursor_counter += 1;
        format!("pgcore_cursor_{}", self.cursor_counter)
    }

    pub(crate) async fn simple(
        &mut self,
        sql: &str,
        warnings: &mut Warnings,
    ) -> Result<Vec<QueryOutcome>> {
        self.executor
            .query(sql)
            .wait(self.opts.query_timeout)
            .await?
            .into_result(warnings)
    }

    /// Send `steps` as one request, closing evicted statements first.
    pub(crate) async fn run_extended(
        &mut self,
        steps: Vec<ExtendedStep>,
        warnings: &mut Warnings,
    ) -> Result<ExtendedOutcome> {
        let evicted = self.cache.take_evicted();
        let steps = if evicted.is_empty() {
            steps
        } else {
            evicted
                .into_iter()
                .map(|name| ExtendedStep::Close(ObjectKind::Statement, name))
                .chain(steps)
                .collect()
        };
        self.executor
            .extended(steps)
            .wait(self.opts.query_timeout)
            .await?
            .into_result(warnings)
    }

    /// Type for `oid` with every composite it reaches fully loaded.
    pub(crate) async fn resolve_type(&mut self, oid: Oid) -> Result<TypeRef> {
        let ty = self.registry.resolve(oid, &mut self.loader).await?;
        self.registry.ensure_attributes(&ty, &mut self.loader).await?;
        Ok(ty)
    }

    /// Resolve column types, keeping the formats the server reported.
    pub(crate) async fn resolve_fields(
        &mut self,
        descriptions: &[FieldDescription],
    ) -> Result<Vec<ResultField>> {
        let mut fields = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let ty = self.resolve_type(description.type_oid).await?;
            fields.push(ResultField::new(description, ty));
        }
        Ok(fields)
    }

    /// Parse `sql` as statement `name` and resolve what the server
    /// describes. Result formats are chosen per column type.
    pub(crate) async fn describe_statement(
        &mut self,
        name: &str,
        sql: &str,
        param_oids: Vec<Oid>,
        warnings: &mut Warnings,
    ) -> Result<Description> {
        let steps = vec![
            ExtendedStep::Parse {
                name: name.to_string(),
                sql: sql.to_string(),
                param_oids,
            },
            ExtendedStep::Describe(ObjectKind::Statement, name.to_string()),
        ];
        let outcome = self.run_extended(steps, warnings).await?;

        let mut param_types = Vec::new();
        for oid in outcome.param_oids.unwrap_or_default() {
            param_types.push(self.resolve_type(oid).await?);
        }
        let mut fields = self
            .resolve_fields(&outcome.described_fields.unwrap_or_default())
            .await?;
        for field in &mut fields {
            field.format = field.type_.result_format();
        }
        Ok(Description {
            param_types,
            fields,
        })
    }

    /// Description of `key`, from the cache or an unnamed describe parsed
    /// with the key's parameter types.
    pub(crate) async fn describe(
        &mut self,
        key: &StatementCacheKey,
        warnings: &mut Warnings,
    ) -> Result<Arc<Description>> {
        if let Some(description) = self.cache.description(key) {
            return Ok(description);
        }
        let description = self
            .describe_statement("", &key.sql, key.parse_oids(), warnings)
            .await?;
        let description = Arc::new(description);
        self.cache.insert_description(key.clone(), Arc::clone(&description));
        Ok(description)
    }

    async fn result_batch(&mut self, outcome: QueryOutcome) -> Result<ResultBatch> {
        let fields = self.resolve_fields(&outcome.fields).await?;
        Ok(ResultBatch::new(
            fields,
            outcome.rows,
            outcome.command,
            outcome.rows_affected,
            Arc::clone(&self.context),
        ))
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("address", &self.info.address)
            .field("server", &self.info.server.version)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Drive the startup state machine to completion.
async fn handshake(
    mut stream: Stream,
    address: &ServerAddress,
    machine: &mut ConnectionStateMachine,
    buffer_set: &mut BufferSet,
) -> Result<Stream> {
    loop {
        match machine.step(buffer_set)? {
            Action::WriteAndReadByte => {
                stream.send(buffer_set).await?;
                let byte = stream.read_u8().await?;
                machine.set_ssl_response(byte);
            }
            Action::ReadMessage => {
                stream.read_message(buffer_set).await?;
            }
            Action::Write => {
                stream.send(buffer_set).await?;
            }
            Action::WriteAndReadMessage => {
                stream.send(buffer_set).await?;
                stream.read_message(buffer_set).await?;
            }
            Action::TlsHandshake => {
                #[cfg(feature = "tokio-tls")]
                {
                    let host = match address {
                        ServerAddress::Tcp { host, .. } => host.as_str(),
                        ServerAddress::Unix(_) => "localhost",
                    };
                    stream = stream.upgrade_to_tls(host).await?;
                }
                #[cfg(not(feature = "tokio-tls"))]
                {
                    return Err(Error::Unsupported(format!(
                        "{} requires TLS but the tokio-tls feature is not enabled",
                        address
                    )));
                }
            }
            Action::HandleAsyncMessageAndReadMessage(_) => {
                // ParameterStatus during startup is collected by the machine
                stream.read_message(buffer_set).await?;
            }
            Action::Finished => return Ok(stream),
        }
    }
}

/// Error kept for an address that failed the handshake. Server errors keep
/// their SQLSTATE; anything else becomes a connection error.
fn failover_error(address: &ServerAddress, err: Error) -> Error {
    match err {
        Error::Connection { .. } | Error::Server(_) => err,
        other => Error::connection(format!("{}: {}", address, other)),
    }
}
