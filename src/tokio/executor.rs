//! Asynchronous request submission.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::protocol::types::{FieldFormat, ObjectKind, Oid};
use crate::state::{ExtendedOutcome, ExtendedStep, QueryOutcome};

use super::worker::{Request, Response};

/// Reply of a submitted request.
///
/// Dropping it does not withdraw the request; the transport still runs it
/// and discards the reply.
#[must_use = "a pending reply does nothing unless waited on"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Response<T>>,
}

impl<T> Pending<T> {
    /// Wait for the reply. A zero `timeout` waits forever.
    ///
    /// On timeout the request keeps running on the server; only an explicit
    /// cancel request stops it.
    pub async fn wait(self, timeout: Duration) -> Result<Response<T>> {
        let received = if timeout.is_zero() {
            self.receiver.await
        } else {
            match tokio::time::timeout(timeout, self.receiver).await {
                Ok(received) => received,
                Err(_elapsed) => return Err(Error::Timeout(timeout)),
            }
        };
        match received {
            Ok(response) => Ok(response),
            Err(_closed) => Err(Error::ConnectionBroken),
        }
    }
}

/// Cloneable handle submitting requests to one connection's transport.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    sender: mpsc::UnboundedSender<Request>,
}

impl RequestExecutor {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Request>) -> Self {
        Self { sender }
    }

    /// Parse `sql` as statement `name` (empty for unnamed) and describe it.
    pub fn prepare(&self, name: &str, sql: &str, param_oids: Vec<Oid>) -> Pending<ExtendedOutcome> {
        self.extended(vec![
            ExtendedStep::Parse {
                name: name.to_string(),
                sql: sql.to_string(),
                param_oids,
            },
            ExtendedStep::Describe(ObjectKind::Statement, name.to_string()),
        ])
    }

    /// Bind `statement` to `portal` and execute it. `max_rows` of 0 fetches all.
    pub fn execute(
        &self,
        portal: &str,
        statement: &str,
        param_formats: Vec<FieldFormat>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<FieldFormat>,
        max_rows: u32,
    ) -> Pending<ExtendedOutcome> {
        self.extended(vec![
            ExtendedStep::Bind {
                portal: portal.to_string(),
                statement: statement.to_string(),
                param_formats,
                params,
                result_formats,
            },
            ExtendedStep::Execute {
                portal: portal.to_string(),
                max_rows,
            },
        ])
    }

    /// Run `sql` over the simple query protocol.
    pub fn query(&self, sql: &str) -> Pending<Vec<QueryOutcome>> {
        let (reply, receiver) = oneshot::channel();
        self.submit(Request::Simple {
            sql: sql.to_string(),
            reply: Some(reply),
        });
        Pending { receiver }
    }

    /// Queue `sql` without waiting for its outcome. Failures are only logged.
    pub fn lazy_execute(&self, sql: &str) {
        self.submit(Request::Simple {
            sql: sql.to_string(),
            reply: None,
        });
    }

    pub fn close(&self, kind: ObjectKind, name: &str) -> Pending<ExtendedOutcome> {
        self.extended(vec![ExtendedStep::Close(kind, name.to_string())])
    }

    /// Send `steps` followed by one Sync.
    pub fn extended(&self, steps: Vec<ExtendedStep>) -> Pending<ExtendedOutcome> {
        let (reply, receiver) = oneshot::channel();
        self.submit(Request::Extended {
            steps,
            reply: Some(reply),
        });
        Pending { receiver }
    }

    /// End the session after every request queued before this one.
    pub fn terminate(&self) {
        self.submit(Request::Terminate);
    }

    /// True once the transport stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Handle that does not keep the transport alive.
    pub fn downgrade(&self) -> WeakRequestExecutor {
        WeakRequestExecutor {
            sender: self.sender.downgrade(),
        }
    }

    fn submit(&self, request: Request) {
        // A stopped transport drops the request and with it the reply
        // sender, so waiters see `ConnectionBroken`.
        if self.sender.send(request).is_err() {
            tracing::debug!("request submitted to a closed connection");
        }
    }
}

/// Executor handle that lets the transport stop once every
/// [`RequestExecutor`] is gone.
#[derive(Debug, Clone)]
pub struct WeakRequestExecutor {
    sender: mpsc::WeakUnboundedSender<Request>,
}

impl WeakRequestExecutor {
    pub fn upgrade(&self) -> Option<RequestExecutor> {
        self.sender.upgrade().map(RequestExecutor::new)
    }
}
