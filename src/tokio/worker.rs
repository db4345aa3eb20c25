//! Background task that owns the socket of one connection.
//!
//! Requests arrive over a channel and run strictly in submission order.
//! Each request drives one state machine to ReadyForQuery before the next
//! one starts, so replies never interleave.

use tokio::sync::{mpsc, oneshot};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, Warning};
use crate::handler::Listener;
use crate::protocol::frontend::write_terminate;
use crate::state::{
    Action, ExtendedOutcome, ExtendedStateMachine, ExtendedStep, QueryOutcome,
    SimpleQueryStateMachine, StateMachine,
};

use super::stream::Stream;

/// Reply to one request. Warnings are delivered even when the request failed.
#[derive(Debug)]
pub struct Response<T> {
    pub result: Result<T>,
    pub warnings: Vec<Warning>,
}

impl<T> Response<T> {
    /// Split into the result, appending warnings to `chain`.
    pub fn into_result(self, chain: &mut crate::error::Warnings) -> Result<T> {
        chain.chain(self.warnings);
        self.result
    }
}

type Reply<T> = Option<oneshot::Sender<Response<T>>>;

pub(crate) enum Request {
    Simple {
        sql: String,
        reply: Reply<Vec<QueryOutcome>>,
    },
    Extended {
        steps: Vec<ExtendedStep>,
        reply: Reply<ExtendedOutcome>,
    },
    Terminate,
}

fn respond<T>(reply: Reply<T>, response: Response<T>) {
    match reply {
        // A receiver that gave up waiting is not an error.
        Some(sender) => drop(sender.send(response)),
        None => {
            if let Err(err) = &response.result {
                tracing::warn!("lazily executed request failed: {}", err);
            }
        }
    }
}

pub(crate) struct Worker {
    stream: Stream,
    buffer_set: BufferSet,
    listener: Box<dyn Listener>,
}

impl Worker {
    pub(crate) fn new(stream: Stream, buffer_set: BufferSet, listener: Box<dyn Listener>) -> Self {
        Self {
            stream,
            buffer_set,
            listener,
        }
    }

    pub(crate) async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = requests.recv().await {
            let broken = match request {
                Request::Simple { sql, reply } => {
                    let mut machine = SimpleQueryStateMachine::new(sql);
                    let result = self.drive(&mut machine).await.map(|()| machine.take_outcomes());
                    let broken = result.as_ref().is_err_and(Error::is_connection_broken);
                    let warnings = machine.take_warnings();
                    respond(reply, Response { result, warnings });
                    broken
                }
                Request::Extended { steps, reply } => {
                    let mut machine = ExtendedStateMachine::new(steps);
                    let result = self.drive(&mut machine).await.map(|()| machine.take_outcome());
                    let broken = result.as_ref().is_err_and(Error::is_connection_broken);
                    let warnings = machine.take_warnings();
                    respond(reply, Response { result, warnings });
                    broken
                }
                Request::Terminate => {
                    self.terminate().await;
                    break;
                }
            };
            if broken {
                tracing::debug!("connection broken, stopping transport");
                break;
            }
        }
        // Every handle is gone or the session ended; pending senders drop here.
        requests.close();
        self.listener.closed();
    }

    async fn terminate(&mut self) {
        write_terminate(self.buffer_set.start_write());
        if let Err(err) = self.stream.send(&self.buffer_set).await {
            tracing::debug!("terminate failed: {}", err);
        }
    }

    async fn drive<S: StateMachine>(&mut self, machine: &mut S) -> Result<()> {
        loop {
            match machine.step(&mut self.buffer_set)? {
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Write => {
                    self.stream.send(&self.buffer_set).await?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.send(&self.buffer_set).await?;
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    self.listener.dispatch(&message);
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::Protocol(
                        "Unexpected startup action in query state machine".into(),
                    ));
                }
                Action::Finished => return Ok(()),
            }
        }
    }
}
