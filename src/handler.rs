//! Callbacks for messages the server sends outside any request.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::SharedContext;
use crate::state::action::AsyncMessage;

/// User callback for LISTEN/NOTIFY notifications.
pub trait NotificationHandler: Send {
    fn notification(&mut self, pid: u32, channel: &str, payload: &str);
}

impl<F> NotificationHandler for F
where
    F: FnMut(u32, &str, &str) + Send,
{
    fn notification(&mut self, pid: u32, channel: &str, payload: &str) {
        self(pid, channel, payload)
    }
}

/// Handler slot shared between a connection and its transport task.
pub type NotificationSlot = Arc<Mutex<Option<Box<dyn NotificationHandler>>>>;

/// Session events reported by the transport.
pub trait Listener: Send {
    fn parameter_status_changed(&mut self, name: &str, value: &str);

    fn notification_received(&mut self, pid: u32, channel: &str, payload: &str);

    /// The transport stopped; no further callbacks follow.
    fn closed(&mut self);

    fn dispatch(&mut self, message: &AsyncMessage) {
        match message {
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => self.notification_received(*pid, channel, payload),
            AsyncMessage::ParameterChanged { name, value } => {
                self.parameter_status_changed(name, value)
            }
        }
    }
}

/// Listener of a [`crate::tokio::Conn`]: parameter changes update the
/// connection's context, notifications go to the user handler.
pub struct ConnListener {
    context: SharedContext,
    handler: NotificationSlot,
    closed: bool,
}

impl ConnListener {
    pub fn new(context: SharedContext, handler: NotificationSlot) -> Self {
        Self {
            context,
            handler,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Listener for ConnListener {
    fn parameter_status_changed(&mut self, name: &str, value: &str) {
        self.context.write().update_system_parameter(name, value);
    }

    fn notification_received(&mut self, pid: u32, channel: &str, payload: &str) {
        match self.handler.lock().as_mut() {
            Some(handler) => handler.notification(pid, channel, payload),
            None => tracing::trace!("dropping notification on {}", channel),
        }
    }

    fn closed(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::context::{Context, IntervalStyle};
    use crate::types::SharedRegistry;

    #[test]
    fn parameter_changes_reach_the_context() {
        let context = Arc::new(RwLock::new(Context::new(Arc::new(SharedRegistry::new()))));
        let mut listener = ConnListener::new(Arc::clone(&context), NotificationSlot::default());
        listener.dispatch(&AsyncMessage::ParameterChanged {
            name: "IntervalStyle".into(),
            value: "sql_standard".into(),
        });
        assert_eq!(context.read().interval_style, IntervalStyle::SqlStandard);
    }

    #[test]
    fn notifications_reach_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let context = Arc::new(RwLock::new(Context::new(Arc::new(SharedRegistry::new()))));
        let slot = NotificationSlot::default();
        let mut listener = ConnListener::new(context, Arc::clone(&slot));
        *slot.lock() = Some(Box::new(move |pid: u32, channel: &str, payload: &str| {
            sink.lock().push((pid, channel.to_string(), payload.to_string()));
        }));
        listener.dispatch(&AsyncMessage::Notification {
            pid: 42,
            channel: "jobs".into(),
            payload: "7".into(),
        });
        listener.closed();
        assert!(listener.is_closed());
        assert_eq!(seen.lock().as_slice(), &[(42, "jobs".to_string(), "7".to_string())]);
    }
}
