use std::sync::Arc;

use tokio::sync::mpsc;

/// Receives stanza and life-cycle notifications from a [`Client`](crate::Client).
///
/// Every method defaults to a no-op; implement only what you need. Callbacks run
/// on the read loop task, so they should hand work off rather than block.
///
/// Callbacks are synchronous and get no client handle. To answer a stanza, send
/// the event to a task that owns a clone of the [`Client`](crate::Client) (the
/// `mpsc::UnboundedSender<ClientEvent>` impl does this) and call `write_data`
/// there. Writes awaited one after another from that task reach the transport
/// in order; writes from separately spawned tasks are not ordered.
pub trait Handler: Send + Sync + 'static {
    /// A `<message/>` arrived. `stanza_xml` is its serialized form.
    fn on_message(&self, _stanza_xml: &str) {}

    /// Resource binding completed; the session is usable.
    fn on_connected(&self) {}

    /// The peer closed the stream cleanly. No reconnect follows.
    fn on_disconnected(&self) {}

    /// The connection failed and a reconnect is starting.
    fn on_reconnecting(&self) {}
}

impl Handler for () {}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn on_message(&self, stanza_xml: &str) {
        (**self).on_message(stanza_xml);
    }

    fn on_connected(&self) {
        (**self).on_connected();
    }

    fn on_disconnected(&self) {
        (**self).on_disconnected();
    }

    fn on_reconnecting(&self) {
        (**self).on_reconnecting();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(String),
    Connected,
    Disconnected,
    Reconnecting,
}

/// Forwards every callback into a channel. A dropped receiver is ignored.
impl Handler for mpsc::UnboundedSender<ClientEvent> {
    fn on_message(&self, stanza_xml: &str) {
        let _ = self.send(ClientEvent::Message(stanza_xml.to_owned()));
    }

    fn on_connected(&self) {
        let _ = self.send(ClientEvent::Connected);
    }

    fn on_disconnected(&self) {
        let _ = self.send(ClientEvent::Disconnected);
    }

    fn on_reconnecting(&self) {
        let _ = self.send(ClientEvent::Reconnecting);
    }
}
