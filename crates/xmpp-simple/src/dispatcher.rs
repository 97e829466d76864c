use std::sync::Arc;

use tokio_xmpp::parsers::ns;
use tracing::{debug, info, warn};

use crate::{
    codec::{self, Element},
    config::Credentials,
    handler::Handler,
    negotiator::{self, FeaturesAction},
};

/// The only top-level tags the client reacts to. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    Features,
    Success,
    Message,
    Iq,
}

impl StanzaKind {
    pub fn from_tag(name: &str) -> Option<Self> {
        match name {
            "features" => Some(StanzaKind::Features),
            "success" => Some(StanzaKind::Success),
            "message" => Some(StanzaKind::Message),
            "iq" => Some(StanzaKind::Iq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Negotiating,
    Authenticating,
    Authenticated,
    Binding,
    Bound,
}

/// Follow-up the connection owner has to perform for a dispatched stanza.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Send(Element),
    /// Re-send the stream header and start from a fresh codec.
    RestartStream,
    /// Close the stream; negotiation cannot continue.
    Disconnect,
    None,
}

/// Routes stanzas of one stream session. A new dispatcher is created per connect.
pub struct Dispatcher<H> {
    handler: Arc<H>,
    credentials: Credentials,
    state: SessionState,
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, credentials: Credentials) -> Self {
        Self {
            handler,
            credentials,
            state: SessionState::Negotiating,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn dispatch(&mut self, stanza: &Element) -> Dispatch {
        debug!(stanza = stanza.name(), state = ?self.state, "processing stanza");

        match StanzaKind::from_tag(stanza.name()) {
            Some(StanzaKind::Features) => self.features(stanza),
            Some(StanzaKind::Success) => self.success(),
            Some(StanzaKind::Message) => {
                self.message(stanza);
                Dispatch::None
            }
            Some(StanzaKind::Iq) => {
                self.iq(stanza);
                Dispatch::None
            }
            None => Dispatch::None,
        }
    }

    fn features(&mut self, features: &Element) -> Dispatch {
        match negotiator::on_features(
            features,
            self.credentials.jid(),
            self.credentials.password(),
        ) {
            FeaturesAction::Bind(request) => {
                debug!("server offers resource binding");
                self.state = SessionState::Binding;
                Dispatch::Send(request)
            }
            FeaturesAction::Authenticate(auth) => {
                debug!(mechanism = negotiator::PLAIN, "authenticating");
                self.state = SessionState::Authenticating;
                Dispatch::Send(auth)
            }
            FeaturesAction::NoUsableMechanism { offered } => {
                info!(?offered, "no authentication method provided");
                Dispatch::Disconnect
            }
            FeaturesAction::Ignore => Dispatch::None,
        }
    }

    fn success(&mut self) -> Dispatch {
        if self.state != SessionState::Authenticating {
            warn!(state = ?self.state, "ignoring SASL success without a pending auth");
            return Dispatch::None;
        }

        debug!("SASL authentication succeeded, restarting stream");
        self.state = SessionState::Authenticated;
        Dispatch::RestartStream
    }

    fn message(&self, stanza: &Element) {
        match codec::serialize(stanza) {
            Ok(xml) => self.handler.on_message(&xml),
            Err(error) => warn!(%error, "dropping message that failed to serialize"),
        }
    }

    fn iq(&mut self, stanza: &Element) {
        if stanza.get_child("bind", ns::BIND).is_none() {
            return;
        }

        if self.state != SessionState::Binding {
            warn!(state = ?self.state, "ignoring bind result without a pending bind request");
            return;
        }

        debug!("Connected!");
        self.state = SessionState::Bound;
        self.handler.on_connected();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use tracing_test::traced_test;

    use super::*;
    use crate::handler::ClientEvent;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingHandler {
        fn events(&self) -> Vec<ClientEvent> {
            self.events.lock().expect("events lock").clone()
        }
    }

    impl Handler for RecordingHandler {
        fn on_message(&self, stanza_xml: &str) {
            self.events
                .lock()
                .expect("events lock")
                .push(ClientEvent::Message(stanza_xml.to_owned()));
        }

        fn on_connected(&self) {
            self.events
                .lock()
                .expect("events lock")
                .push(ClientEvent::Connected);
        }
    }

    fn dispatcher() -> (Dispatcher<RecordingHandler>, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let credentials =
            Credentials::new("alice", "secret", "example.com", 5223).expect("valid credentials");
        (Dispatcher::new(Arc::clone(&handler), credentials), handler)
    }

    fn element(xml: &str) -> Element {
        xml.parse().expect("valid element")
    }

    fn sasl_features(mechanism: &str) -> Element {
        element(&format!(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>{mechanism}</mechanism></mechanisms>\
             </stream:features>"
        ))
    }

    fn bind_features() -> Element {
        element(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>",
        )
    }

    fn success() -> Element {
        element("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
    }

    fn bind_result() -> Element {
        element(
            "<iq xmlns='jabber:client' type='result' id='bind-1'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>alice@example.com/abc</jid></bind></iq>",
        )
    }

    #[test]
    fn routes_only_known_tags() {
        assert_eq!(StanzaKind::from_tag("features"), Some(StanzaKind::Features));
        assert_eq!(StanzaKind::from_tag("success"), Some(StanzaKind::Success));
        assert_eq!(StanzaKind::from_tag("message"), Some(StanzaKind::Message));
        assert_eq!(StanzaKind::from_tag("iq"), Some(StanzaKind::Iq));
        assert_eq!(StanzaKind::from_tag("presence"), None);
        assert_eq!(StanzaKind::from_tag("failure"), None);
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let (mut dispatcher, handler) = dispatcher();
        let action = dispatcher.dispatch(&element("<presence xmlns='jabber:client'/>"));
        assert_eq!(action, Dispatch::None);
        assert_eq!(dispatcher.state(), SessionState::Negotiating);
        assert!(handler.events().is_empty());
    }

    #[test]
    fn full_negotiation_sequence_reaches_bound() {
        let (mut dispatcher, handler) = dispatcher();

        assert_matches!(
            dispatcher.dispatch(&sasl_features("PLAIN")),
            Dispatch::Send(auth) if auth.name() == "auth"
        );
        assert_eq!(dispatcher.state(), SessionState::Authenticating);

        assert_eq!(dispatcher.dispatch(&success()), Dispatch::RestartStream);
        assert_eq!(dispatcher.state(), SessionState::Authenticated);

        assert_matches!(
            dispatcher.dispatch(&bind_features()),
            Dispatch::Send(iq) if iq.name() == "iq"
        );
        assert_eq!(dispatcher.state(), SessionState::Binding);

        assert_eq!(dispatcher.dispatch(&bind_result()), Dispatch::None);
        assert_eq!(dispatcher.state(), SessionState::Bound);
        assert_eq!(handler.events(), vec![ClientEvent::Connected]);
    }

    #[test]
    fn bind_result_fires_connected_exactly_once() {
        let (mut dispatcher, handler) = dispatcher();
        dispatcher.dispatch(&bind_features());

        dispatcher.dispatch(&bind_result());
        dispatcher.dispatch(&bind_result());

        assert_eq!(handler.events(), vec![ClientEvent::Connected]);
    }

    #[test]
    fn other_iq_fires_nothing() {
        let (mut dispatcher, handler) = dispatcher();
        dispatcher.dispatch(&bind_features());

        let ping = element(
            "<iq xmlns='jabber:client' type='get' id='ping-1'><ping xmlns='urn:xmpp:ping'/></iq>",
        );
        assert_eq!(dispatcher.dispatch(&ping), Dispatch::None);
        assert_eq!(dispatcher.state(), SessionState::Binding);
        assert!(handler.events().is_empty());
    }

    #[test]
    fn bind_result_before_bind_request_is_ignored() {
        let (mut dispatcher, handler) = dispatcher();
        dispatcher.dispatch(&bind_result());
        assert_eq!(dispatcher.state(), SessionState::Negotiating);
        assert!(handler.events().is_empty());
    }

    #[test]
    fn success_without_pending_auth_is_ignored() {
        let (mut dispatcher, _handler) = dispatcher();
        assert_eq!(dispatcher.dispatch(&success()), Dispatch::None);
        assert_eq!(dispatcher.state(), SessionState::Negotiating);
    }

    #[test]
    fn missing_plain_requests_disconnect() {
        let (mut dispatcher, handler) = dispatcher();
        assert_eq!(
            dispatcher.dispatch(&sasl_features("SCRAM-SHA-1")),
            Dispatch::Disconnect
        );
        assert!(handler.events().is_empty());
    }

    #[test]
    #[traced_test]
    fn missing_plain_is_logged() {
        let (mut dispatcher, _handler) = dispatcher();
        dispatcher.dispatch(&sasl_features("EXTERNAL"));
        assert!(logs_contain("no authentication method provided"));
    }

    #[test]
    fn empty_features_do_nothing() {
        let (mut dispatcher, _handler) = dispatcher();
        let features = element("<stream:features xmlns:stream='http://etherx.jabber.org/streams'/>");
        assert_eq!(dispatcher.dispatch(&features), Dispatch::None);
        assert_eq!(dispatcher.state(), SessionState::Negotiating);
    }

    #[test]
    fn message_is_forwarded_as_its_serialization() {
        let (mut dispatcher, handler) = dispatcher();
        let message = element(
            "<message xmlns='jabber:client' from='bob@example.com' to='alice@example.com' type='chat'>\
             <body>hello</body></message>",
        );

        assert_eq!(dispatcher.dispatch(&message), Dispatch::None);

        let expected = codec::serialize(&message).expect("serialize");
        assert_eq!(handler.events(), vec![ClientEvent::Message(expected)]);
    }

    #[test]
    fn messages_are_forwarded_in_any_state() {
        let (mut dispatcher, handler) = dispatcher();
        dispatcher.dispatch(&element("<message xmlns='jabber:client'/>"));
        assert_eq!(handler.events().len(), 1);
    }
}
