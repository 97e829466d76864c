//! Stream negotiation: the opening/closing stream tags, and the reply to
//! `<stream:features/>` (resource bind first, then SASL PLAIN).

use sasl::client::{Mechanism, mechanisms::Plain};
use tokio_xmpp::parsers::{
    bind::BindQuery,
    iq::Iq,
    ns,
    sasl::{Auth, Mechanism as SaslMechanism},
};

use crate::{codec::Element, jid::Jid};

pub const PLAIN: &str = "PLAIN";
pub const BIND_REQUEST_ID: &str = "bind-1";

const CLOSE_STREAM: &str = "</stream:stream>";

/// What to do about one `<stream:features/>` element.
#[derive(Debug, Clone, PartialEq)]
pub enum FeaturesAction {
    Bind(Element),
    Authenticate(Element),
    /// SASL was offered, PLAIN was not. The connection must be closed.
    NoUsableMechanism { offered: Vec<String> },
    Ignore,
}

pub fn open_stream_xml(host: &str) -> String {
    format!(
        "<stream:stream xmlns:stream='{}' xmlns='{}' to='{}' xml:lang='en' version='1.0'>",
        ns::STREAM,
        ns::JABBER_CLIENT,
        escape_attribute(host)
    )
}

pub fn close_stream_xml() -> &'static str {
    CLOSE_STREAM
}

pub fn on_features(features: &Element, jid: &Jid, password: &str) -> FeaturesAction {
    if features.get_child("bind", ns::BIND).is_some() {
        return FeaturesAction::Bind(bind_request());
    }

    let Some(mechanisms) = features.get_child("mechanisms", ns::SASL) else {
        return FeaturesAction::Ignore;
    };

    let offered: Vec<String> = mechanisms
        .children()
        .filter(|child| child.is("mechanism", ns::SASL))
        .map(|child| child.text().trim().to_owned())
        .collect();

    if offered.iter().any(|mechanism| mechanism == PLAIN) {
        FeaturesAction::Authenticate(plain_auth(jid, password))
    } else {
        FeaturesAction::NoUsableMechanism { offered }
    }
}

pub fn bind_request() -> Element {
    Iq::from_set(BIND_REQUEST_ID, BindQuery::new(None)).into()
}

/// `<auth mechanism='PLAIN'>` carrying base64(`\0username\0password`), empty authzid.
pub fn plain_auth(jid: &Jid, password: &str) -> Element {
    let mut mechanism = Plain::new(jid.local(), password);
    Auth {
        mechanism: SaslMechanism::Plain,
        data: mechanism.initial(),
    }
    .into()
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}
