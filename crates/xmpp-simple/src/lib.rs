pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod jid;
pub mod negotiator;
pub mod transport;

pub use client::{Client, Outgoing};
pub use codec::{Element, Frame, Stanza, StanzaCodec};
pub use config::{
    AccountConfig, ClientConfig, ConnectionSettings, Credentials, DEFAULT_PORT,
    DEFAULT_READ_BUFFER_SIZE,
};
pub use dispatcher::{Dispatch, Dispatcher, SessionState, StanzaKind};
pub use error::{ConfigError, ConnectionError};
pub use handler::{ClientEvent, Handler};
pub use jid::Jid;
pub use negotiator::{FeaturesAction, close_stream_xml, on_features, open_stream_xml};
pub use transport::{AsyncReadAndWrite, BoxedStream, Connector, NativeConnector};
