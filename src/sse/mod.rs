//! Server-sent events with JSON payloads.
//!
//! [`TypedEventSource`] holds a single connection; [`ReconnectingTypedEventSource`]
//! reconnects with exponential backoff and keeps its handlers across
//! connections. Both run their connection on a dedicated worker thread.

pub mod backoff;
pub mod latest;
pub mod parser;
pub mod source;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::ReconnectOptions;
pub use latest::LatestEvents;
pub use parser::{EventParser, SseEvent};
pub use source::{
    ErrorEvent, EventStream, MessageEvent, ReadyState, ReconnectingTypedEventSource,
    TypedEventSource,
};
pub use transport::{Connection, Connector, HttpConnector};
