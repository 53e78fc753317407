//! The real-time channel to the chat server.

mod endpoint;
#[cfg(test)]
pub(crate) mod test_support;
mod transport;

pub use endpoint::build_endpoint;
pub use transport::{
    CloseInfo, CloseKind, ConnectionState, TransportClient, TransportError, TransportEvent,
};
