//! Chat Room Client Core
//!
//! Synchronous, I/O-free building blocks of the chat client: the wire
//! protocol, the streaming-reply reducer, session persistence, input
//! classification and the small rule sets (nickname rules, weather
//! categories) the async shell relies on.

pub mod command;
pub mod identity;
pub mod markup;
pub mod protocol;
pub mod roster;
pub mod router;
pub mod session;
pub mod weather;
