//! Chat Room Client
//!
//! The async shell around `chatroom-core`: environment configuration, the
//! REST API client, the WebSocket transport, the session controller that
//! ties them together and a terminal presentation layer for the `chat`
//! binary.

pub mod api;
pub mod config;
pub mod controller;
pub mod terminal;
pub mod ws;
