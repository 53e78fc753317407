//! Manages the WebSocket connection to a chat server.
//!
//! Each successful `connect` spawns a writer task draining an outbound
//! channel into the socket and a reader task decoding frames into
//! [`TransportEvent`]s. Connections are numbered; once `disconnect` or a
//! newer `connect` moves the number on, an older connection can no longer
//! touch the shared state or emit events.

use super::build_endpoint;
use chatroom_core::protocol::{ClientFrame, InboundEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid server address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("a connection is already open or in progress")]
    Busy,
    #[error("handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The server closed with `1000`.
    Normal,
    /// The server rejected us with `1008`, e.g. a duplicate nickname.
    PolicyViolation,
    /// Any other close code, a network error or a vanished peer.
    Abnormal,
    /// The server sent a frame we could not decode.
    Protocol,
    /// We called `disconnect`.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
    pub kind: CloseKind,
}

impl CloseInfo {
    fn from_frame(frame: Option<CloseFrame>) -> Self {
        let Some(frame) = frame else {
            return Self {
                code: None,
                reason: String::new(),
                kind: CloseKind::Abnormal,
            };
        };
        let kind = match frame.code {
            CloseCode::Normal => CloseKind::Normal,
            CloseCode::Policy => CloseKind::PolicyViolation,
            _ => CloseKind::Abnormal,
        };
        Self {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.to_string(),
            kind,
        }
    }

    fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
            kind: CloseKind::Abnormal,
        }
    }

    fn local() -> Self {
        Self {
            code: Some(u16::from(CloseCode::Normal)),
            reason: String::new(),
            kind: CloseKind::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed(CloseInfo),
}

impl ConnectionState {
    fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Delivered to the single receiver returned by `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(InboundEvent),
    /// Always the last event of a connection.
    Closed(CloseInfo),
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    epoch: AtomicU64,
}

impl Shared {
    /// Applies `next` only while `epoch` is still the live connection.
    fn transition(&self, epoch: u64, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            *state = next;
            true
        })
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

/// Resets a half-open attempt whose `connect` future was dropped.
struct PendingConnect<'a> {
    shared: &'a Shared,
    epoch: u64,
    armed: bool,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .transition(self.epoch, ConnectionState::Disconnected);
        }
    }
}

pub struct TransportClient {
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl Default for TransportClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClient {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state,
                epoch: AtomicU64::new(0),
            }),
            outbound: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Opens a connection to `server` as `identity`.
    ///
    /// Fails with [`TransportError::Busy`] while another connection is
    /// connecting or open. The returned receiver yields every decoded frame
    /// followed by exactly one `Closed`, unless `disconnect` is called first.
    #[instrument(skip(self))]
    pub async fn connect(
        &mut self,
        server: &str,
        identity: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let url = build_endpoint(server, identity)?;

        let mut epoch = 0;
        let started = self.shared.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ConnectionState::Connecting;
            true
        });
        if !started {
            return Err(TransportError::Busy);
        }
        let mut pending = PendingConnect {
            shared: &self.shared,
            epoch,
            armed: true,
        };

        info!(%url, "Connecting");
        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                pending.armed = false;
                self.shared.transition(
                    epoch,
                    ConnectionState::Closed(CloseInfo::abnormal(e.to_string())),
                );
                return Err(TransportError::Handshake(e));
            }
        };
        pending.armed = false;

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.outbound = Some(out_tx.clone());
        self.shared.transition(epoch, ConnectionState::Open);
        info!("Connection open");

        let span = info_span!("ws_connection", epoch);

        tokio::spawn(
            async move {
                while let Some(message) = out_rx.recv().await {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        debug!(error = %e, "Writer stopped");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
            }
            .instrument(span.clone()),
        );

        let shared = Arc::clone(&self.shared);
        tokio::spawn(
            async move {
                let (info, farewell) = loop {
                    match stream.next().await {
                        Some(Ok(Message::Text(text))) => match InboundEvent::from_json(text.as_str()) {
                            Ok(event) => {
                                if shared.is_current(epoch) {
                                    let _ = event_tx.send(TransportEvent::Frame(event));
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Malformed frame, closing connection");
                                let info = CloseInfo {
                                    code: Some(u16::from(CloseCode::Unsupported)),
                                    reason: e.to_string(),
                                    kind: CloseKind::Protocol,
                                };
                                let farewell = CloseFrame {
                                    code: CloseCode::Unsupported,
                                    reason: "malformed frame".into(),
                                };
                                break (info, Some(farewell));
                            }
                        },
                        Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame"),
                        Some(Ok(Message::Close(frame))) => {
                            break (CloseInfo::from_frame(frame), None);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break (CloseInfo::abnormal(e.to_string()), None),
                        None => {
                            break (CloseInfo::abnormal("connection dropped"), None);
                        }
                    }
                };

                // Lets the writer answer the close handshake and exit.
                let _ = out_tx.send(Message::Close(farewell));

                if shared.transition(epoch, ConnectionState::Closed(info.clone())) {
                    info!(code = ?info.code, reason = %info.reason, kind = ?info.kind, "Connection closed");
                    let _ = event_tx.send(TransportEvent::Closed(info));
                }
            }
            .instrument(span),
        );

        Ok(event_rx)
    }

    /// Queues `frame` if the connection is open. Returns whether it was queued.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        if *self.shared.state.borrow() != ConnectionState::Open {
            debug!(kind = frame.kind(), "Not connected, dropping frame");
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode frame");
                return false;
            }
        };
        outbound.send(Message::Text(text.into())).is_ok()
    }

    /// Closes the current connection, if any. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        let closed = self.shared.state.send_if_modified(|state| {
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            if !state.is_active() {
                return false;
            }
            *state = ConnectionState::Closed(CloseInfo::local());
            true
        });

        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })));
        }
        if closed {
            info!("Disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{next_text, serve_once};
    use chatroom_core::protocol::FrameKind;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Option<TransportEvent> {
        timeout(WAIT, rx.recv()).await.expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_connect_sends_identity_and_delivers_frames() {
        let (address, server) = serve_once(|uri, mut ws| async move {
            assert_eq!(uri, "/ws?nickname=alice");
            ws.send(Message::Text(
                r#"{"type":"system","content":"alice 加入了聊天室","online_users":["alice"]}"#.into(),
            ))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        })
        .await;

        let mut client = TransportClient::new();
        let mut events = client.connect(&address, "alice").await.unwrap();
        assert_eq!(client.state(), ConnectionState::Open);

        match next_event(&mut events).await {
            Some(TransportEvent::Frame(InboundEvent::System(system))) => {
                assert_eq!(system.online_users, Some(vec!["alice".to_string()]));
            }
            other => panic!("unexpected event {:?}", other),
        }

        client.disconnect();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_requires_open_connection() {
        let client = TransportClient::new();
        assert!(!client.send(&ClientFrame::message(FrameKind::Chat, "hello")));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_transmits_exactly_one_frame() {
        let (received_tx, mut received_rx) = mpsc::unbounded_channel();
        let (address, server) = serve_once(move |_, mut ws| async move {
            while let Some(text) = next_text(&mut ws).await {
                received_tx.send(text).unwrap();
            }
        })
        .await;

        let mut client = TransportClient::new();
        let _events = client.connect(&address, "alice").await.unwrap();
        assert!(client.send(&ClientFrame::message(FrameKind::Command, "/help")));

        let text = timeout(WAIT, received_rx.recv()).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["content"], "/help");

        client.disconnect();
        server.await.unwrap();
        assert!(received_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_policy_violation_close_is_reported() {
        let (address, server) = serve_once(|_, mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "duplicate nickname".into(),
            }))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        })
        .await;

        let mut client = TransportClient::new();
        let mut events = client.connect(&address, "alice").await.unwrap();

        let expected = CloseInfo {
            code: Some(1008),
            reason: "duplicate nickname".to_string(),
            kind: CloseKind::PolicyViolation,
        };
        assert_eq!(
            next_event(&mut events).await,
            Some(TransportEvent::Closed(expected.clone()))
        );
        assert_eq!(next_event(&mut events).await, None);
        assert_eq!(client.state(), ConnectionState::Closed(expected));
        assert!(!client.send(&ClientFrame::message(FrameKind::Chat, "late")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let (close_tx, mut close_rx) = mpsc::unbounded_channel();
        let (address, server) = serve_once(move |_, mut ws| async move {
            ws.send(Message::Text("{broken".into())).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(Some(frame)) = message {
                    close_tx.send(u16::from(frame.code)).unwrap();
                }
            }
        })
        .await;

        let mut client = TransportClient::new();
        let mut events = client.connect(&address, "alice").await.unwrap();

        match next_event(&mut events).await {
            Some(TransportEvent::Closed(info)) => {
                assert_eq!(info.kind, CloseKind::Protocol);
                assert_eq!(info.code, Some(1003));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(timeout(WAIT, close_rx.recv()).await.unwrap(), Some(1003));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected_while_open() {
        let (address, server) = serve_once(|_, mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let mut client = TransportClient::new();
        let _events = client.connect(&address, "alice").await.unwrap();
        assert!(matches!(
            client.connect(&address, "alice").await,
            Err(TransportError::Busy)
        ));

        client.disconnect();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_silent() {
        let (address, server) = serve_once(|_, mut ws| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let mut client = TransportClient::new();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let mut events = client.connect(&address, "alice").await.unwrap();
        client.disconnect();
        client.disconnect();

        match client.state() {
            ConnectionState::Closed(info) => assert_eq!(info.kind, CloseKind::Local),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(next_event(&mut events).await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_handshake_leaves_closed_state() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut client = TransportClient::new();
        let err = client.connect(&address, "alice").await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
        assert!(matches!(client.state(), ConnectionState::Closed(_)));

        // A closed transport may connect again.
        assert!(matches!(
            client.connect(&address, "alice").await,
            Err(TransportError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_address_leaves_state_untouched() {
        let mut client = TransportClient::new();
        assert!(matches!(
            client.connect("nonsense", "alice").await,
            Err(TransportError::InvalidAddress { .. })
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
