//! Loopback WebSocket server for transport and controller tests.

use futures_util::StreamExt;
use std::future::Future;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

pub(crate) type ServerSocket = WebSocketStream<TcpStream>;

/// Accepts a single client and runs `script` with its request URI and socket.
/// Returns the `http://` address to connect to.
pub(crate) async fn serve_once<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(String, ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let record_uri =
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                uri = request.uri().to_string();
                Ok(response)
            };
        let socket = accept_hdr_async(stream, record_uri).await.unwrap();
        script(uri, socket).await;
    });

    (address, handle)
}

/// Next text frame from the client, or `None` once it closes.
pub(crate) async fn next_text(socket: &mut ServerSocket) -> Option<String> {
    loop {
        match socket.next().await? {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}
