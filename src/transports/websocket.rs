//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] translates between the Gridlock text-message
//! protocol and WebSocket frames. The server side wraps an accepted TCP
//! stream via [`accept`](WebSocketTransport::accept); the client side
//! (probes, tools, tests) dials out via [`connect`](WebSocketTransport::connect).
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), gridlock_server::SessionError> {
//! use gridlock_server::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://localhost:3000/ws").await?;
//! transport.send(r#"{"type":"Veto"}"#.to_string()).await?;
//!
//! if let Some(Ok(reply)) = transport.recv().await {
//!     println!("server said: {reply}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::SessionError;
use crate::transport::Transport;

/// Underlying stream type of an outbound (dialed) connection.
///
/// TLS is handled transparently: `wss://` URLs work without extra setup.
pub type ClientStream = tokio_tungstenite::MaybeTlsStream<TcpStream>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// Generic over the underlying byte stream `S`: accepted server connections
/// run over a plain [`TcpStream`], dialed connections over
/// [`ClientStream`], and tests can use an in-memory duplex stream.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before
/// completion neither consumes nor loses messages, so it is safe inside
/// `tokio::select!` — which is exactly where the registry's connection
/// driver polls it.
#[derive(Debug)]
pub struct WebSocketTransport<S = TcpStream> {
    stream: WebSocketStream<S>,
    closed: bool,
}

impl WebSocketTransport<TcpStream> {
    /// Perform the server side of the WebSocket handshake on an accepted
    /// TCP stream.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the handshake fails.
    pub async fn accept(stream: TcpStream) -> Result<Self, SessionError> {
        let peer = stream.peer_addr().ok();
        let stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(ws_io_error)?;
        tracing::debug!(peer = ?peer, "WebSocket connection accepted");
        Ok(Self::from_stream(stream))
    }
}

impl WebSocketTransport<ClientStream> {
    /// Dial a WebSocket server. Supports `ws://` and `wss://` URLs.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the URL is invalid or the
    /// connection cannot be established. The [`ErrorKind`](std::io::ErrorKind)
    /// of an underlying I/O error is preserved.
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        tracing::debug!(url = %url, "dialing WebSocket server");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(ws_io_error)?;
        tracing::info!(url = %url, "WebSocket connection established");
        Ok(Self::from_stream(stream))
    }

    /// Like [`connect`](Self::connect) but failing with
    /// [`SessionError::Timeout`] when the deadline elapses.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`], or anything [`connect`](Self::connect)
    /// may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, SessionError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| SessionError::Timeout)?
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-established WebSocket stream.
    ///
    /// Useful for custom TLS setups, HTTP-upgrade integration, or in-memory
    /// streams in tests.
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

/// Map a tungstenite error to [`SessionError::Io`], keeping the
/// [`ErrorKind`](std::io::ErrorKind) when there is one underneath.
fn ws_io_error(err: tokio_tungstenite::tungstenite::Error) -> SessionError {
    let kind = match &err {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    SessionError::Io(std::io::Error::new(kind, err))
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    return Some(Err(SessionError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match frame {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues pong replies on its own.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                // Never produced by the read half; kept for exhaustiveness.
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport<TcpStream>>();
        assert_send::<WebSocketTransport<ClientStream>>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        assert!(matches!(result.unwrap_err(), SessionError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        assert!(matches!(result.unwrap_err(), SessionError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address guarantees the deadline fires first.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result.unwrap_err(), SessionError::Timeout));
    }

    /// Accept one TCP connection, perform the server handshake and hand the
    /// transport to `handler`. Returns the URL to dial.
    async fn start_accepting<F, Fut>(handler: F) -> String
    where
        F: FnOnce(WebSocketTransport<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let transport = WebSocketTransport::accept(tcp).await.unwrap();
            handler(transport).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn accepted_and_dialed_transports_exchange_text() {
        let url = start_accepting(|mut server| async move {
            server.send("hello".to_string()).await.unwrap();
            let echo = server.recv().await.unwrap().unwrap();
            server.send(echo).await.unwrap();
            server.close().await.unwrap();
        })
        .await;

        let mut client = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), "hello");

        client.send("echo_me".to_string()).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), "echo_me");

        // Server closed after the echo.
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_returns_none_on_close_frame() {
        let url = start_accepting(|mut server| async move {
            server.close().await.unwrap();
        })
        .await;

        let mut client = WebSocketTransport::connect(&url).await.unwrap();
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_accepting(|mut server| async move {
            while server.recv().await.is_some() {}
        })
        .await;

        let mut client = WebSocketTransport::connect(&url).await.unwrap();
        client.close().await.unwrap();

        let err = client.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url = start_accepting(|mut server| async move {
            while server.recv().await.is_some() {}
        })
        .await;

        let mut client = WebSocketTransport::connect(&url).await.unwrap();
        client.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn recv_after_close_does_not_hang() {
        let url = start_accepting(|mut server| async move {
            while server.recv().await.is_some() {}
        })
        .await;

        let mut client = WebSocketTransport::connect(&url).await.unwrap();
        client.close().await.unwrap();

        match client.recv().await {
            None | Some(Err(_)) => {}
            Some(Ok(msg)) => panic!("expected None or error after close, got Ok({msg:?})"),
        }
    }
}
