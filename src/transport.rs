//! Streaming transports.
//!
//! A [`Transport`] opens connections; a [`Connection`] yields inbound events
//! until it closes. The WebSocket implementation is the production one; tests
//! script their own.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

/// How long a graceful close may take before the socket is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Something that happened on an open connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame.
    Text(String),
    /// A binary frame; decoded as UTF-8 text by the client if possible.
    Binary(Vec<u8>),
    /// Transport-level fault. A `Closed` event always follows.
    Error(anyhow::Error),
    /// The connection is gone.
    Closed,
}

/// One open connection.
pub trait Connection: Send + 'static {
    /// Wait for the next inbound event.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Close the connection from our side.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens connections to an endpoint.
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    type Conn = WsConnection;

    async fn connect(&self, url: &Url) -> Result<WsConnection> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(WsConnection {
            stream,
            failed: false,
        })
    }
}

/// An open WebSocket.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
}

impl Connection for WsConnection {
    async fn next_event(&mut self) -> TransportEvent {
        loop {
            if self.failed {
                return TransportEvent::Closed;
            }
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text),
                Some(Ok(Message::Binary(data))) => return TransportEvent::Binary(data),
                // tungstenite answers pings itself on the next read
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("Peer closed WebSocket: {:?}", frame);
                    return TransportEvent::Closed;
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return TransportEvent::Error(e.into());
                }
                None => return TransportEvent::Closed,
            }
        }
    }

    async fn close(&mut self) {
        if self.failed {
            return;
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, self.stream.close(None))
            .await
            .is_err()
        {
            tracing::debug!("WebSocket close timed out, dropping socket");
        }
    }
}
