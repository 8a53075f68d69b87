//! WebSocket Transport
//!
//! Sessions run over a boxed byte stream so the same code serves sockets the
//! broker accepted itself and connections upgraded by the HTTP listener.
//! Clients exchange one JSON envelope per text (or binary) frame, so the
//! stream is used as-is rather than wrapped into a byte stream.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

/// Byte stream a WebSocket session can run over
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// Server side of an upgraded client connection
pub type WsStream = WebSocketStream<BoxedIo>;

/// Wrap a connection whose upgrade handshake was already answered
pub async fn from_upgraded<S: Io + 'static>(io: S) -> WsStream {
    WebSocketStream::from_raw_socket(Box::new(io) as BoxedIo, Role::Server, None).await
}

/// Accept a WebSocket connection with path validation
pub async fn accept(
    stream: TcpStream,
    expected_path: &str,
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let expected_path = expected_path.to_string();
    let io: BoxedIo = Box::new(stream);

    tokio_tungstenite::accept_hdr_async(io, move |req: &Request, response: Response| {
        let request_path = req.uri().path();
        if request_path != expected_path {
            let mut rejection = ErrorResponse::new(Some(format!(
                "Invalid path: expected '{}', got '{}'",
                expected_path, request_path
            )));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        Ok(response)
    })
    .await
}
