//! Connection setup, command writer and frame reader
//!
//! The WebSocket is split after the handshake: the write half lives in a
//! spawned task fed by an unbounded channel so `send_command` never waits,
//! and the read half stays with whichever cadence consumes the frames.

use super::command::{Command, CommandSink};
use super::{ChannelError, StreamKind};
use async_tungstenite::WebSocketStream;
use async_tungstenite::tokio::{TokioAdapter, client_async};
use async_tungstenite::tungstenite::Message;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

type WsStream = WebSocketStream<TokioAdapter<TcpStream>>;

/// Handshake path for a stream opened at `unix_seconds`
pub fn handshake_path(unix_seconds: i64, kind: StreamKind) -> String {
    format!("/{}/{}", unix_seconds, kind.path_segment())
}

/// One open server stream
pub struct ChannelSession {
    pub commands: CommandSender,
    pub frames: FrameReader,
}

/// Open a stream of the given kind on `host:port`
pub async fn connect(host: &str, port: u16, kind: StreamKind) -> Result<ChannelSession, ChannelError> {
    let addr = format!("{}:{}", host, port);

    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|source| ChannelError::Connect {
            kind,
            addr: addr.clone(),
            source,
        })?;
    tcp.set_nodelay(true).ok();

    let path = handshake_path(jiff::Timestamp::now().as_second(), kind);
    let url = format!("ws://{}{}", addr, path);

    let (ws, _response) = client_async(url.as_str(), tcp)
        .await
        .map_err(|source| ChannelError::Handshake {
            kind,
            addr: addr.clone(),
            source,
        })?;

    debug!(%kind, %path, "handshake complete");
    Ok(ChannelSession::from_stream(kind, ws))
}

impl ChannelSession {
    pub fn into_parts(self) -> (CommandSender, FrameReader) {
        (self.commands, self.frames)
    }

    fn from_stream(kind: StreamKind, ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_commands(kind, sink, rx));

        Self {
            commands: CommandSender { kind, tx },
            frames: FrameReader { kind, stream },
        }
    }
}

async fn write_commands(
    kind: StreamKind,
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!(%kind, "command writer stopped: {}", e);
            return;
        }
    }
    // All senders dropped: close politely
    sink.close().await.ok();
}

/// Cloneable, non-blocking command handle for one channel
#[derive(Clone)]
pub struct CommandSender {
    kind: StreamKind,
    tx: mpsc::UnboundedSender<String>,
}

impl CommandSink for CommandSender {
    fn send_command(&self, command: &Command) {
        let text = command.to_string();
        debug!(kind = %self.kind, "-> {}", text);
        if self.tx.send(text).is_err() {
            debug!(kind = %self.kind, "command dropped, writer gone");
        }
    }
}

/// Read half of one channel
pub struct FrameReader {
    kind: StreamKind,
    stream: SplitStream<WsStream>,
}

impl FrameReader {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Wait for the next frame
    ///
    /// Returns `Ok(None)` for anything that is not binary data (text, ping,
    /// pong) so callers can simply loop.
    pub async fn receive_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        match self.stream.next().await {
            Some(Ok(Message::Binary(data))) => Ok(Some(data)),
            Some(Ok(Message::Close(frame))) => Err(ChannelError::StreamClosed {
                kind: self.kind,
                reason: frame
                    .map(|f| format!("close frame {}: {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "close frame".to_string()),
            }),
            Some(Ok(other)) => {
                trace!(kind = %self.kind, "ignoring non-data message ({} bytes)", other.len());
                Ok(None)
            }
            Some(Err(e)) => Err(ChannelError::StreamClosed {
                kind: self.kind,
                reason: e.to_string(),
            }),
            None => Err(ChannelError::StreamClosed {
                kind: self.kind,
                reason: "connection ended".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_tungstenite::tokio::accept_hdr_async;
    use async_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[test]
    fn test_handshake_path() {
        assert_eq!(handshake_path(1700000000, StreamKind::Waterfall), "/1700000000/W/F");
        assert_eq!(handshake_path(42, StreamKind::Audio), "/42/SND");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, StreamKind::Audio).await.err().unwrap();
        assert!(matches!(err, ChannelError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_loopback_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (path_tx, path_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path_tx.send(req.uri().path().to_string()).ok();
                Ok(resp)
            };
            let mut ws = accept_hdr_async(tcp, callback).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            assert_eq!(first, Message::Text("SET keepalive".to_string()));

            ws.send(Message::Text("MSG hello".to_string())).await.unwrap();
            ws.send(Message::Binary(b"SND-payload".to_vec())).await.unwrap();
            ws.close(None).await.ok();
        });

        let session = connect("127.0.0.1", port, StreamKind::Audio).await.unwrap();
        let (commands, mut frames) = session.into_parts();
        assert_eq!(frames.kind(), StreamKind::Audio);
        commands.send_command(&Command::Keepalive);

        let path = path_rx.await.unwrap();
        assert!(path.ends_with("/SND"), "unexpected path {}", path);

        assert_eq!(frames.receive_frame().await.unwrap(), None);
        assert_eq!(frames.receive_frame().await.unwrap(), Some(b"SND-payload".to_vec()));

        let closed = loop {
            match frames.receive_frame().await {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(closed, ChannelError::StreamClosed { .. }));

        server.await.unwrap();
    }
}
