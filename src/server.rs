//! # Wyoming Listener
//!
//! Accepts client connections on a TCP or Unix socket and runs one
//! [`SessionHandler`] per connection on its own task.
//!
//! ## Connection lifecycle:
//! 1. Accept, create a session and a `session` tracing span
//! 2. Read events until the client closes the stream
//! 3. Write each reply as soon as the handler produces it
//! 4. A malformed frame ends that connection only; other sessions keep running

use crate::error::{WyomingError, WyomingResult};
use crate::handler::{ServerContext, SessionHandler};
use crate::protocol::{read_event, write_event, FrameLimits};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tracing::Instrument;

/// Listen address, `tcp://host:port` or `unix://path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUri {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for ServerUri {
    type Err = WyomingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| WyomingError::Config(format!("missing port in {}", s)))?;
            if host.is_empty() {
                return Err(WyomingError::Config(format!("missing host in {}", s)));
            }
            port.parse::<u16>()
                .map_err(|_| WyomingError::Config(format!("invalid port '{}'", port)))?;
            return Ok(ServerUri::Tcp(addr.to_string()));
        }

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(WyomingError::Config("empty unix socket path".to_string()));
            }
            return Ok(ServerUri::Unix(PathBuf::from(path)));
        }

        Err(WyomingError::Config(format!(
            "unsupported scheme in '{}' (expected tcp:// or unix://)",
            s
        )))
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerUri::Tcp(addr) => write!(f, "tcp://{}", addr),
            ServerUri::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

pub struct WyomingServer {
    ctx: Arc<ServerContext>,
    limits: FrameLimits,
}

impl WyomingServer {
    pub fn new(ctx: Arc<ServerContext>, limits: FrameLimits) -> Self {
        Self { ctx, limits }
    }

    /// Accept connections on `uri` until `shutdown` completes.
    ///
    /// A leftover Unix socket file is removed before binding and again on
    /// shutdown. Sessions already running are not waited for.
    pub async fn run<F>(&self, uri: &ServerUri, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        match uri {
            ServerUri::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                tracing::info!(uri = %uri, local_addr = ?listener.local_addr().ok(), "Listening");
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                let _ = stream.set_nodelay(true);
                                self.spawn_connection(stream, peer.to_string());
                            }
                            Err(e) => tracing::warn!(error = %e, "Accept failed"),
                        },
                        _ = &mut shutdown => break,
                    }
                }
            }
            ServerUri::Unix(path) => {
                if path.exists() {
                    tracing::debug!(path = %path.display(), "Removing stale socket");
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                tracing::info!(uri = %uri, "Listening");
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => {
                                self.spawn_connection(stream, path.display().to_string())
                            }
                            Err(e) => tracing::warn!(error = %e, "Accept failed"),
                        },
                        _ = &mut shutdown => break,
                    }
                }
                let _ = std::fs::remove_file(path);
            }
        }

        tracing::info!("Listener stopped");
        Ok(())
    }

    fn spawn_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let limits = self.limits;

        tokio::spawn(async move {
            let handler = SessionHandler::new(ctx.clone());
            let span = tracing::info_span!("session", id = %handler.session_id(), peer = %peer);

            async move {
                match serve_connection(stream, handler, limits).await {
                    Ok(()) => {}
                    Err(e @ WyomingError::Protocol(_)) => {
                        ctx.state.record_protocol_error();
                        tracing::warn!(error = %e, "Closing connection after malformed frame");
                    }
                    Err(e) => tracing::debug!(error = %e, "Connection ended with error"),
                }
            }
            .instrument(span)
            .await
        });
    }
}

/// Drive one session over `stream` until the client disconnects.
///
/// Replies are flushed one at a time, in the order their requests arrived.
pub async fn serve_connection<S>(
    stream: S,
    mut handler: SessionHandler,
    limits: FrameLimits,
) -> WyomingResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    tracing::info!("Client connected");

    while let Some(event) = read_event(&mut reader, limits).await? {
        tracing::trace!(
            event_type = %event.event_type,
            payload_bytes = event.payload_len(),
            "Received event"
        );
        if let Some(reply) = handler.handle_event(event).await {
            tracing::trace!(event_type = %reply.event_type, "Sending event");
            write_event(&mut write_half, &reply).await?;
        }
    }

    tracing::info!("Client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::{fixture, Fixture};
    use crate::protocol::event::Event;
    use crate::protocol::messages::{
        AudioChunk, AudioStart, AudioStop, Describe, Eventable, Ping, Transcript,
    };
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    const LIMITS: FrameLimits = FrameLimits {
        max_header_bytes: 64 * 1024,
        max_block_bytes: 1024 * 1024,
    };

    fn spawn_session(
        fx: &Fixture,
        stream: tokio::io::DuplexStream,
    ) -> tokio::task::JoinHandle<WyomingResult<()>> {
        tokio::spawn(serve_connection(stream, SessionHandler::new(fx.ctx.clone()), LIMITS))
    }

    #[test]
    fn test_parse_uris() {
        assert_eq!(
            "tcp://0.0.0.0:10300".parse::<ServerUri>().unwrap(),
            ServerUri::Tcp("0.0.0.0:10300".to_string())
        );
        assert_eq!(
            "unix:///run/whisper.sock".parse::<ServerUri>().unwrap(),
            ServerUri::Unix(PathBuf::from("/run/whisper.sock"))
        );
        assert_eq!(
            "tcp://[::1]:10300".parse::<ServerUri>().unwrap().to_string(),
            "tcp://[::1]:10300"
        );

        let rejected = [
            "http://localhost:10300",
            "tcp://localhost",
            "tcp://:10300",
            "tcp://host:port",
            "unix://",
            "10300",
        ];
        for bad in rejected {
            assert!(bad.parse::<ServerUri>().is_err(), "{} should be rejected", bad);
        }
    }

    #[tokio::test]
    async fn test_full_exchange_over_stream() {
        let fx = fixture(Some(" turn on the lights "), None);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = SessionHandler::new(fx.ctx.clone());
        let task = tokio::spawn(serve_connection(server, handler, LIMITS));

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        write_event(&mut write_half, &Describe.to_event()).await.unwrap();
        let info = read_event(&mut reader, LIMITS).await.unwrap().unwrap();
        assert_eq!(info.event_type, "info");

        let start = AudioStart {
            rate: 16000,
            width: 2,
            channels: 1,
            timestamp: None,
        };
        write_event(&mut write_half, &start.to_event()).await.unwrap();
        for bytes in [[0x01, 0x02], [0x03, 0x04]] {
            let chunk = AudioChunk {
                audio: bytes.to_vec(),
                ..AudioChunk::default()
            };
            write_event(&mut write_half, &chunk.to_event()).await.unwrap();
        }
        write_event(&mut write_half, &AudioStop::default().to_event()).await.unwrap();

        let reply = read_event(&mut reader, LIMITS).await.unwrap().unwrap();
        assert_eq!(Transcript::from_event(&reply).unwrap().text, "turn on the lights");
        assert_eq!(fx.engine.calls()[0].pcm, vec![0x01, 0x02, 0x03, 0x04]);

        drop(write_half);
        task.await.unwrap().unwrap();
        assert!(read_event(&mut reader, LIMITS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replies_keep_request_order() {
        let fx = fixture(Some("x"), None);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = spawn_session(&fx, server);

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        write_event(&mut write_half, &Ping { text: Some("1".into()) }.to_event()).await.unwrap();
        write_event(&mut write_half, &Event::new("not-a-thing")).await.unwrap();
        write_event(&mut write_half, &Describe.to_event()).await.unwrap();
        write_event(&mut write_half, &Ping { text: Some("2".into()) }.to_event()).await.unwrap();
        drop(write_half);

        let mut types = Vec::new();
        while let Some(event) = read_event(&mut reader, LIMITS).await.unwrap() {
            types.push(event.event_type);
        }
        assert_eq!(types, vec!["pong", "info", "pong"]);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_header_ends_connection() {
        let fx = fixture(Some("x"), None);
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_session(&fx, server);

        client.write_all(b"{not json\n").await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, WyomingError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_payload_closes_only_that_connection() {
        let fx = fixture(Some("x"), None);

        let (mut bad_client, bad_server) = tokio::io::duplex(1024);
        let bad = spawn_session(&fx, bad_server);
        bad_client
            .write_all(b"{\"type\":\"audio-chunk\",\"payload_length\":1099511627776}\n")
            .await
            .unwrap();
        let err = bad.await.unwrap().unwrap_err();
        assert!(matches!(err, WyomingError::Protocol(_)));

        let (client, server) = tokio::io::duplex(64 * 1024);
        let good = spawn_session(&fx, server);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);
        write_event(&mut write_half, &Describe.to_event()).await.unwrap();
        let info = read_event(&mut reader, LIMITS).await.unwrap().unwrap();
        assert_eq!(info.event_type, "info");

        drop(write_half);
        good.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unix_listener_serves_and_cleans_up() {
        let fx = fixture(Some("x"), None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whisper.sock");
        std::fs::write(&path, b"stale").unwrap();

        let server = WyomingServer::new(fx.ctx.clone(), LIMITS);
        let uri = ServerUri::Unix(path.clone());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            server
                .run(&uri, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut stream = None;
        for _ in 0..100 {
            if let Ok(connected) = UnixStream::connect(&path).await {
                stream = Some(connected);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let stream = stream.expect("listener never came up");

        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        write_event(&mut write_half, &Describe.to_event()).await.unwrap();
        let info = read_event(&mut reader, LIMITS).await.unwrap().unwrap();
        assert_eq!(info.event_type, "info");

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
