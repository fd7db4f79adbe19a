//! Outbound transport: TCP (optionally TLS) plus client-side WebSocket framing.
//!
//! [`Transport::connect`] dials the control server, performs the TLS and
//! WebSocket handshakes, and returns an open connection. Text frames go out
//! through [`Transport::send_text`] (serialised by an internal send mutex so
//! concurrent callers never interleave bytes) and come in through
//! [`Transport::recv`], which also answers pings transparently.
//!
//! Exactly one transport socket exists at a time; the protocol client drops
//! the whole value and reconnects to change servers.

pub mod frame;
pub mod handshake;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use frame::{Frame, FrameDecoder, Opcode};

/// Errors surfaced by the transport. Handshake-phase errors are retried by
/// the reconnect supervisor; they never reach an RPC caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid WebSocket URL: {0}")]
    BadUrl(String),
    #[error("DNS resolution failed for {0}")]
    DnsFailure(String),
    #[error("TCP connect failed: {0}")]
    TcpRefused(String),
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
    #[error("WebSocket handshake failed: {0}")]
    WsHandshake(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed `ws://` / `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
}

impl WsUrl {
    /// Grammar: `ws://host[:port]/path` (default port 80) or
    /// `wss://host[:port]/path` (default 443). Anything else is `BadUrl`.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(TransportError::BadUrl(url.to_string()));
        };

        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], rest[pos..].to_string()),
            None => (rest, "/".to_string()),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| TransportError::BadUrl(url.to_string()))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), if tls { 443 } else { 80 }),
        };

        if host.is_empty() {
            return Err(TransportError::BadUrl(url.to_string()));
        }

        Ok(Self {
            host,
            port,
            path,
            tls,
        })
    }

    /// Value for the `Host:` header — port omitted when it is the default.
    pub fn host_header(&self) -> String {
        let default = if self.tls { 443 } else { 80 };
        if self.port == default {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

struct ReadState {
    half: ReadHalf<Box<dyn RawStream>>,
    decoder: FrameDecoder,
}

/// An open WebSocket connection to the control server.
pub struct Transport {
    reader: Mutex<ReadState>,
    writer: Mutex<WriteHalf<Box<dyn RawStream>>>,
    mask_rng: Mutex<StdRng>,
    closed: AtomicBool,
    shutdown: Arc<Notify>,
}

impl Transport {
    /// Dial `url`, run the TLS handshake when the scheme demands it, and
    /// complete the WebSocket upgrade. On success the connection is OPEN.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let parsed = WsUrl::parse(url)?;

        let addrs: Vec<_> = tokio::net::lookup_host((parsed.host.as_str(), parsed.port))
            .await
            .map_err(|e| TransportError::DnsFailure(format!("{}: {e}", parsed.host)))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::DnsFailure(parsed.host.clone()));
        }

        let mut tcp = None;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| {
            TransportError::TcpRefused(
                last_err.map_or_else(|| "no address connected".to_string(), |e| e.to_string()),
            )
        })?;
        let _ = tcp.set_nodelay(true);

        let mut stream: Box<dyn RawStream> = if parsed.tls {
            Box::new(tls_connect(tcp, &parsed.host).await?)
        } else {
            Box::new(tcp)
        };

        // Opening handshake. Leftover bytes after the response head are the
        // first frames and must be kept.
        let key = handshake::generate_key();
        let request = handshake::build_request(&parsed.host_header(), &parsed.path, &key);
        stream.write_all(request.as_bytes()).await?;

        let mut head = Vec::with_capacity(1024);
        let mut buf = [0u8; 4096];
        let body_start = loop {
            if head.len() > 16384 {
                return Err(TransportError::WsHandshake(
                    "oversized handshake response".to_string(),
                ));
            }
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::WsHandshake(
                    "connection closed during handshake".to_string(),
                ));
            }
            head.extend_from_slice(&buf[..n]);
            if let Some(end) = handshake::head_end(&head) {
                break end;
            }
        };

        let response = handshake::parse_response(&head[..body_start]).ok_or_else(|| {
            TransportError::WsHandshake("malformed handshake response".to_string())
        })?;
        if response.status != 101 {
            return Err(TransportError::WsHandshake(format!(
                "server replied with status {}",
                response.status
            )));
        }
        let expected = handshake::accept_for_key(&key);
        match response.header("sec-websocket-accept") {
            Some(got) if got == expected => {}
            Some(got) => {
                return Err(TransportError::WsHandshake(format!(
                    "Sec-WebSocket-Accept mismatch: expected {expected}, got {got}"
                )));
            }
            None => {
                return Err(TransportError::WsHandshake(
                    "missing Sec-WebSocket-Accept header".to_string(),
                ));
            }
        }

        let mut decoder = FrameDecoder::new();
        decoder.feed(&head[body_start..]);

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            reader: Mutex::new(ReadState {
                half: read_half,
                decoder,
            }),
            writer: Mutex::new(write_half),
            mask_rng: Mutex::new(StdRng::from_entropy()),
            closed: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Send one masked FIN text frame. Callers on different tasks are
    /// serialised by the send mutex, so frames never interleave.
    pub async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
        self.send_frame(Opcode::Text, payload.as_bytes()).await
    }

    async fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mask: [u8; 4] = self.mask_rng.lock().await.gen();
        let bytes = frame::encode_frame(opcode, payload, mask);
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Receive the next text frame payload.
    ///
    /// Pings are answered with a masked pong carrying the same payload; pongs
    /// are ignored; binary/continuation frames are logged and dropped; a
    /// close frame (or EOF, or [`Transport::close`]) yields
    /// [`TransportError::Closed`].
    pub async fn recv(&self) -> Result<String, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.decoder.next_frame() {
                Ok(Some(f)) => {
                    if let Some(text) = self.handle_frame(f).await? {
                        return Ok(text);
                    }
                }
                Ok(None) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(TransportError::Closed);
                    }
                    let mut buf = [0u8; 16384];
                    let n = tokio::select! {
                        n = reader.half.read(&mut buf) => n?,
                        () = self.shutdown.notified() => return Err(TransportError::Closed),
                    };
                    if n == 0 {
                        return Err(TransportError::Closed);
                    }
                    reader.decoder.feed(&buf[..n]);
                }
                Err(e) => return Err(TransportError::ProtocolViolation(e.to_string())),
            }
        }
    }

    /// Returns `Some(text)` for a deliverable text frame, `None` for control
    /// frames that were consumed here.
    async fn handle_frame(&self, f: Frame) -> Result<Option<String>, TransportError> {
        match f.opcode {
            Opcode::Text => Ok(Some(String::from_utf8_lossy(&f.payload).into_owned())),
            Opcode::Close => {
                debug!("Received close frame");
                Err(TransportError::Closed)
            }
            Opcode::Ping => {
                // Pong carries the ping payload back, masked like all
                // client frames.
                self.send_frame(Opcode::Pong, &f.payload).await?;
                Ok(None)
            }
            Opcode::Pong => Ok(None),
            Opcode::Binary | Opcode::Continuation => {
                warn!(
                    "Dropping unexpected {:?} frame ({} bytes)",
                    f.opcode,
                    f.payload.len()
                );
                Ok(None)
            }
        }
    }

    /// Close the connection. Idempotent. The read side is released first so
    /// a blocked [`Transport::recv`] unblocks immediately, then a close
    /// frame is attempted and the socket is shut down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // notify_one stores a permit, so a reader that parks later still wakes
        self.shutdown.notify_one();

        let mask: [u8; 4] = self.mask_rng.lock().await.gen();
        let close_frame = frame::encode_frame(Opcode::Close, &[], mask);
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(&close_frame).await;
        let _ = writer.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// TLS client handshake with the host trust store and SNI from the URL host.
async fn tls_connect(
    tcp: TcpStream,
    host: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let config = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::TlsHandshake(format!("invalid server name: {e}")))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::TlsHandshake(e.to_string()))
}
