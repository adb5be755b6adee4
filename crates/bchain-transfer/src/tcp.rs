//! TCP transport with newline-delimited JSON framing.
//!
//! Each message is one JSON document followed by `\n`. TCP gives the
//! ordering and flow control the chain relies on: a reader that stops
//! reading eventually stalls the writer.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::transport::{InboundLink, Listener, MessageSink, MessageSource, OutboundLink, Transport};

/// Longest frame a [`JsonLineSource`] accepts by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 20;

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// First pause between failed dial attempts
    pub retry_interval: Duration,
    /// Upper bound for the dial backoff
    pub max_retry_interval: Duration,
    /// Disable Nagle's algorithm on every link
    pub nodelay: bool,
    /// Longest accepted frame, newline excluded
    pub max_frame_len: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(50),
            max_retry_interval: Duration::from_secs(2),
            nodelay: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Plain TCP transport.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    cfg: TcpConfig,
}

impl TcpTransport {
    pub fn new(cfg: TcpConfig) -> Self {
        Self { cfg }
    }

    fn configure(&self, stream: &TcpStream) -> std::io::Result<()> {
        if self.cfg.nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// Addresses of the form `:port` are served on localhost.
pub fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("localhost{}", addr)
    } else {
        addr.to_string()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let addr = normalize_addr(addr);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.clone());
        info!("TCP transport listening on {}", local);

        Ok(Box::new(TcpChainListener {
            listener,
            local,
            transport: self.clone(),
        }))
    }

    async fn dial(&self, addr: &str, deadline: Duration) -> Result<OutboundLink> {
        let target = normalize_addr(addr);
        let expires = Instant::now() + deadline;
        let mut backoff = self.cfg.retry_interval;
        let mut last_error = String::from("no attempt made");

        let stream = loop {
            match tokio::time::timeout_at(expires, TcpStream::connect(&target)).await {
                Ok(Ok(stream)) => break stream,
                Ok(Err(e)) => {
                    debug!("dial {} failed: {}; retrying in {:?}", target, e, backoff);
                    last_error = e.to_string();
                }
                Err(_) => {
                    return Err(TransportError::DialTimeout {
                        addr: target,
                        deadline,
                        last_error,
                    })
                }
            }
            if Instant::now() + backoff >= expires {
                return Err(TransportError::DialTimeout {
                    addr: target,
                    deadline,
                    last_error,
                });
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.cfg.max_retry_interval);
        };

        self.configure(&stream).map_err(|e| TransportError::Dial {
            addr: target.clone(),
            reason: e.to_string(),
        })?;
        let (reader, writer) = stream.into_split();
        info!("connected to {}", target);

        Ok(OutboundLink {
            peer: target,
            messages: Box::new(JsonLineSink::new(writer)),
            acks: Box::new(JsonLineSource::with_limit(reader, self.cfg.max_frame_len)),
        })
    }
}

struct TcpChainListener {
    listener: TcpListener,
    local: String,
    transport: TcpTransport,
}

#[async_trait]
impl Listener for TcpChainListener {
    async fn accept(&mut self) -> Result<InboundLink> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        self.transport
            .configure(&stream)
            .map_err(TransportError::Accept)?;
        let (reader, writer) = stream.into_split();
        debug!("accepted link from {}", peer);

        Ok(InboundLink {
            peer: peer.to_string(),
            messages: Box::new(JsonLineSource::with_limit(reader, self.transport.cfg.max_frame_len)),
            acks: Box::new(JsonLineSink::new(writer)),
        })
    }

    fn local_addr(&self) -> String {
        self.local.clone()
    }
}

/// Writes one JSON document per line.
pub struct JsonLineSink<T> {
    writer: OwnedWriteHalf,
    closed: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T> JsonLineSink<T> {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer,
            closed: false,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> MessageSink<T> for JsonLineSink<T>
where
    T: Serialize + Send + 'static,
{
    async fn send(&mut self, msg: T) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(TransportError::Send)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await.map_err(TransportError::Send)
    }
}

/// Reads one JSON document per line.
///
/// A line longer than the limit fails with
/// [`TransportError::FrameTooLarge`] instead of buffering without bound.
pub struct JsonLineSource<T> {
    reader: BufReader<OwnedReadHalf>,
    line: String,
    max_frame_len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonLineSource<T> {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self::with_limit(reader, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_limit(reader: OwnedReadHalf, max_frame_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
            max_frame_len,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> MessageSource<T> for JsonLineSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<T>> {
        loop {
            self.line.clear();
            // One byte of slack for the newline.
            let limit = self.max_frame_len as u64 + 1;
            let n = (&mut self.reader)
                .take(limit)
                .read_line(&mut self.line)
                .await
                .map_err(TransportError::Recv)?;
            if n == 0 {
                return Ok(None);
            }
            if !self.line.ends_with('\n') && n as u64 >= limit {
                return Err(TransportError::FrameTooLarge {
                    limit: self.max_frame_len,
                });
            }
            let frame = self.line.trim_end();
            if frame.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(frame)?));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AckMessage, ChainMessage};

    #[tokio::test]
    async fn test_listen_ephemeral_port() {
        let transport = TcpTransport::default();
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        assert!(!listener.local_addr().ends_with(":0"));
    }

    #[tokio::test]
    async fn test_messages_and_acks_cross_link() {
        let transport = TcpTransport::default();
        let mut listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();

        let server = tokio::spawn(async move {
            let mut link = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            while let Some(msg) = link.messages.recv().await.unwrap() {
                link.acks.send(msg.ack()).await.unwrap();
                seen.push(msg.id);
            }
            link.acks.close().await.unwrap();
            seen
        });

        let mut link = transport
            .dial(&addr, Duration::from_secs(5))
            .await
            .unwrap();
        for id in 0..5 {
            link.messages
                .send(ChainMessage::new(id, format!("op-{}", id)))
                .await
                .unwrap();
        }
        link.messages.close().await.unwrap();

        let mut acks = Vec::new();
        while let Some(ack) = link.acks.recv().await.unwrap() {
            acks.push(ack);
        }

        assert_eq!(server.await.unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(acks, (0..5).map(AckMessage::new).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dial_times_out_without_listener() {
        // Grab a free port, then release it so nothing is listening there.
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = spare.local_addr().unwrap().to_string();
        drop(spare);

        let transport = TcpTransport::default();
        let err = transport
            .dial(&addr, Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::DialTimeout { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let transport = TcpTransport::new(TcpConfig {
            max_frame_len: 64,
            ..TcpConfig::default()
        });
        let mut listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();

        let writer = tokio::spawn(async move {
            let mut stream = TcpStream::connect(&addr).await.unwrap();
            let ok = serde_json::to_vec(&ChainMessage::new(1, "fits")).unwrap();
            stream.write_all(&ok).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
            // No terminator, ever.
            stream.write_all(&[b'x'; 4096]).await.unwrap();
            stream
        });

        let mut link = listener.accept().await.unwrap();
        assert_eq!(link.messages.recv().await.unwrap(), Some(ChainMessage::new(1, "fits")));
        let err = link.messages.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { limit: 64 }), "{:?}", err);
        drop(writer.await.unwrap());
    }

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr(":9000"), "localhost:9000");
        assert_eq!(normalize_addr("10.0.0.1:9000"), "10.0.0.1:9000");
    }
}
