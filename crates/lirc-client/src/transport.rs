//! Line transport to lircd.
//!
//! lircd frames everything as newline-terminated text, so the transport is a
//! [`LinesCodec`] wrapped around the [`PacketReader`]: decoding yields whole
//! packets, encoding writes one command line.
//!
//! The daemon listens on a Unix socket (default `/var/run/lirc/lircd`) and,
//! when started with `--listen`, on TCP port 8765.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::Error;
use crate::protocol::{Packet, PacketReader, ProtocolError};

/// Default lircd Unix socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/lirc/lircd";

/// Default lircd TCP port.
pub const DEFAULT_TCP_PORT: u16 = 8765;

/// Maximum accepted line length (64 KiB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Byte stream a client session can run over.
pub trait DaemonStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DaemonStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn DaemonStream>;

/// Address of a lircd instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Unix(PathBuf::from(DEFAULT_SOCKET_PATH))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Accepts `unix:<path>`, a bare path containing `/`, `tcp://host[:port]`
    /// or `host[:port]`. IPv6 hosts need brackets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::InvalidEndpoint(s.to_string());

        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let tcp = s.strip_prefix("tcp://");
        if tcp.is_none() && s.contains('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }
        let addr = tcp.unwrap_or(s);

        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) if !host.ends_with(':') => {
                (host, port.parse::<u16>().map_err(|_| invalid())?)
            }
            _ => (addr, DEFAULT_TCP_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || host.contains('/') {
            return Err(invalid());
        }

        Ok(Endpoint::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

/// Open a byte stream to `endpoint`.
///
/// TCP connections disable Nagle's algorithm; button sends are tiny and
/// latency sensitive.
///
/// # Errors
///
/// Returns [`Error::Connect`] if the socket cannot be connected.
pub async fn open(endpoint: &Endpoint) -> Result<BoxedStream, Error> {
    let connect_err = |source| Error::Connect {
        endpoint: endpoint.to_string(),
        source,
    };

    match endpoint {
        Endpoint::Unix(path) => {
            let stream = UnixStream::connect(path).await.map_err(connect_err)?;
            Ok(Box::new(stream))
        }
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(connect_err)?;
            stream.set_nodelay(true).map_err(connect_err)?;
            Ok(Box::new(stream))
        }
    }
}

/// Codec turning lircd lines into [`Packet`]s and command text into lines.
#[derive(Debug)]
pub struct LircCodec {
    lines: LinesCodec,
    reader: PacketReader,
}

impl LircCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            reader: PacketReader::new(),
        }
    }
}

impl Default for LircCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LircCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.lines.decode(src)? {
            tracing::trace!("lircd <- {:?}", line);
            if let Some(packet) = self.reader.feed(&line)? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.lines.decode_eof(src)? {
            tracing::trace!("lircd <- {:?}", line);
            if let Some(packet) = self.reader.feed(&line)? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }
}

impl<T: AsRef<str>> Encoder<T> for LircCodec {
    type Error = CodecError;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!("lircd -> {:?}", line.as_ref());
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<LinesCodecError> for CodecError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                CodecError::Protocol(ProtocolError::LineTooLong)
            }
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }
}
