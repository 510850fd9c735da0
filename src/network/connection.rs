//! Framed connections
//!
//! Splits a byte stream into a [`FrameReader`] and a [`FrameWriter`] so the
//! read path and the write path can be owned and locked independently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::frame::{Frame, FrameHeader, FrameType, SequenceGenerator, FRAME_HEADER_SIZE};
use super::{TransportError, TransportResult};

/// Content is read in chunks of at most this size
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum frame content size (64 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of a framed connection
pub struct FrameReader {
    stream: BoxedReader,
    max_frame_size: usize,
    frames_received: u64,
}

impl FrameReader {
    pub fn new<R>(stream: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            stream: Box::new(stream),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            frames_received: 0,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Receive the next data frame, dropping probes
    pub async fn receive_frame(&mut self) -> TransportResult<Frame> {
        loop {
            let frame = self.read_frame().await?;
            match frame.frame_type {
                FrameType::Data => return Ok(frame),
                FrameType::Probe => {
                    tracing::trace!("Dropping probe frame {}", frame.sequence);
                }
            }
        }
    }

    /// Read exactly one frame of any type
    pub async fn read_frame(&mut self) -> TransportResult<Frame> {
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        self.stream.read_exact(&mut raw).await.map_err(map_eof)?;
        let header = FrameHeader::parse(&raw)?;

        let length = header.content_length as usize;
        if length > self.max_frame_size {
            return Err(TransportError::FrameTooLarge(length, self.max_frame_size));
        }

        let mut content = BytesMut::with_capacity(length);
        let mut chunk = vec![0u8; length.min(READ_CHUNK_SIZE)];
        while content.len() < length {
            let wanted = (length - content.len()).min(READ_CHUNK_SIZE);
            let read = self.stream.read(&mut chunk[..wanted]).await?;
            if read == 0 {
                return Err(TransportError::Truncated {
                    expected: length,
                    received: content.len(),
                });
            }
            content.extend_from_slice(&chunk[..read]);
        }

        self.frames_received += 1;
        Ok(Frame::new(header.frame_type, header.sequence, content.freeze()))
    }
}

/// Write half of a framed connection
pub struct FrameWriter {
    stream: BoxedWriter,
    sequence: Arc<SequenceGenerator>,
    closed: bool,
    frames_sent: u64,
}

impl FrameWriter {
    pub fn new<W>(stream: W, sequence: Arc<SequenceGenerator>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            stream: Box::new(stream),
            sequence,
            closed: false,
            frames_sent: 0,
        }
    }

    pub fn next_sequence(&self) -> u32 {
        self.sequence.next()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Assign the next sequence number and send; returns the sequence used
    pub async fn send_frame(&mut self, frame_type: FrameType, content: Bytes) -> TransportResult<u32> {
        let sequence = self.next_sequence();
        self.write_frame(&Frame::new(frame_type, sequence, content)).await?;
        Ok(sequence)
    }

    /// Write a fully formed frame, looping until every byte is flushed
    pub async fn write_frame(&mut self, frame: &Frame) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }

        let encoded = frame.encode()?;
        let mut written = 0;
        while written < encoded.len() {
            let count = self.stream.write(&encoded[written..]).await?;
            if count == 0 {
                return Err(TransportError::ZeroWrite);
            }
            written += count;
        }
        self.stream.flush().await?;

        self.frames_sent += 1;
        Ok(())
    }

    /// Release the stream. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Ignoring shutdown error: {}", e);
        }
    }
}

/// Both halves of an established connection
pub struct FramedConnection {
    pub reader: FrameReader,
    pub writer: FrameWriter,
    pub peer: String,
}

impl FramedConnection {
    /// Frame any bidirectional stream
    pub fn from_stream<S>(stream: S, sequence: Arc<SequenceGenerator>, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half, sequence),
            peer: peer.into(),
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.reader = self.reader.with_max_frame_size(max_frame_size);
        self
    }
}

/// Opens framed connections to a remembered remote endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, sequence: Arc<SequenceGenerator>) -> TransportResult<FramedConnection>;

    /// Human-readable remote address
    fn remote(&self) -> String;
}

/// Connects over TCP with Nagle's algorithm disabled
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, sequence: Arc<SequenceGenerator>) -> TransportResult<FramedConnection> {
        let remote = self.remote();
        tracing::debug!("Connecting to {}", remote);

        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::ConnectFailed { remote, source }),
            Err(_) => return Err(TransportError::ConnectTimeout(remote)),
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        Ok(FramedConnection {
            reader: FrameReader::new(read_half).with_max_frame_size(self.max_frame_size),
            writer: FrameWriter::new(write_half, sequence),
            peer: remote,
        })
    }

    fn remote(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn map_eof(error: std::io::Error) -> TransportError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn encoded(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|frame| frame.encode().unwrap().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_reassembles_concatenated_frames_from_partial_reads() {
        let frames = vec![
            Frame::data(1, Bytes::from_static(b"first")),
            Frame::data(2, Bytes::new()),
            Frame::data(3, Bytes::from(vec![7u8; 300])),
        ];
        let bytes = encoded(&frames);

        let mock = Builder::new()
            .read(&bytes[..5])
            .read(&bytes[5..20])
            .read(&bytes[20..])
            .build();
        let mut reader = FrameReader::new(mock);

        for expected in &frames {
            assert_eq!(&reader.receive_frame().await.unwrap(), expected);
        }
        assert_eq!(reader.frames_received(), 3);
    }

    #[tokio::test]
    async fn test_probe_frames_are_filtered() {
        let bytes = encoded(&[Frame::probe(1), Frame::data(2, Bytes::from_static(b"x"))]);
        let mut reader = FrameReader::new(Builder::new().read(&bytes).build());

        let frame = reader.receive_frame().await.unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.frame_type, FrameType::Data);
    }

    #[tokio::test]
    async fn test_corrupted_magic_is_rejected() {
        let mut bytes = encoded(&[Frame::data(1, Bytes::from_static(b"abc"))]);
        bytes[0] = 0x00;
        let mut reader = FrameReader::new(Builder::new().read(&bytes[..FRAME_HEADER_SIZE]).build());

        assert!(matches!(
            reader.receive_frame().await,
            Err(TransportError::InvalidMagic(_))
        ));
    }

    #[tokio::test]
    async fn test_content_cut_short_is_truncated() {
        let bytes = encoded(&[Frame::data(1, Bytes::from_static(b"0123456789"))]);
        let mut reader = FrameReader::new(Builder::new().read(&bytes[..FRAME_HEADER_SIZE + 4]).build());

        assert!(matches!(
            reader.receive_frame().await,
            Err(TransportError::Truncated {
                expected: 10,
                received: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_stream_closed_before_header() {
        let mut reader = FrameReader::new(Builder::new().read(&[0x46, 0x54, 0x01]).build());
        assert!(matches!(reader.receive_frame().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let bytes = encoded(&[Frame::data(1, Bytes::from(vec![0u8; 32]))]);
        let mut reader = FrameReader::new(Builder::new().read(&bytes[..FRAME_HEADER_SIZE]).build())
            .with_max_frame_size(16);

        assert!(matches!(
            reader.receive_frame().await,
            Err(TransportError::FrameTooLarge(32, 16))
        ));
    }

    #[tokio::test]
    async fn test_send_frame_assigns_sequence() {
        let sequence = Arc::new(SequenceGenerator::new());
        let expected = Frame::data(1, Bytes::from_static(b"hello")).encode().unwrap();
        let mock = Builder::new().write(&expected).build();
        let mut writer = FrameWriter::new(mock, sequence.clone());

        let used = writer
            .send_frame(FrameType::Data, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(used, 1);
        assert_eq!(sequence.next(), 2);
        assert_eq!(writer.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (client, _server) = tokio::io::duplex(64);
        let mut connection = FramedConnection::from_stream(client, Arc::new(SequenceGenerator::new()), "duplex");

        connection.writer.shutdown().await;
        connection.writer.shutdown().await;
        assert!(connection.writer.is_closed());
        assert!(matches!(
            connection.writer.write_frame(&Frame::probe(1)).await,
            Err(TransportError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (client, server) = tokio::io::duplex(16);
        let sequence = Arc::new(SequenceGenerator::new());
        let mut near = FramedConnection::from_stream(client, sequence.clone(), "near");
        let mut far = FramedConnection::from_stream(server, sequence, "far");

        let payload = Bytes::from(vec![3u8; 100]);
        let send = tokio::spawn(async move {
            near.writer.send_frame(FrameType::Data, payload).await.unwrap();
            near
        });

        let frame = far.reader.receive_frame().await.unwrap();
        assert_eq!(frame.content.len(), 100);
        send.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_fault() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TcpConnector::new("127.0.0.1", port).with_connect_timeout(Duration::from_secs(2));
        let result = connector.connect(Arc::new(SequenceGenerator::new())).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectFailed { .. }) | Err(TransportError::ConnectTimeout(_))
        ));
    }
}
