use std::fmt;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use dbdock_common::DockError;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_LEN: usize = 8;

/// Largest payload a single frame may declare before the stream is treated
/// as corrupt.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamSource {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamSource::Stdin),
            1 => Some(StreamSource::Stdout),
            2 => Some(StreamSource::Stderr),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            StreamSource::Stdin => 0,
            StreamSource::Stdout => 1,
            StreamSource::Stderr => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAnomaly {
    /// Header tag outside 0..=2; the payload was still consumed as stdout.
    UnknownSource(u8),
    /// Declared length above `MAX_FRAME_LEN`; nothing was read.
    OversizedLength(u32),
}

impl fmt::Display for FrameAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameAnomaly::UnknownSource(tag) => write!(f, "unknown stream source tag {tag}"),
            FrameAnomaly::OversizedLength(len) => {
                write!(f, "declared frame length {len} exceeds {MAX_FRAME_LEN} bytes")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: StreamSource,
    pub payload: Bytes,
    pub anomaly: Option<FrameAnomaly>,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("log stream ended inside a frame header ({received} of {HEADER_LEN} bytes)")]
    TruncatedHeader { received: usize },
    #[error("log stream ended inside a frame payload ({received} of {expected} bytes)")]
    TruncatedPayload { expected: usize, received: usize },
    #[error("log stream lost frame alignment after an oversized frame")]
    Desynchronized,
    #[error("log stream read failed: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for DockError {
    fn from(err: FrameError) -> Self {
        DockError::StreamReadFailure {
            instance: String::new(),
            message: err.to_string(),
        }
    }
}

/// Splits Docker's multiplexed attach/logs byte stream into frames.
pub struct FrameDemuxer<R> {
    reader: R,
    desynchronized: bool,
}

impl<R> FrameDemuxer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            desynchronized: false,
        }
    }

    /// Reads the next whole frame. `Ok(None)` means the stream ended cleanly
    /// on a frame boundary.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.desynchronized {
            return Err(FrameError::Desynchronized);
        }

        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.reader.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => return Ok(None),
            received if received < HEADER_LEN => {
                return Err(FrameError::TruncatedHeader { received })
            }
            _ => {}
        }

        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let (source, anomaly) = match StreamSource::from_tag(header[0]) {
            Some(source) => (source, None),
            None => (StreamSource::Stdout, Some(FrameAnomaly::UnknownSource(header[0]))),
        };

        if length > MAX_FRAME_LEN {
            self.desynchronized = true;
            return Ok(Some(Frame {
                source,
                payload: Bytes::new(),
                anomaly: Some(FrameAnomaly::OversizedLength(length)),
            }));
        }

        let expected = length as usize;
        let mut payload = BytesMut::zeroed(expected);
        let mut received = 0;
        while received < expected {
            let n = self.reader.read(&mut payload[received..]).await?;
            if n == 0 {
                return Err(FrameError::TruncatedPayload { expected, received });
            }
            received += n;
        }

        Ok(Some(Frame {
            source,
            payload: payload.freeze(),
            anomaly,
        }))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Encodes one frame in wire form. Payloads must fit in a `u32` length.
pub fn encode_frame(source: StreamSource, payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= u32::MAX as usize);
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(source.tag());
    buf.put_bytes(0, 3);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}
