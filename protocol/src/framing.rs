//! Length-prefixed framing for the TCP and RCON streams.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, Result};

/// Size of the little-endian length prefix in front of every frame.
/// The prefix does not include its own bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    /// Game TCP stream.
    U16,
    /// RCON stream.
    U32,
}

impl LengthPrefix {
    pub fn size(self) -> usize {
        match self {
            LengthPrefix::U16 => 2,
            LengthPrefix::U32 => 4,
        }
    }

    pub fn max_payload(self) -> usize {
        match self {
            LengthPrefix::U16 => u16::MAX as usize,
            LengthPrefix::U32 => i32::MAX as usize,
        }
    }

    pub fn parse(self, bytes: &[u8]) -> usize {
        match self {
            LengthPrefix::U16 => LittleEndian::read_u16(bytes) as usize,
            LengthPrefix::U32 => LittleEndian::read_u32(bytes) as usize,
        }
    }

    pub(crate) fn patch(self, dst: &mut [u8], len: usize) {
        match self {
            LengthPrefix::U16 => LittleEndian::write_u16(dst, len as u16),
            LengthPrefix::U32 => LittleEndian::write_u32(dst, len as u32),
        }
    }
}

/// Splits one complete frame off the front of `src`.
///
/// Returns `Ok(None)` while the frame is still incomplete, otherwise the
/// payload and the total number of bytes consumed.
pub fn decode_frame(src: &[u8], prefix: LengthPrefix, max_len: usize) -> Result<Option<(&[u8], usize)>> {
    if src.len() < prefix.size() {
        return Ok(None);
    }

    let len = prefix.parse(&src[..prefix.size()]);
    if len > max_len {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: max_len,
        });
    }

    let total = prefix.size() + len;
    if src.len() < total {
        return Ok(None);
    }

    Ok(Some((&src[prefix.size()..total], total)))
}

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 1024;

/// Reads whole frames from an async byte stream into a bounded buffer.
///
/// Partial frames stay buffered between calls, so [`FrameReader::read_frame`]
/// can be dropped inside `select!` without losing stream position.
pub struct FrameReader<R> {
    inner: R,
    prefix: LengthPrefix,
    buffer: Vec<u8>,
    /// Bytes of the frame returned by the previous call.
    consumed: usize,
    capacity: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, prefix: LengthPrefix, capacity: usize) -> Self {
        Self {
            inner,
            prefix,
            buffer: Vec::with_capacity(capacity + prefix.size()),
            consumed: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reads the next frame payload. `Ok(None)` means the peer closed the
    /// stream cleanly between frames.
    ///
    /// A declared length above the buffer capacity clears the buffer and
    /// fails with [`CodecError::FrameTooLarge`]; the caller must drop the
    /// connection.
    pub async fn read_frame(&mut self) -> Result<Option<&[u8]>> {
        if self.consumed > 0 {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }

        loop {
            let decoded = decode_frame(&self.buffer, self.prefix, self.capacity)
                .map(|frame| frame.map(|(_, total)| total));
            let complete = match decoded {
                Ok(total) => total,
                Err(e) => {
                    debug!("Dropping buffered stream data: {}", e);
                    self.buffer.clear();
                    return Err(e);
                }
            };
            if let Some(total) = complete {
                self.consumed = total;
                return Ok(Some(&self.buffer[self.prefix.size()..total]));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
