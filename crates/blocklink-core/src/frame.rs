//! Encrypted block framing.
//!
//! A frame is the serialized message behind a 4-byte big-endian length,
//! followed by random padding up to the next block boundary, all of it run
//! through the negotiated block transform:
//!
//! ```text
//! ┌──────────┬──────────────────┬───────────────┐
//! │ len (BE) │ message (len B)  │ random padding│  total = k * block
//! └──────────┴──────────────────┴───────────────┘
//! ```
//!
//! Padding is `block - ((len + 4) % block)`, so a frame whose `len + 4` is
//! already aligned carries one full block of padding. Writer and reader both
//! go through [`padded_frame_len`] and always agree on where a frame ends.
//!
//! A zero-length frame carries no message and reads as
//! [`ReadOutcome::Empty`].

use std::{io, sync::Arc};

use blocklink_crypto::{DecryptTransform, EncryptTransform};
use blocklink_proto::Serializer;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Serializer shared by every stub of a process.
pub type SharedSerializer<M> = Arc<dyn Serializer<M>>;

/// Bytes on the wire for a payload of `len` bytes.
///
/// Always a positive multiple of `block` and strictly larger than
/// `len + 4`.
pub fn padded_frame_len(len: usize, block: usize) -> usize {
    let used = len + LENGTH_PREFIX;
    used + (block - used % block)
}

/// Result of reading one frame.
#[derive(Debug)]
pub enum ReadOutcome<M> {
    /// A message, with the number of bytes its frame took on the wire
    Message {
        /// Decoded message
        message: M,
        /// Frame size on the wire
        size: usize,
    },
    /// Zero-length frame
    Empty {
        /// Frame size on the wire
        size: usize,
    },
    /// Peer closed the stream at a frame boundary
    Closed,
    /// Malformed, truncated or undecodable frame
    Error(FrameError),
}

impl<M> ReadOutcome<M> {
    /// Whether the reader can keep going after this outcome.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Message { .. } | Self::Empty { .. })
    }
}

/// Writing half of a framed link.
pub struct FrameWriter<W, M> {
    io: W,
    encrypt: EncryptTransform,
    block: usize,
    max_frame_size: usize,
    serializer: SharedSerializer<M>,
    open: bool,
}

impl<W, M: 'static> FrameWriter<W, M>
where
    W: AsyncWrite + Unpin,
{
    /// Writer that frames messages onto `io` with `encrypt`.
    pub fn new(
        io: W,
        encrypt: EncryptTransform,
        block: usize,
        max_frame_size: usize,
        serializer: SharedSerializer<M>,
    ) -> Self {
        Self { io, encrypt, block, max_frame_size, serializer, open: true }
    }

    /// Whether frames can still be written.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Frame, encrypt and send `message`. Returns the bytes written.
    ///
    /// # Errors
    ///
    /// - `FrameError::Closed` after [`Self::shutdown`] or a failed write
    /// - `FrameError::FrameTooLarge` if the message exceeds the frame limit
    pub async fn write(&mut self, message: &M) -> Result<usize, FrameError> {
        let len = self.serializer.output_size(message)?;
        if len > self.max_frame_size {
            return Err(FrameError::FrameTooLarge { len, max: self.max_frame_size });
        }

        let mut buf = Vec::with_capacity(padded_frame_len(len, self.block));
        buf.resize(LENGTH_PREFIX, 0);
        self.serializer.serialize(message, &mut buf)?;
        self.send(buf).await
    }

    /// Send a zero-length frame.
    pub async fn write_empty(&mut self) -> Result<usize, FrameError> {
        self.send(vec![0u8; LENGTH_PREFIX]).await
    }

    /// `buf` holds a placeholder prefix followed by the payload.
    async fn send(&mut self, mut buf: Vec<u8>) -> Result<usize, FrameError> {
        if !self.open {
            return Err(FrameError::Closed);
        }

        let len = buf.len() - LENGTH_PREFIX;
        if len > self.max_frame_size {
            return Err(FrameError::FrameTooLarge { len, max: self.max_frame_size });
        }
        let prefix = i32::try_from(len).map_err(|_| FrameError::FrameTooLarge { len, max: i32::MAX as usize })?;
        buf[..LENGTH_PREFIX].copy_from_slice(&prefix.to_be_bytes());

        let total = padded_frame_len(len, self.block);
        let used = buf.len();
        buf.resize(total, 0);
        rand::thread_rng().fill_bytes(&mut buf[used..]);

        self.encrypt.apply(&mut buf)?;

        if let Err(e) = self.write_all(&buf).await {
            // Cipher state already advanced past this frame
            self.open = false;
            return Err(e.into());
        }
        Ok(total)
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.io.write_all(buf).await?;
        self.io.flush().await
    }

    /// Shut the stream down for writing. Idempotent.
    pub async fn shutdown(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.io.shutdown().await {
            tracing::trace!(error = %e, "writer shutdown failed");
        }
    }
}

/// Reading half of a framed link.
pub struct FrameReader<R, M> {
    io: R,
    decrypt: DecryptTransform,
    block: usize,
    max_frame_size: usize,
    serializer: SharedSerializer<M>,
    open: bool,
}

impl<R, M: 'static> FrameReader<R, M>
where
    R: AsyncRead + Unpin,
{
    /// Reader that unframes messages from `io` with `decrypt`.
    pub fn new(
        io: R,
        decrypt: DecryptTransform,
        block: usize,
        max_frame_size: usize,
        serializer: SharedSerializer<M>,
    ) -> Self {
        Self { io, decrypt, block, max_frame_size, serializer, open: true }
    }

    /// Whether another frame may follow.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Read the next frame.
    ///
    /// Any outcome other than `Message`/`Empty` leaves the reader closed;
    /// later calls return [`ReadOutcome::Closed`]. Transient socket errors
    /// seen before the first byte of a frame leave it open.
    pub async fn read_next(&mut self) -> ReadOutcome<M> {
        if !self.open {
            return ReadOutcome::Closed;
        }

        let outcome = self.read_frame().await;
        let keep_open = match &outcome {
            ReadOutcome::Message { .. } | ReadOutcome::Empty { .. } => true,
            ReadOutcome::Error(e) => e.is_transient(),
            ReadOutcome::Closed => false,
        };
        self.open = keep_open;
        outcome
    }

    async fn read_frame(&mut self) -> ReadOutcome<M> {
        let mut buf = vec![0u8; self.block];
        match read_block(&mut self.io, &mut buf, false).await {
            Ok(0) => return ReadOutcome::Closed,
            Ok(n) if n < self.block => {
                return ReadOutcome::Error(FrameError::Truncated { expected: self.block, read: n });
            },
            Ok(_) => {},
            Err(e) => return ReadOutcome::Error(e),
        }
        if let Err(e) = self.decrypt.apply(&mut buf) {
            return ReadOutcome::Error(e.into());
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
        let raw = i32::from_be_bytes(prefix);
        let Ok(len) = usize::try_from(raw) else {
            return ReadOutcome::Error(FrameError::NegativeLength(raw));
        };
        if len > self.max_frame_size {
            return ReadOutcome::Error(FrameError::FrameTooLarge { len, max: self.max_frame_size });
        }

        let total = padded_frame_len(len, self.block);
        if total > self.block {
            buf.resize(total, 0);
            match read_block(&mut self.io, &mut buf[self.block..], true).await {
                Ok(n) if self.block + n == total => {},
                Ok(n) => {
                    return ReadOutcome::Error(FrameError::Truncated { expected: total, read: self.block + n });
                },
                Err(e) => return ReadOutcome::Error(e),
            }
            if let Err(e) = self.decrypt.apply(&mut buf[self.block..]) {
                return ReadOutcome::Error(e.into());
            }
        }

        if len == 0 {
            return ReadOutcome::Empty { size: total };
        }

        match self.serializer.deserialize(&buf[LENGTH_PREFIX..LENGTH_PREFIX + len]) {
            Ok(message) => ReadOutcome::Message { message, size: total },
            Err(e) => ReadOutcome::Error(e.into()),
        }
    }
}

/// Read until `buf` is full or the stream ends. Returns the bytes read.
///
/// Once any byte of a frame has been consumed the stream cannot be
/// resynchronized, so errors past that point are never reported as
/// transient.
async fn read_block<R>(io: &mut R, buf: &mut [u8], mid_frame: bool) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match io.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if mid_frame || filled > 0 => {
                let kind = match e.kind() {
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                        io::ErrorKind::UnexpectedEof
                    },
                    kind => kind,
                };
                return Err(FrameError::Transport { kind, message: e.to_string() });
            },
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
