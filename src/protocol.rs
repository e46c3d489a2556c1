//! Newline-delimited packet framing.
//!
//! A packet is any run of bytes ending in `\n`, terminator included.
//! Bytes arrive in arbitrary chunks; `PacketFramer` holds the unterminated
//! remainder between reads and yields complete packets in arrival order.
//!
//! ```text
//! read 1:  "ab"          -> (nothing)
//! read 2:  "c\nde\n"     -> "abc\n", "de\n"
//! read 3:  "\n"          -> "\n"          (empty payload, still a packet)
//! ```

use bytes::{Bytes, BytesMut};

/// Packet terminator.
pub const TERMINATOR: u8 = b'\n';

/// Initial accumulation buffer capacity.
const INITIAL_CAPACITY: usize = 1024;

/// Framing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// A packet (pending or complete) exceeded the configured limit.
    PacketTooLarge { len: usize, limit: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::PacketTooLarge { len, limit } => {
                write!(f, "packet of {len} bytes exceeds limit of {limit} bytes")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Per-connection accumulation buffer.
#[derive(Debug)]
pub struct PacketFramer {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to hold no terminator.
    scanned: usize,
    max_packet_size: usize,
}

impl PacketFramer {
    /// Create an empty framer that rejects packets longer than `max_packet_size`.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY.min(max_packet_size)),
            scanned: 0,
            max_packet_size,
        }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Split off the next complete packet, if one is buffered.
    ///
    /// Returns `Ok(None)` when only an unterminated remainder is left, and
    /// `Err` once a packet, complete or not, grows past the limit.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>, FrameError> {
        let found = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == TERMINATOR)
            .map(|offset| self.scanned + offset);

        match found {
            Some(end) => {
                let len = end + 1;
                self.check_len(len)?;
                self.scanned = 0;
                Ok(Some(self.buffer.split_to(len).freeze()))
            }
            None => {
                self.scanned = self.buffer.len();
                self.check_len(self.buffer.len())?;
                Ok(None)
            }
        }
    }

    /// Number of buffered bytes not yet part of a complete packet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_packet_size {
            return Err(FrameError::PacketTooLarge {
                len,
                limit: self.max_packet_size,
            });
        }
        Ok(())
    }
}
