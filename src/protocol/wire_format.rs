//! Wire format encoding and decoding.
//!
//! Every connection starts with a 12-byte handshake in each direction:
//! ```text
//! ┌────────────────────┬──────────┐
//! │ Magic              │ Version  │
//! │ 8 bytes ASCII      │ int32 LE │
//! └────────────────────┴──────────┘
//! ```
//!
//! After that, every unit of communication is an 8-byte message header
//! followed by `size` payload bytes:
//! ```text
//! ┌──────────┬─────────┬──────────┐
//! │ ID       │ Padding │ Size     │
//! │ int16 LE │ 2 bytes │ int32 LE │
//! └──────────┴─────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The padding bytes are
//! written as zero and ignored on read.

use crate::error::{CommandResult, RemoteError, Result};

/// Handshake size in bytes (fixed, exactly 12).
pub const HANDSHAKE_SIZE: usize = 12;

/// Message header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Magic sent by the client.
pub const REQUEST_MAGIC: [u8; 8] = *b"DFHack?\n";

/// Magic sent back by the server.
pub const RESPONSE_MAGIC: [u8; 8] = *b"DFHack!\n";

/// Version this build speaks, on both sides.
pub const PROTOCOL_VERSION: i32 = 1;

/// Lowest request version the server accepts.
pub const MIN_REQUEST_VERSION: i32 = 1;

/// Highest request version the server accepts.
pub const MAX_REQUEST_VERSION: i32 = 255;

/// Maximum payload size (64 MiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1_048_576;

/// Reserved control ids carried in [`MessageHeader::id`].
pub mod reply {
    /// Result payload; ends a call successfully.
    pub const RESULT: i16 = -1;
    /// Failure; `size` holds the status code and no payload follows.
    pub const FAIL: i16 = -2;
    /// Text notification streamed before the final reply.
    pub const TEXT: i16 = -3;
    /// Client asks the server to close the connection (no reply).
    pub const QUIT: i16 = -4;
}

/// Method id of the bind-by-name operation.
pub const BIND_METHOD_ID: i16 = 0;

/// Method id of the run-command operation.
pub const RUN_COMMAND_ID: i16 = 1;

/// Decoded handshake header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    /// 8-byte ASCII magic.
    pub magic: [u8; 8],
    /// Protocol version.
    pub version: i32,
}

impl HandshakeHeader {
    /// Handshake sent by a client of this build.
    pub fn request() -> Self {
        Self {
            magic: REQUEST_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }

    /// Handshake sent back by a server of this build.
    pub fn response() -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }

    /// Encode to bytes (Little Endian).
    pub fn encode(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut buf = [0u8; HANDSHAKE_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    /// Decode from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HANDSHAKE_SIZE {
            return None;
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        Some(Self {
            magic,
            version: i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Server-side check: exact request magic, version in 1..=255.
    pub fn validate_request(&self) -> Result<()> {
        if self.magic != REQUEST_MAGIC {
            return Err(RemoteError::Handshake(format!(
                "invalid request magic {:?}",
                String::from_utf8_lossy(&self.magic)
            )));
        }
        if !(MIN_REQUEST_VERSION..=MAX_REQUEST_VERSION).contains(&self.version) {
            return Err(RemoteError::Handshake(format!(
                "unsupported request version {}",
                self.version
            )));
        }
        Ok(())
    }

    /// Client-side check: exact response magic and exactly our version.
    ///
    /// Stricter than [`validate_request`](Self::validate_request) on purpose;
    /// existing servers and clients rely on this asymmetry.
    pub fn validate_response(&self) -> Result<()> {
        if self.magic != RESPONSE_MAGIC {
            return Err(RemoteError::Handshake(format!(
                "invalid response magic {:?}",
                String::from_utf8_lossy(&self.magic)
            )));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(RemoteError::Handshake(format!(
                "server speaks version {}, expected {}",
                self.version, PROTOCOL_VERSION
            )));
        }
        Ok(())
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Method id (>= 0) or a reserved control id (see [`reply`]).
    pub id: i16,
    /// Payload length, or the status code for [`reply::FAIL`].
    pub size: i32,
}

impl MessageHeader {
    /// Create a new header.
    pub fn new(id: i16, size: i32) -> Self {
        Self { id, size }
    }

    /// Failure header carrying `status` in the size field.
    pub fn fail(status: CommandResult) -> Self {
        Self {
            id: reply::FAIL,
            size: status.code(),
        }
    }

    /// Graceful close request.
    pub fn quit() -> Self {
        Self {
            id: reply::QUIT,
            size: 0,
        }
    }

    /// Encode header to bytes (Little Endian, zero padding).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        buf[2..4].copy_from_slice(&[0, 0]);
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            id: i16::from_le_bytes([buf[0], buf[1]]),
            size: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the declared payload size and return it as a length.
    ///
    /// Not meaningful for failure headers, whose size is a status code.
    pub fn payload_len(&self) -> Result<usize> {
        if self.size < 0 {
            return Err(RemoteError::Protocol(format!(
                "negative message size {}",
                self.size
            )));
        }
        let len = self.size as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RemoteError::MessageTooLarge(len));
        }
        Ok(len)
    }

    #[inline]
    pub fn is_quit(&self) -> bool {
        self.id == reply::QUIT
    }

    #[inline]
    pub fn is_fail(&self) -> bool {
        self.id == reply::FAIL
    }

    /// Status carried by a failure header.
    ///
    /// A failure reporting `Ok` is treated as a plain `Failure`.
    pub fn status(&self) -> CommandResult {
        match CommandResult::from_code(self.size) {
            CommandResult::Ok => CommandResult::Failure,
            other => other,
        }
    }
}
