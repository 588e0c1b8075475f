//! Protocol module - wire format, framing, and core messages.
//!
//! This module implements the binary protocol shared by client and server:
//! - 12-byte handshake and 8-byte message header encoding/decoding
//! - Async frame I/O helpers
//! - The core service's message types

mod frame;
mod messages;
mod wire_format;

pub use frame::{
    build_frame, read_handshake, read_header, read_payload, write_handshake, write_header,
    write_message,
};
pub use messages::{
    CoreBindReply, CoreBindRequest, CoreRunCommandRequest, CoreTextFragment,
    CoreTextNotification, decode_message, EmptyMessage, IntMessage, Message, StringMessage,
};
pub use wire_format::{
    reply, HandshakeHeader, MessageHeader, BIND_METHOD_ID, HANDSHAKE_SIZE, HEADER_SIZE,
    MAX_MESSAGE_SIZE, MAX_REQUEST_VERSION, MIN_REQUEST_VERSION, PROTOCOL_VERSION,
    REQUEST_MAGIC, RESPONSE_MAGIC, RUN_COMMAND_ID,
};
