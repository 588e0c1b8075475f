//! Codec module - serialization of call payloads.
//!
//! The framing layer treats payloads as opaque bytes; [`MsgPackCodec`]
//! is the serializer both ends of this crate use for [`Message`] values.
//!
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! [`Message`]: crate::protocol::Message

mod msgpack;

pub use msgpack::MsgPackCodec;
