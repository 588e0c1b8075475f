//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` (struct-as-map), so a
//! peer can add optional fields without breaking older readers: missing
//! fields fall back to `#[serde(default)]`.
//!
//! # Example
//!
//! ```
//! use dfhack_remote::codec::MsgPackCodec;
//! use dfhack_remote::protocol::IntMessage;
//!
//! let msg = IntMessage { value: 42 };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: IntMessage = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::Result;

/// MessagePack codec for call payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value into `buf`, replacing its contents but keeping its
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn encode_into<T: serde::Serialize>(value: &T, buf: &mut BytesMut) -> Result<()> {
        buf.clear();
        let mut writer = BufMut::writer(&mut *buf);
        rmp_serde::encode::write_named(&mut writer, value)?;
        Ok(())
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
