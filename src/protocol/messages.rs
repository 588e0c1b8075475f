//! Core protocol messages.
//!
//! Payloads are opaque to the framing layer; a [`Message`] is any serde
//! value with a stable schema name. The name is what `BindMethod` compares
//! when a client asks for a function by signature.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A payload type that can travel as a call input or output.
pub trait Message: Serialize + DeserializeOwned + Default + Send + 'static {
    /// Schema name, identical on both ends of a connection.
    const NAME: &'static str;
}

/// Decode a message payload; an empty payload is the default value.
pub fn decode_message<M: Message>(payload: &[u8]) -> crate::error::Result<M> {
    if payload.is_empty() {
        return Ok(M::default());
    }
    crate::codec::MsgPackCodec::decode(payload)
}

/// No fields. Used as the output of functions without a result value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyMessage {}

impl Message for EmptyMessage {
    const NAME: &'static str = "dfproto.EmptyMessage";
}

/// Single integer value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntMessage {
    pub value: i32,
}

impl Message for IntMessage {
    const NAME: &'static str = "dfproto.IntMessage";
}

/// Single string value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringMessage {
    pub value: String,
}

impl Message for StringMessage {
    const NAME: &'static str = "dfproto.StringMessage";
}

/// Input of `BindMethod`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreBindRequest {
    /// Function name inside its catalog.
    pub method: String,
    /// Schema name of the input the caller will send.
    pub input_msg: String,
    /// Schema name of the output the caller expects.
    pub output_msg: String,
    /// Extension catalog; `None` or empty means the core catalog.
    pub plugin: Option<String>,
}

impl Message for CoreBindRequest {
    const NAME: &'static str = "dfproto.CoreBindRequest";
}

/// Output of `BindMethod`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreBindReply {
    pub assigned_id: i32,
}

impl Message for CoreBindReply {
    const NAME: &'static str = "dfproto.CoreBindReply";
}

/// Input of `RunCommand`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreRunCommandRequest {
    pub command: String,
    pub arguments: Vec<String>,
}

impl Message for CoreRunCommandRequest {
    const NAME: &'static str = "dfproto.CoreRunCommandRequest";
}

/// One colored piece of text inside a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreTextFragment {
    pub text: String,
    /// Palette index 0..=15; absent means "reset to default color".
    pub color: Option<i32>,
}

/// Payload of a text frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreTextNotification {
    pub fragments: Vec<CoreTextFragment>,
}

impl Message for CoreTextNotification {
    const NAME: &'static str = "dfproto.CoreTextNotification";
}
