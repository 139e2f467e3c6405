//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Only what a read-mostly dashboard client needs: the open handshake,
//! heartbeats, namespace connect and named events on the default namespace.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const ENGINE_IO_VERSION: &str = "4";
pub const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine.io packet type `{0}`")]
    UnknownEnginePacket(char),
    #[error("unknown socket.io packet type `{0}`")]
    UnknownSocketPacket(char),
    #[error("binary packets are not supported")]
    UnsupportedBinary,
    #[error("malformed event packet: {0}")]
    MalformedEvent(String),
    #[error("invalid json in packet: {0}")]
    Json(#[from] serde_json::Error),
}

/// Payload of the engine.io `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// How long the link may stay silent before the server is considered gone.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<EnginePacket, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let data = chars.as_str();
        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(data)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(data.to_string()),
            '3' => EnginePacket::Pong(data.to_string()),
            '4' => EnginePacket::Message(data.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            'b' => return Err(ProtocolError::UnsupportedBinary),
            other => return Err(ProtocolError::UnknownEnginePacket(other)),
        })
    }

    /// Client-side encoding; `open` is server-only and encodes as a bare type.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(data) => format!("4{data}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Splits a long-polling response body into packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, ProtocolError> {
    body.split(RECORD_SEPARATOR)
        .filter(|chunk| !chunk.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    Ack(Value),
    ConnectError(Value),
}

impl SocketPacket {
    pub fn decode(text: &str) -> Result<SocketPacket, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = strip_ack_id(strip_namespace(chars.as_str()));
        match kind {
            '0' => Ok(SocketPacket::Connect(parse_optional_json(rest)?)),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => decode_event(rest),
            '3' => Ok(SocketPacket::Ack(
                parse_optional_json(rest)?.unwrap_or(Value::Null),
            )),
            '4' => Ok(SocketPacket::ConnectError(
                parse_optional_json(rest)?.unwrap_or(Value::Null),
            )),
            '5' | '6' => Err(ProtocolError::UnsupportedBinary),
            other => Err(ProtocolError::UnknownSocketPacket(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{auth}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, data } => {
                format!("2{}", Value::Array(vec![Value::String(name.clone()), data.clone()]))
            }
            SocketPacket::Ack(data) => format!("3{}", Value::Array(vec![data.clone()])),
            SocketPacket::ConnectError(data) => format!("4{data}"),
        }
    }

    /// Human readable reason carried by a `CONNECT_ERROR` packet.
    pub fn error_message(data: &Value) -> String {
        match data {
            Value::String(message) => message.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string()),
            other => other.to_string(),
        }
    }
}

fn strip_namespace(data: &str) -> &str {
    if data.starts_with('/') {
        match data.find(',') {
            Some(idx) => &data[idx + 1..],
            None => "",
        }
    } else {
        data
    }
}

fn strip_ack_id(data: &str) -> &str {
    data.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_optional_json(data: &str) -> Result<Option<Value>, ProtocolError> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(data)?))
}

fn decode_event(data: &str) -> Result<SocketPacket, ProtocolError> {
    let value: Value = serde_json::from_str(data)?;
    let Value::Array(mut items) = value else {
        return Err(ProtocolError::MalformedEvent(data.to_string()));
    };
    if items.is_empty() {
        return Err(ProtocolError::MalformedEvent(data.to_string()));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        _ => return Err(ProtocolError::MalformedEvent(data.to_string())),
    };
    let data = if items.is_empty() {
        Value::Null
    } else {
        items.remove(0)
    };
    Ok(SocketPacket::Event { name, data })
}
