use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{ElephantSnapshot, LogUpdate, StatusSnapshot, TradeUpdate, TradesUpdate};

/// Everything the push channel can deliver to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connect,
    Disconnect(String),
    ConnectError(String),
    ReconnectAttempt(u32),
    Reconnect(u32),
    ReconnectFailed,
    StatusUpdate(StatusSnapshot),
    LogUpdate(LogUpdate),
    ElephantsUpdate(ElephantSnapshot),
    TradeUpdate(TradeUpdate),
    TradesUpdate(TradesUpdate),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown push event `{0}`")]
    UnknownEvent(String),
    #[error("invalid payload for `{event}`: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ServerEvent {
    /// Maps a server-emitted event name and payload onto its variant.
    ///
    /// Lifecycle events are produced locally by the client and are not
    /// accepted from the wire.
    pub fn decode(name: &str, payload: Value) -> Result<ServerEvent, DispatchError> {
        match name {
            "status_update" => decode_payload(name, payload).map(ServerEvent::StatusUpdate),
            "log_update" => decode_payload(name, payload).map(ServerEvent::LogUpdate),
            "elephants_update" => decode_payload(name, payload).map(ServerEvent::ElephantsUpdate),
            "trade_update" => decode_payload(name, payload).map(ServerEvent::TradeUpdate),
            "trades_update" => decode_payload(name, payload).map(ServerEvent::TradesUpdate),
            other => Err(DispatchError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connect => "connect",
            ServerEvent::Disconnect(_) => "disconnect",
            ServerEvent::ConnectError(_) => "connect_error",
            ServerEvent::ReconnectAttempt(_) => "reconnect_attempt",
            ServerEvent::Reconnect(_) => "reconnect",
            ServerEvent::ReconnectFailed => "reconnect_failed",
            ServerEvent::StatusUpdate(_) => "status_update",
            ServerEvent::LogUpdate(_) => "log_update",
            ServerEvent::ElephantsUpdate(_) => "elephants_update",
            ServerEvent::TradeUpdate(_) => "trade_update",
            ServerEvent::TradesUpdate(_) => "trades_update",
        }
    }
}

fn decode_payload<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, DispatchError> {
    serde_json::from_value(payload).map_err(|source| DispatchError::Payload {
        event: event.to_string(),
        source,
    })
}
