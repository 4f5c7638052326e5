//! Wire frames exchanged over the WebSocket.
//!
//! Inbound frames are `{type, payload}` envelopes decoded into the closed
//! [`ClientRequest`] enum. Outbound frames are flat objects tagged by `type`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{Instance, Message, MessageStatus, Priority};
use crate::error::ProtocolError;

/// Payload of a `register` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterPayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Payload of a `send_message` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub to: String,
    #[serde(default)]
    pub content: serde_json::Value,
    pub priority: Option<Priority>,
    /// Time-to-live in milliseconds.
    pub ttl: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Payload of a `get_conversation` frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationPayload {
    pub with: Option<String>,
    pub limit: Option<usize>,
    pub instance_id: Option<String>,
}

/// Payload of a `mark_read` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub message_ids: Vec<String>,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Register(RegisterPayload),
    SendMessage(SendMessagePayload),
    GetMessages,
    ListInstances,
    GetConversation(GetConversationPayload),
    Heartbeat,
    MarkRead(MarkReadPayload),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ClientRequest {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(|e| {
            tracing::debug!("Rejecting malformed frame: {}", e);
            ProtocolError::Malformed
        })?;

        let request = match raw.kind.as_str() {
            "register" => ClientRequest::Register(decode_payload(raw.payload)?),
            "send_message" => ClientRequest::SendMessage(decode_payload(raw.payload)?),
            "get_messages" => ClientRequest::GetMessages,
            "list_instances" => ClientRequest::ListInstances,
            "get_conversation" => ClientRequest::GetConversation(decode_payload(raw.payload)?),
            "heartbeat" => ClientRequest::Heartbeat,
            "mark_read" => ClientRequest::MarkRead(decode_payload(raw.payload)?),
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        Ok(request)
    }

    /// The wire name of this request, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::Register(_) => "register",
            ClientRequest::SendMessage(_) => "send_message",
            ClientRequest::GetMessages => "get_messages",
            ClientRequest::ListInstances => "list_instances",
            ClientRequest::GetConversation(_) => "get_conversation",
            ClientRequest::Heartbeat => "heartbeat",
            ClientRequest::MarkRead(_) => "mark_read",
        }
    }
}

/// A missing or null payload decodes as an empty object, so payloads whose
/// fields are all optional still parse.
fn decode_payload<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, ProtocolError> {
    let payload = if payload.is_null() {
        empty_metadata()
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|e| {
        tracing::debug!("Rejecting invalid payload: {}", e);
        ProtocolError::Malformed
    })
}

/// Short form of an instance announced in `instance_joined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl From<&Instance> for InstanceSummary {
    fn from(instance: &Instance) -> Self {
        Self {
            id: instance.id.clone(),
            name: instance.name.clone(),
            description: instance.description.clone(),
        }
    }
}

/// Serialized copy of a message as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub from: String,
    pub from_name: String,
    pub to: String,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<bool>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            from: message.from.clone(),
            from_name: message.from_name.clone(),
            to: message.to.to_string(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            priority: message.priority,
            status: message.status,
            expires_at: message.expires_at,
            broadcast: None,
        }
    }
}

impl MessageView {
    /// View used for pushes of broadcast messages.
    pub fn broadcast(message: &Message) -> Self {
        Self {
            broadcast: Some(true),
            ..Self::from(message)
        }
    }
}

/// Status notification sent to a message's sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: String,
    /// Original sender of the message.
    pub from: String,
    /// Instance that received or read the message.
    pub to: String,
    pub status: MessageStatus,
    pub at: DateTime<Utc>,
}

/// Frames sent from the broker to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: String },
    #[serde(rename_all = "camelCase")]
    Registered { instance_id: String, name: String },
    InstanceJoined { instance: InstanceSummary },
    NewMessage { message: MessageView },
    Messages { messages: Vec<MessageView> },
    Instances { instances: Vec<Instance> },
    Conversation { messages: Vec<MessageView> },
    HeartbeatAck,
    DeliveryReceipt { receipt: Receipt },
    ReadReceipt { receipt: Receipt },
    MarkedRead { count: usize },
    Error { error: String },
}

impl ServerFrame {
    pub fn error(error: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: error.into(),
        }
    }

    /// The wire name of this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::Registered { .. } => "registered",
            ServerFrame::InstanceJoined { .. } => "instance_joined",
            ServerFrame::NewMessage { .. } => "new_message",
            ServerFrame::Messages { .. } => "messages",
            ServerFrame::Instances { .. } => "instances",
            ServerFrame::Conversation { .. } => "conversation",
            ServerFrame::HeartbeatAck => "heartbeat_ack",
            ServerFrame::DeliveryReceipt { .. } => "delivery_receipt",
            ServerFrame::ReadReceipt { .. } => "read_receipt",
            ServerFrame::MarkedRead { .. } => "marked_read",
            ServerFrame::Error { .. } => "error",
        }
    }
}

impl From<ProtocolError> for ServerFrame {
    fn from(error: ProtocolError) -> Self {
        ServerFrame::error(error.to_string())
    }
}
