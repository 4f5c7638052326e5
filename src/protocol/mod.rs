//! Wire protocol and shared data types for the broker.
//!
//! This module defines:
//! - Instances and messages with their priority/status lifecycle
//! - Typed client requests decoded from `{type, payload}` envelopes
//! - Server frames, message views and receipts

pub mod frames;
pub mod types;

pub use frames::{
    ClientRequest, GetConversationPayload, InstanceSummary, MarkReadPayload, MessageView,
    Receipt, RegisterPayload, SendMessagePayload, ServerFrame,
};
pub use types::{
    Instance, Message, MessageDraft, MessageStatus, Priority, Recipient, BROADCAST_TARGET,
    DEFAULT_MAX_RETRIES,
};
