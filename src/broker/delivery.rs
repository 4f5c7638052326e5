//! Delivery engine: sender/recipient resolution, persistence and push.

use chrono::{DateTime, Utc};

use super::BrokerState;
use crate::protocol::{
    Message, MessageDraft, MessageStatus, MessageView, Receipt, Recipient, SendMessagePayload,
    ServerFrame, BROADCAST_TARGET,
};

pub(crate) const STALE_ID_NOTICE: &str =
    "Connection ID was stale and has been updated. Please re-register if you see this message repeatedly.";

impl BrokerState {
    /// The live instance id sending on behalf of the socket bound to `conn`.
    ///
    /// A superseded id resolves to its replacement within the grace period;
    /// the socket still holding the old id is told to re-register.
    fn resolve_sender(&self, conn: &str, now: DateTime<Utc>) -> Option<String> {
        if self.registry.is_live(conn) {
            return Some(conn.to_string());
        }

        let resolved = self.registry.resolve_stale(conn, now)?;
        tracing::info!("Resolved stale sender ID {} to {}", conn, resolved);
        self.connections
            .send(conn, ServerFrame::error(STALE_ID_NOTICE));
        Some(resolved)
    }

    fn resolve_recipient(&self, to: &str) -> Option<Recipient> {
        if to == BROADCAST_TARGET {
            return Some(Recipient::Broadcast);
        }
        self.registry
            .lookup(to)
            .map(|instance| Recipient::Instance(instance.id.clone()))
    }

    /// Route a `send_message`. Unresolved senders or recipients are dropped
    /// with a log line and nothing is stored.
    pub(crate) fn route_message(
        &mut self,
        conn: &str,
        payload: SendMessagePayload,
        now: DateTime<Utc>,
    ) -> Option<Message> {
        let Some(sender_id) = self.resolve_sender(conn, now) else {
            tracing::warn!(
                "Unknown sender: {} (could not resolve to current connection)",
                conn
            );
            return None;
        };

        let Some(recipient) = self.resolve_recipient(&payload.to) else {
            tracing::warn!("Unknown recipient: {}", payload.to);
            return None;
        };

        let sender_name = self
            .registry
            .get(&sender_id)
            .map(|instance| instance.name.clone())
            .unwrap_or_default();

        let mut draft = MessageDraft::new(sender_id.clone(), sender_name.clone(), recipient, payload.content)
            .with_priority(payload.priority.unwrap_or_default())
            .with_max_retries(payload.max_retries.unwrap_or(self.config.default_max_retries));
        if let Some(ttl) = payload.ttl {
            draft = draft.with_ttl_ms(ttl);
        }

        let message = self.store.put(draft, now);
        tracing::info!(
            "Message from {} to {}",
            sender_name,
            if message.to.is_broadcast() { "all" } else { payload.to.as_str() }
        );

        let reached = match &message.to {
            Recipient::Broadcast => self.push_broadcast(&message, &[sender_id.as_str(), conn]),
            Recipient::Instance(target) => usize::from(self.push_direct(&message, target)),
        };
        tracing::debug!("Message {} pushed to {} connections", message.id, reached);

        Some(message)
    }

    /// Push to the target's socket if it is open. Status stays `sent` until
    /// the recipient pulls with `get_messages`.
    fn push_direct(&self, message: &Message, target: &str) -> bool {
        let frame = ServerFrame::NewMessage {
            message: MessageView::from(message),
        };
        self.connections.send(target, frame)
    }

    /// Push to every open socket except the sender's.
    fn push_broadcast(&self, message: &Message, exclude: &[&str]) -> usize {
        let frame = ServerFrame::NewMessage {
            message: MessageView::broadcast(message),
        };
        self.connections.send_all_except(exclude, &frame)
    }

    pub(crate) fn send_delivery_receipt(&self, message: &Message, recipient: &str, now: DateTime<Utc>) {
        let receipt = Receipt {
            message_id: message.id.clone(),
            from: message.from.clone(),
            to: recipient.to_string(),
            status: MessageStatus::Delivered,
            at: now,
        };
        self.connections
            .send(&message.from, ServerFrame::DeliveryReceipt { receipt });
    }
}
