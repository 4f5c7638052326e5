//! Per-request handlers. Each runs synchronously against [`BrokerState`].

use chrono::{DateTime, Utc};

use super::BrokerState;
use crate::protocol::{
    ClientRequest, GetConversationPayload, InstanceSummary, MarkReadPayload, MessageStatus,
    MessageView, Receipt, RegisterPayload, ServerFrame,
};

pub(crate) const NOT_REGISTERED: &str = "Instance is not registered";

impl BrokerState {
    /// Handle one request from the socket bound to `conn` and return the id
    /// the socket is bound to afterwards.
    pub(crate) fn dispatch(&mut self, conn: &str, request: ClientRequest, now: DateTime<Utc>) -> String {
        tracing::debug!("Received {} from {}", request.kind(), conn);

        match request {
            ClientRequest::Register(payload) => return self.handle_register(conn, payload, now),
            ClientRequest::SendMessage(payload) => {
                self.route_message(conn, payload, now);
            }
            ClientRequest::GetMessages => self.handle_get_messages(conn, now),
            ClientRequest::ListInstances => self.handle_list_instances(conn),
            ClientRequest::GetConversation(payload) => self.handle_get_conversation(conn, payload, now),
            ClientRequest::Heartbeat => self.handle_heartbeat(conn, now),
            ClientRequest::MarkRead(payload) => self.handle_mark_read(conn, payload, now),
        }

        conn.to_string()
    }

    fn handle_register(&mut self, conn: &str, payload: RegisterPayload, now: DateTime<Utc>) -> String {
        // A socket that is still live keeps its id; anything else gets a fresh one.
        let instance_id = if self.registry.is_live(conn) {
            conn.to_string()
        } else {
            uuid::Uuid::new_v4().to_string()
        };

        let registration = self.registry.register(
            &instance_id,
            &payload.name,
            &payload.description,
            payload.metadata,
            now,
        );
        self.connections.rebind(conn, &instance_id);

        match &registration.evicted {
            Some(old) => tracing::info!(
                "Instance reconnecting: {} ({} replaces {})",
                payload.name,
                instance_id,
                old
            ),
            None => tracing::info!("Instance registered: {} ({})", payload.name, instance_id),
        }

        self.connections.send(
            &instance_id,
            ServerFrame::Registered {
                instance_id: instance_id.clone(),
                name: payload.name,
            },
        );

        let joined = ServerFrame::InstanceJoined {
            instance: InstanceSummary::from(&registration.instance),
        };
        self.connections
            .send_all_except(&[instance_id.as_str()], &joined);

        instance_id
    }

    /// Pull path. Everything returned is marked delivered as a side effect.
    ///
    /// Only the socket's own live id may pull; a superseded id never reads
    /// its replacement's inbox.
    fn handle_get_messages(&mut self, conn: &str, now: DateTime<Utc>) {
        if !self.registry.is_live(conn) {
            self.connections.send(conn, ServerFrame::error(NOT_REGISTERED));
            return;
        }
        let instance_id = conn.to_string();

        let messages = self.store.messages_for(&instance_id, true, now);
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();

        self.connections.send(
            conn,
            ServerFrame::Messages {
                messages: messages.iter().map(MessageView::from).collect(),
            },
        );

        for delivered in self.store.mark_delivered(&ids, now) {
            self.send_delivery_receipt(&delivered, &instance_id, now);
        }
    }

    fn handle_list_instances(&self, conn: &str) {
        self.connections.send(
            conn,
            ServerFrame::Instances {
                instances: self.registry.list(),
            },
        );
    }

    fn handle_get_conversation(&self, conn: &str, payload: GetConversationPayload, now: DateTime<Utc>) {
        let limit = payload
            .limit
            .unwrap_or(self.config.default_conversation_limit);

        let messages = match payload.with {
            Some(with) => match self.registry.lookup(&with) {
                Some(other) => {
                    let me = payload.instance_id.unwrap_or_else(|| conn.to_string());
                    self.store.conversation_between(&me, &other.id, limit, now)
                }
                None => Vec::new(),
            },
            None => self.store.conversation(limit, now),
        };

        self.connections.send(
            conn,
            ServerFrame::Conversation {
                messages: messages.iter().map(MessageView::from).collect(),
            },
        );
    }

    /// Heartbeats only refresh `last_seen`; there is no liveness timeout.
    fn handle_heartbeat(&mut self, conn: &str, now: DateTime<Utc>) {
        self.registry.touch(conn, now);
        self.connections.send(conn, ServerFrame::HeartbeatAck);
    }

    fn handle_mark_read(&mut self, conn: &str, payload: MarkReadPayload, now: DateTime<Utc>) {
        if !self.registry.is_live(conn) {
            self.connections.send(conn, ServerFrame::error(NOT_REGISTERED));
            return;
        }
        let reader = conn.to_string();

        let marks = self.store.mark_read(&payload.message_ids, now);
        self.connections
            .send(conn, ServerFrame::MarkedRead { count: marks.len() });

        for mark in marks {
            let receipt = Receipt {
                message_id: mark.id,
                from: mark.from.clone(),
                to: reader.clone(),
                status: MessageStatus::Read,
                at: now,
            };
            self.connections
                .send(&mark.from, ServerFrame::ReadReceipt { receipt });
        }
    }
}
