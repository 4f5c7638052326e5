//! Live connection table keyed by the id each socket is currently bound to.
//!
//! Outbound frames go into a per-socket unbounded channel drained by that
//! socket's writer task, so sending never waits on I/O.

use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerFrame;

pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: HashMap<String, FrameSender>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted socket under its temporary id.
    pub fn open(&mut self, id: &str, sender: FrameSender) {
        self.connections.insert(id.to_string(), sender);
    }

    /// Move a socket from one bound id to another.
    pub fn rebind(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.connections.contains_key(from);
        }
        match self.connections.remove(from) {
            Some(sender) => {
                self.connections.insert(to.to_string(), sender);
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, id: &str) -> Option<FrameSender> {
        self.connections.remove(id)
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.connections
            .get(id)
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Fire-and-forget send. Returns false if the socket is absent or closed.
    pub fn send(&self, id: &str, frame: ServerFrame) -> bool {
        match self.connections.get(id) {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Send to every open socket not bound to one of `exclude`.
    ///
    /// Returns how many sockets accepted the frame.
    pub fn send_all_except(&self, exclude: &[&str], frame: &ServerFrame) -> usize {
        self.connections
            .iter()
            .filter(|(id, _)| !exclude.contains(&id.as_str()))
            .filter(|(_, sender)| sender.send(frame.clone()).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop every sender so writer tasks wind down.
    pub fn close_all(&mut self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        count
    }
}
