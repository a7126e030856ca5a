//! Per-node request dispatch.
//!
//! A [`Replica`] owns the node's store and configuration and turns exactly
//! one decoded request into exactly one reply. It is shared behind an `Arc`
//! by every connection task; the store is the only mutable state.

use tracing::{debug, warn};

use crate::config::{ReplicaConfig, ReplicationPolicy};
use crate::coordinator::WriteCoordinator;
use crate::forwarder::forward_to_leader;
use crate::message::{self, Command, Message};
use crate::resolver::resolve_read;
use crate::store::{Applied, ReplicaStore};
use crate::topology::Role;

pub struct Replica {
    config: ReplicaConfig,
    store: ReplicaStore,
    writes: WriteCoordinator,
}

impl Replica {
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            config,
            store: ReplicaStore::new(),
            writes: WriteCoordinator::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn store(&self) -> &ReplicaStore {
        &self.store
    }

    /// Decodes a raw request frame and produces the reply for it.
    pub async fn handle_frame(&self, frame: &str) -> Message {
        match message::decode(frame) {
            Ok(request) => self.handle(frame, request).await,
            Err(err) => {
                warn!(error = %err, "undecodable request");
                message::invalid_frame_reply(frame)
            }
        }
    }

    /// Routes a request by command and role.
    ///
    /// `frame` is the request exactly as received, relayed unchanged when a
    /// secondary forwards a PUT.
    pub async fn handle(&self, frame: &str, request: Message) -> Message {
        debug!(command = %request.command(), key = request.key(), "handling request");

        if request.key().is_empty() {
            return request.reply(Command::InvalidCommand);
        }

        match (request.command(), self.config.role) {
            (Command::Get, _) => {
                resolve_read(request.key(), request.timestamp(), self.store.get(request.key()))
            }
            (Command::Put, _) if request.value().is_none() => {
                request.reply(Command::InvalidCommand)
            }
            (Command::Put, Role::Leader) => {
                let value = request.value().unwrap_or_default();
                self.writes
                    .put(&self.store, &self.config, request.key(), value)
                    .await
            }
            (Command::Put, Role::Secondary) => match &self.config.leader {
                Some(leader) => {
                    let config = &self.config;
                    forward_to_leader(
                        leader,
                        frame,
                        &request,
                        config.timeouts,
                        config.forward_timeout(),
                    )
                    .await
                }
                None => request.reply(Command::ForwardError),
            },
            (Command::Replication, Role::Secondary) => self.apply_replication(&request),
            _ => request.reply(Command::InvalidCommand),
        }
    }

    /// Applies a REPLICATION from the leader and acknowledges it.
    pub fn apply_replication(&self, request: &Message) -> Message {
        let key = request.key().to_string();
        let value = request.value().unwrap_or_default().to_string();
        let timestamp = request.timestamp();

        let entry = match self.config.policy {
            ReplicationPolicy::Unconditional => self.store.apply(key, value, timestamp),
            ReplicationPolicy::RejectStale => {
                match self.store.apply_if_not_older(key, value, timestamp) {
                    Applied::Stored(entry) => entry,
                    Applied::KeptNewer(entry) => {
                        debug!(
                            key = request.key(),
                            incoming = timestamp,
                            stored = entry.timestamp,
                            "kept newer entry over stale replication"
                        );
                        entry
                    }
                }
            }
        };

        Message::new(Command::ReplicationOk, request.key(), Some(entry.value), entry.timestamp)
    }
}
