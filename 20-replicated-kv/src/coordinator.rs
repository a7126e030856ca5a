//! Leader write path.
//!
//! A PUT at the leader is stamped, applied locally, then pushed to every
//! secondary as a REPLICATION. The client hears `PUT_OK` only when every
//! secondary acknowledged; otherwise `PUT_ERROR`, with the local write kept.
//!
//! Writes to the same key are serialized from stamping through the end of
//! fan-out, so secondaries receive one key's replications in the order the
//! leader committed them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::{ReplicaConfig, Timeouts};
use crate::message::{Command, Message};
use crate::peer;
use crate::store::ReplicaStore;

/// Lazily created async mutex per key.
///
/// Keys are never deleted from the store, so neither are their locks.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Default)]
pub struct WriteCoordinator {
    locks: KeyLocks,
}

impl WriteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a client PUT on the leader. Any client timestamp is ignored.
    pub async fn put(
        &self,
        store: &ReplicaStore,
        config: &ReplicaConfig,
        key: &str,
        value: &str,
    ) -> Message {
        let _guard = self.locks.lock(key).await;

        let entry = store.stamp_and_apply(key.to_string(), value.to_string(), now_millis());
        debug!(key, timestamp = entry.timestamp, "applied write locally");

        if let Some(delay) = config.delay.sample() {
            debug!(key, ?delay, "delaying replication");
            tokio::time::sleep(delay).await;
        }

        let replication = Message::replication(key, entry.value.clone(), entry.timestamp);
        let secondaries: Vec<&str> = config.membership.secondaries().collect();
        let acks = replicate(&secondaries, &replication, config.timeouts).await;

        let command = if acks == secondaries.len() {
            Command::PutOk
        } else {
            warn!(
                key,
                timestamp = entry.timestamp,
                acks,
                expected = secondaries.len(),
                "write not acknowledged by every secondary"
            );
            Command::PutError
        };
        Message::new(command, key, Some(entry.value), entry.timestamp)
    }
}

/// Sends `replication` to every secondary concurrently and counts the
/// `REPLICATION_OK` replies.
async fn replicate(secondaries: &[&str], replication: &Message, timeouts: Timeouts) -> usize {
    let replies = join_all(secondaries.iter().map(|address| async move {
        (*address, peer::request(address, replication, timeouts).await)
    }))
    .await;

    replies
        .into_iter()
        .filter(|(address, reply)| match reply {
            Ok(reply) if reply.command() == &Command::ReplicationOk => true,
            Ok(reply) => {
                warn!(
                    peer = %address,
                    command = %reply.command(),
                    "secondary rejected replication"
                );
                false
            }
            Err(err) => {
                warn!(peer = %address, error = ?err, "replication failed");
                false
            }
        })
        .count()
}

/// Wall clock in milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
