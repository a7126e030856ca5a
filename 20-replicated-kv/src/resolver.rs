//! Session-consistent reads.
//!
//! Any replica answers GET from its own store. The client sends the highest
//! timestamp it has seen for the key; a replica whose copy is older than that
//! refuses to answer with a value so the client never goes back in time.

use crate::message::{Command, Message};
use crate::store::Entry;

/// Resolves a GET for `key` against the locally stored entry.
pub fn resolve_read(key: &str, client_timestamp: u64, stored: Option<Entry>) -> Message {
    match stored {
        None => Message::new(Command::Null, key, None, 0),
        Some(Entry { timestamp, .. }) if timestamp < client_timestamp => {
            Message::new(Command::TryOtherServerOrLater, key, None, timestamp)
        }
        Some(Entry { value, timestamp }) => {
            Message::new(Command::GetOk, key, Some(value), timestamp)
        }
    }
}
