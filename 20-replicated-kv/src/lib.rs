//! Leader/secondary replicated key-value store over a JSON line protocol.
//!
//! Every node answers GET from its own store. PUTs are sequenced by a single
//! leader fixed at startup: the leader stamps the write, applies it, and
//! replicates it to every secondary before answering; secondaries forward
//! client PUTs to the leader. Per-key timestamps let a client detect a
//! replica that is behind what it has already seen.
//!
//! - [`message`] defines the wire message and the newline-delimited JSON codec.
//! - [`store`] holds the per-node key -> (value, timestamp) map.
//! - [`topology`] and [`config`] describe roles, membership and timeouts.
//! - [`replica`] routes one request to the [`resolver`], the
//!   [`coordinator`], the [`forwarder`], or the replication applier.
//! - [`server`] accepts connections, one request per connection.
//! - [`peer`] performs bounded outbound request/response exchanges.
//! - [`client`] and [`console`] implement the interactive client.
//! - [`cli`] parses the command-line interface.

pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod forwarder;
pub mod message;
pub mod peer;
pub mod replica;
pub mod resolver;
pub mod server;
pub mod store;
pub mod topology;
