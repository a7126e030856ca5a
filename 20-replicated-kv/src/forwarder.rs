//! Secondary write path: relay a client PUT to the leader and relay the answer back.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Timeouts;
use crate::message::{Command, Message};
use crate::peer;

/// Forwards the client's original `frame` to `leader` byte-for-byte.
///
/// Returns the leader's reply unchanged, or an `Error forwarding request to
/// leader` message carrying the request's key/value/timestamp when the leader
/// cannot be reached or does not answer within `reply_within`. That bound
/// must cover the leader's whole PUT, replication delay and fan-out included.
pub async fn forward_to_leader(
    leader: &str,
    frame: &str,
    request: &Message,
    timeouts: Timeouts,
    reply_within: Duration,
) -> Message {
    match peer::request_frame(leader, frame, timeouts, reply_within).await {
        Ok(reply) => {
            debug!(leader, key = request.key(), command = %reply.command(), "leader replied");
            reply
        }
        Err(err) => {
            warn!(
                leader,
                key = request.key(),
                error = ?err,
                "failed to forward request to leader"
            );
            request.reply(Command::ForwardError)
        }
    }
}
