use std::{fmt, io};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Upper bound on a single encoded message, newline included.
pub const MAX_FRAME_LEN: u64 = 1024 * 1024;

/// Command tag carried by every [`Message`].
///
/// Tags travel as their literal protocol strings (`"GET"`, `"PUT_OK"`,
/// `"Error forwarding request to leader"`, ...). Tags this node does not know
/// are kept verbatim in [`Command::Other`] so they can be echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    Get,
    Put,
    Replication,
    GetOk,
    Null,
    TryOtherServerOrLater,
    PutOk,
    PutError,
    ReplicationOk,
    ForwardError,
    InvalidCommand,
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Get => "GET",
            Command::Put => "PUT",
            Command::Replication => "REPLICATION",
            Command::GetOk => "GET_OK",
            Command::Null => "NULL",
            Command::TryOtherServerOrLater => "TRY_OTHER_SERVER_OR_LATER",
            Command::PutOk => "PUT_OK",
            Command::PutError => "PUT_ERROR",
            Command::ReplicationOk => "REPLICATION_OK",
            Command::ForwardError => "Error forwarding request to leader",
            Command::InvalidCommand => "Invalid Command",
            Command::Other(tag) => tag,
        }
    }
}

impl From<String> for Command {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "GET" => Command::Get,
            "PUT" => Command::Put,
            "REPLICATION" => Command::Replication,
            "GET_OK" => Command::GetOk,
            "NULL" => Command::Null,
            "TRY_OTHER_SERVER_OR_LATER" => Command::TryOtherServerOrLater,
            "PUT_OK" => Command::PutOk,
            "PUT_ERROR" => Command::PutError,
            "REPLICATION_OK" => Command::ReplicationOk,
            "Error forwarding request to leader" => Command::ForwardError,
            "Invalid Command" => Command::InvalidCommand,
            _ => Command::Other(tag),
        }
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        match command {
            Command::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of exchange for requests, replication and responses alike.
///
/// Fields are private: a message is built once and then only read or
/// re-tagged into a new message with [`Message::reply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    command: Command,
    #[serde(default)]
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default)]
    timestamp: u64,
}

impl Message {
    pub fn new(
        command: Command,
        key: impl Into<String>,
        value: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            command,
            key: key.into(),
            value,
            timestamp,
        }
    }

    pub fn get(key: impl Into<String>, timestamp: u64) -> Self {
        Self::new(Command::Get, key, None, timestamp)
    }

    /// Client write. The timestamp is left at 0 because the leader stamps its own.
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Command::Put, key, Some(value.into()), 0)
    }

    pub fn replication(key: impl Into<String>, value: impl Into<String>, timestamp: u64) -> Self {
        Self::new(Command::Replication, key, Some(value.into()), timestamp)
    }

    /// Same key/value/timestamp under a different command tag.
    pub fn reply(&self, command: Command) -> Self {
        Self::new(command, self.key.clone(), self.value.clone(), self.timestamp)
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Fields salvaged from a frame whose command could not be decoded.
#[derive(Deserialize)]
struct Salvage {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    timestamp: u64,
}

/// Builds the `Invalid Command` reply for an undecodable frame, echoing
/// whatever fields can still be recovered from it.
pub fn invalid_frame_reply(frame: &str) -> Message {
    match serde_json::from_str::<Salvage>(frame) {
        Ok(Salvage {
            key,
            value,
            timestamp,
        }) => Message::new(Command::InvalidCommand, key, value, timestamp),
        Err(_) => Message::new(Command::InvalidCommand, "", None, 0),
    }
}

pub fn decode(frame: &str) -> io::Result<Message> {
    serde_json::from_str(frame).map_err(to_io_error)
}

pub fn encode(message: &Message) -> io::Result<String> {
    serde_json::to_string(message).map_err(to_io_error)
}

/// Reads one newline-delimited frame, skipping blank lines.
///
/// Returns `Ok(None)` on a clean EOF and `InvalidData` when a frame exceeds
/// [`MAX_FRAME_LEN`] or is not UTF-8.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = (&mut *reader).take(MAX_FRAME_LEN).read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        if bytes as u64 >= MAX_FRAME_LEN && !line.ends_with('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds maximum length",
            ));
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(trimmed.to_string()));
    }
}

pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await? {
        Some(frame) => decode(&frame).map(Some),
        None => Ok(None),
    }
}

/// Writes a pre-encoded frame followed by the newline delimiter and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(frame.len() + 1);
    encoded.extend_from_slice(frame.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &encode(message)?).await
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_tags_match_wire_strings() {
        let message = Message::new(Command::ForwardError, "k", Some("v".into()), 7);
        let encoded = encode(&message).expect("encode");
        assert_eq!(
            encoded,
            concat!(
                r#"{"command":"Error forwarding request to leader","#,
                r#""key":"k","value":"v","timestamp":7}"#
            )
        );

        let decoded = decode(r#"{"command":"TRY_OTHER_SERVER_OR_LATER","key":"k","timestamp":3}"#)
            .expect("decode");
        assert_eq!(decoded.command(), &Command::TryOtherServerOrLater);
        assert_eq!(decoded.value(), None);
        assert_eq!(decoded.timestamp(), 3);
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let decoded = decode(r#"{"command":"DELETE","key":"k"}"#).expect("decode");
        assert_eq!(decoded.command(), &Command::Other("DELETE".into()));
        assert_eq!(decoded.timestamp(), 0);
        assert!(encode(&decoded).expect("encode").contains(r#""command":"DELETE""#));
    }

    #[test]
    fn tags_are_case_sensitive() {
        let decoded = decode(r#"{"command":"get","key":"k"}"#).expect("decode");
        assert_eq!(decoded.command(), &Command::Other("get".into()));
    }

    #[test]
    fn null_value_is_accepted() {
        let decoded = decode(r#"{"command":"GET","key":"k","value":null,"timestamp":0}"#)
            .expect("decode");
        assert_eq!(decoded, Message::get("k", 0));
    }

    #[test]
    fn invalid_frame_reply_salvages_fields() {
        let reply = invalid_frame_reply(r#"{"key":"k","value":"v","timestamp":9}"#);
        assert_eq!(
            reply,
            Message::new(Command::InvalidCommand, "k", Some("v".into()), 9)
        );

        let reply = invalid_frame_reply("not json at all");
        assert_eq!(reply, Message::new(Command::InvalidCommand, "", None, 0));
    }

    #[tokio::test]
    async fn frames_skip_blank_lines() {
        let input: &[u8] = b"\r\n\n{\"command\":\"GET\",\"key\":\"a\"}\r\n";
        let mut reader = tokio::io::BufReader::new(input);
        let message = read_message(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");
        assert_eq!(message, Message::get("a", 0));
        assert!(read_frame(&mut reader).await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn message_survives_the_wire() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let message = Message::replication("alice", "hello", 42);

        write_message(&mut writer, &message)
            .await
            .expect("write message");
        let parsed = read_message(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(message, parsed);
    }
}
