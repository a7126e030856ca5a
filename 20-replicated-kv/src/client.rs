use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Result, ensure};
use rand::seq::SliceRandom;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::{
    cli::ClientArgs,
    config::Timeouts,
    console::{ConsoleCommand, HELP},
    message::{Command, Message},
    peer,
};

/// Default bound on waiting for a PUT reply. Covers a forward through a
/// secondary to a leader that runs with default timeouts.
pub const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_secs(15);

/// Client side of the protocol with its per-key session timestamps.
///
/// Each request goes to a randomly chosen server. The highest timestamp seen
/// for a key is sent with later GETs so a lagging replica answers
/// `TRY_OTHER_SERVER_OR_LATER` instead of an older value.
pub struct Client {
    servers: Vec<String>,
    timeouts: Timeouts,
    put_timeout: Duration,
    last_seen: HashMap<String, u64>,
}

impl Client {
    pub fn new(servers: Vec<String>, timeout: Duration) -> Result<Self> {
        ensure!(!servers.is_empty(), "client needs at least one server");
        Ok(Self {
            servers,
            timeouts: Timeouts {
                connect: timeout,
                io: timeout,
            },
            put_timeout: DEFAULT_PUT_TIMEOUT.max(timeout),
            last_seen: HashMap::new(),
        })
    }

    pub fn with_put_timeout(mut self, put_timeout: Duration) -> Self {
        self.put_timeout = put_timeout;
        self
    }

    pub async fn put(&mut self, key: &str, value: &str) -> Result<Message> {
        let server = self.pick_server().to_string();
        self.put_to(&server, key, value).await
    }

    pub async fn get(&mut self, key: &str) -> Result<Message> {
        let server = self.pick_server().to_string();
        self.get_from(&server, key).await
    }

    /// PUTs wait up to the PUT timeout, since the reply only comes once the
    /// leader has replicated.
    pub async fn put_to(&mut self, server: &str, key: &str, value: &str) -> Result<Message> {
        self.exchange(server, Message::put(key, value), self.put_timeout).await
    }

    pub async fn get_from(&mut self, server: &str, key: &str) -> Result<Message> {
        let request = Message::get(key, self.last_seen(key));
        self.request_to(server, request).await
    }

    /// Sends `request` to a specific server and records the reply's timestamp.
    pub async fn request_to(&mut self, server: &str, request: Message) -> Result<Message> {
        self.exchange(server, request, self.timeouts.io).await
    }

    async fn exchange(
        &mut self,
        server: &str,
        request: Message,
        reply_within: Duration,
    ) -> Result<Message> {
        debug!(server, command = %request.command(), key = request.key(), "sending request");
        let reply = peer::request_within(server, &request, self.timeouts, reply_within).await?;
        self.observe(&reply);
        Ok(reply)
    }

    /// Highest timestamp observed for `key`, 0 if none.
    pub fn last_seen(&self, key: &str) -> u64 {
        self.last_seen.get(key).copied().unwrap_or(0)
    }

    fn observe(&mut self, reply: &Message) {
        if reply.key().is_empty() {
            return;
        }
        let seen = self.last_seen.entry(reply.key().to_string()).or_insert(0);
        *seen = (*seen).max(reply.timestamp());
    }

    fn pick_server(&self) -> &str {
        self.servers
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// One-line human rendering of a reply.
pub fn render_response(reply: &Message) -> String {
    let key = reply.key();
    let ts = reply.timestamp();
    match reply.command() {
        Command::GetOk => format!("{key} = {} (ts {ts})", reply.value().unwrap_or_default()),
        Command::Null => format!("{key} is not set"),
        Command::TryOtherServerOrLater => {
            format!("{key}: replica is behind (ts {ts}), try another server or later")
        }
        Command::PutOk => {
            format!("stored {key} = {} (ts {ts})", reply.value().unwrap_or_default())
        }
        Command::PutError => format!(
            "stored {key} = {} at leader only, replication incomplete (ts {ts})",
            reply.value().unwrap_or_default()
        ),
        other => format!("{other}: key={key} ts={ts}"),
    }
}

/// Interactive loop: one console command per stdin line, one output line per reply.
pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = Client::new(args.servers, Duration::from_millis(args.timeout_ms))?
        .with_put_timeout(Duration::from_millis(args.put_timeout_ms));
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        if stdin.read_line(&mut input).await? == 0 {
            break;
        }
        if input.trim().is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(&input) {
            Ok(command) => command,
            Err(err) => {
                write_stderr(&format!("!!! {err}")).await?;
                continue;
            }
        };

        let reply = match command {
            ConsoleCommand::Put { key, value } => client.put(&key, &value).await,
            ConsoleCommand::Get { key } => client.get(&key).await,
            ConsoleCommand::Help => {
                write_stdout(HELP).await?;
                continue;
            }
            ConsoleCommand::Exit => break,
        };

        match reply {
            Ok(reply) => write_stdout(&render_response(&reply)).await?,
            Err(err) => write_stderr(&format!("!!! request failed: {err:#}")).await?,
        }
    }

    write_stdout("*** bye").await?;
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
