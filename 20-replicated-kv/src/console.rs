//! Line parsing for the interactive client.

use anyhow::{Result, anyhow};

pub const HELP: &str = "commands: PUT/p <key> <value>, GET/g <key>, HELP/h, EXIT/e";

/// Commands that can be typed at the client prompt.
#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Put { key: String, value: String },
    Get { key: String },
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses one line of input.
    ///
    /// Command words are case-insensitive and accept single-letter aliases.
    /// Keys are a single word; a PUT value is the rest of the line, so it may
    /// contain spaces.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (trimmed, ""),
        };
        if word.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let cmd = word.to_uppercase();
        let normalized_cmd = match cmd.as_str() {
            "P" => "PUT",
            "G" => "GET",
            "H" => "HELP",
            "E" | "QUIT" => "EXIT",
            other => other,
        };

        match normalized_cmd {
            "EXIT" if rest.is_empty() => Ok(ConsoleCommand::Exit),
            "HELP" if rest.is_empty() => Ok(ConsoleCommand::Help),
            "GET" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
                [key] => Ok(ConsoleCommand::Get {
                    key: key.to_string(),
                }),
                _ => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            },
            "PUT" => match rest.split_once(char::is_whitespace) {
                Some((key, value)) if !value.trim().is_empty() => Ok(ConsoleCommand::Put {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                }),
                _ => Err(anyhow!("PUT requires a key and a value: PUT <key> <value>")),
            },
            _ => Err(anyhow!("invalid command. Try: {HELP}")),
        }
    }
}
