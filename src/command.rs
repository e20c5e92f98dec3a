//! Command-line parsing for the five protocol verbs

use std::fmt;

use crate::protocol::{reply, verb, EOT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Files,
    Get(String),
    Put(String),
    Quit,
    /// Unrecognized or malformed input; carries the text sent back to the peer
    Invalid(String),
}

/// A command plus whatever bytes followed its line terminator in the same read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub trailing: Vec<u8>,
}

impl Command {
    /// Parse one received read. The line ends at the first `\n`; anything after
    /// it is returned as `trailing` (the head of a Put upload).
    pub fn parse(raw: &[u8]) -> ParsedCommand {
        let (line, trailing) = match raw.iter().position(|&b| b == b'\n') {
            Some(pos) => (&raw[..pos], raw[pos + 1..].to_vec()),
            None => (raw, Vec::new()),
        };
        let text = String::from_utf8_lossy(line);
        ParsedCommand {
            command: Self::parse_line(&text),
            trailing,
        }
    }

    /// True if a read holds nothing but whitespace and stray sentinels. Such a
    /// read is not a command and must not be answered.
    pub fn is_blank(raw: &[u8]) -> bool {
        raw.iter().all(|&b| b.is_ascii_whitespace() || b == EOT)
    }

    pub fn parse_line(line: &str) -> Command {
        let line = line.trim_matches(|c: char| c.is_whitespace() || c == EOT as char);
        let mut parts = line.split_whitespace();
        let head = parts.next().unwrap_or("");
        let arg = parts.next();
        let extra = parts.next().is_some();

        match (head, arg, extra) {
            (verb::LIST, None, _) => Command::List,
            (verb::FILES, None, _) => Command::Files,
            (verb::QUIT, None, _) => Command::Quit,
            (verb::GET, Some(name), false) => Command::Get(name.to_string()),
            (verb::PUT, Some(name), false) => Command::Put(name.to_string()),
            (verb::GET, _, _) | (verb::PUT, _, _) => Command::Invalid(reply::usage(head)),
            _ => Command::Invalid(reply::INVALID_COMMAND.to_string()),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::List => verb::LIST,
            Command::Files => verb::FILES,
            Command::Get(_) => verb::GET,
            Command::Put(_) => verb::PUT,
            Command::Quit => verb::QUIT,
            Command::Invalid(_) => "Invalid",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get(name) | Command::Put(name) => write!(f, "{} {}", self.verb(), name),
            _ => f.write_str(self.verb()),
        }
    }
}
