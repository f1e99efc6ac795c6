//! Operator console command parsing.

use thiserror::Error;

pub const HELP: &str = "commands: list | end <id> | kick <id> | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    End(u64),
    Kick(u64),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("usage: {0} <id>")]
    MissingId(&'static str),
    #[error("invalid connection id `{0}`")]
    InvalidId(String),
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" => Command::List,
        "end" => Command::End(parse_id("end", parts.next())?),
        "kick" => Command::Kick(parse_id("kick", parts.next())?),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err(ParseError::Unknown(verb.to_string())),
    };
    Ok(Some(command))
}

fn parse_id(verb: &'static str, arg: Option<&str>) -> Result<u64, ParseError> {
    let arg = arg.ok_or(ParseError::MissingId(verb))?;
    arg.parse()
        .map_err(|_| ParseError::InvalidId(arg.to_string()))
}
