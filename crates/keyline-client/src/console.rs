//! Operator console command parsing.

use thiserror::Error;

pub const HELP: &str =
    "commands: connect | handshake [p] [g] | send <text> | end | status | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Handshake { p: Option<u64>, g: Option<u64> },
    Send(String),
    End,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("usage: send <text>")]
    MissingText,
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("usage: handshake [p] [g]")]
    TooManyArguments,
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "connect" => Command::Connect,
        "handshake" => {
            let mut args = rest.split_whitespace();
            let p = args.next().map(parse_number).transpose()?;
            let g = args.next().map(parse_number).transpose()?;
            if args.next().is_some() {
                return Err(ParseError::TooManyArguments);
            }
            Command::Handshake { p, g }
        }
        "send" => {
            if rest.is_empty() {
                return Err(ParseError::MissingText);
            }
            Command::Send(rest.to_string())
        }
        "end" => Command::End,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err(ParseError::Unknown(verb.to_string())),
    };
    Ok(Some(command))
}

fn parse_number(arg: &str) -> Result<u64, ParseError> {
    arg.parse()
        .map_err(|_| ParseError::InvalidNumber(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_arguments() {
        assert_eq!(
            parse_command("handshake"),
            Ok(Some(Command::Handshake { p: None, g: None }))
        );
        assert_eq!(
            parse_command("handshake 7919"),
            Ok(Some(Command::Handshake {
                p: Some(7919),
                g: None
            }))
        );
        assert_eq!(
            parse_command("handshake 7919 5"),
            Ok(Some(Command::Handshake {
                p: Some(7919),
                g: Some(5)
            }))
        );
        assert_eq!(
            parse_command("handshake x"),
            Err(ParseError::InvalidNumber("x".into()))
        );
        assert_eq!(
            parse_command("handshake 1 2 3"),
            Err(ParseError::TooManyArguments)
        );
    }

    #[test]
    fn test_send_keeps_inner_whitespace() {
        assert_eq!(
            parse_command("send hello   there "),
            Ok(Some(Command::Send("hello   there".into())))
        );
        assert_eq!(parse_command("send"), Err(ParseError::MissingText));
        assert_eq!(parse_command("send   "), Err(ParseError::MissingText));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("connect"), Ok(Some(Command::Connect)));
        assert_eq!(parse_command("END"), Ok(Some(Command::End)));
        assert_eq!(parse_command("quit"), Ok(Some(Command::Quit)));
        assert_eq!(parse_command("status"), Ok(Some(Command::Status)));
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(
            parse_command("launch"),
            Err(ParseError::Unknown("launch".into()))
        );
    }
}
