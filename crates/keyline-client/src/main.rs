#![forbid(unsafe_code)]

//! Keyline client with an interactive operator console on stdin.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use keyline_client::console::{parse_command, Command, HELP};
use keyline_client::{Client, ClientConfig, ClientEvent};
use keyline_crypto::TerminateOutcome;

#[derive(Parser, Debug)]
#[command(name = "keyline-client")]
#[command(about = "Keyline client - DH handshake and sealed messaging over TCP")]
struct Args {
    /// Server address (host:port)
    #[arg(long, env = "KEYLINE_CONNECT", default_value = "127.0.0.1:12345")]
    connect: String,

    /// Disable HMAC tags on sealed frames
    #[arg(long, env = "KEYLINE_NO_MAC", default_value_t = false)]
    no_mac: bool,

    /// Directory for the key log file
    #[arg(long, env = "KEYLINE_KEYLOG_DIR")]
    keylog_dir: Option<PathBuf>,

    /// Seconds to wait for the server's handshake reply
    #[arg(long, default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    keyline_common::init_tracing_with_default(&args.log_level);

    if args.no_mac {
        warn!("message authentication disabled");
    }

    let mut client = Client::new(ClientConfig {
        server_addr: args.connect,
        auth_enabled: !args.no_mac,
        keylog_dir: args.keylog_dir,
        handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
    });

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_command(&mut client, &line).await {
                        break;
                    }
                }
                None => break,
            },
            event = client.next_event() => report(&event),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}

fn report(event: &ClientEvent) {
    match event {
        ClientEvent::Message(text) => println!("server: {text}"),
        ClientEvent::SessionEnded => println!("server ended the session; run `handshake` again"),
        ClientEvent::Disconnected(Some(reason)) => println!("disconnected: {reason}"),
        ClientEvent::Disconnected(None) => println!("disconnected"),
    }
}

/// Execute one console line; returns `false` on quit.
async fn run_command(client: &mut Client, line: &str) -> bool {
    let command = match parse_command(line) {
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(e) => {
            println!("{e}");
            return true;
        }
    };

    for event in client.poll_events() {
        report(&event);
    }

    match command {
        Command::Connect => match client.connect().await {
            Ok(true) => println!("connected to {}", client.config().server_addr),
            Ok(false) => println!("already connected"),
            Err(e) => println!("connect: {e}"),
        },
        Command::Handshake { p, g } => match client.handshake(p, g).await {
            Ok(derivation) => println!(
                "session established ({} A={} B={})",
                derivation.params, derivation.client_public, derivation.server_public
            ),
            Err(e) => println!("handshake: {e}"),
        },
        Command::Send(text) => {
            if let Err(e) = client.send(&text).await {
                println!("send: {e}");
            }
        }
        Command::End => match client.terminate().await {
            Ok(TerminateOutcome::Terminated(_)) => println!("session ended"),
            Ok(TerminateOutcome::NoActiveSession) => println!("no active session"),
            Err(e) => println!("end: {e}"),
        },
        Command::Status => match client.peer_addr() {
            Some(peer) => println!("connected to {peer}, session {}", client.state()),
            None => println!("not connected"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}
