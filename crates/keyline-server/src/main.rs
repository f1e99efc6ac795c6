#![forbid(unsafe_code)]

//! Keyline server with an interactive operator console on stdin.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use keyline_crypto::TerminateOutcome;
use keyline_server::console::{parse_command, Command, HELP};
use keyline_server::{Admin, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "keyline-server")]
#[command(about = "Keyline server - DH handshake and sealed messaging over TCP")]
struct Args {
    /// TCP listen address
    #[arg(long, env = "KEYLINE_LISTEN", default_value = "0.0.0.0:12345")]
    listen: SocketAddr,

    /// Maximum concurrent clients
    #[arg(long, env = "KEYLINE_MAX_CLIENTS")]
    max_clients: usize,

    /// Disable HMAC tags on sealed frames
    #[arg(long, env = "KEYLINE_NO_MAC", default_value_t = false)]
    no_mac: bool,

    /// Directory for per-handshake key log files
    #[arg(long, env = "KEYLINE_KEYLOG_DIR")]
    keylog_dir: Option<PathBuf>,

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

    let config = ServerConfig {
        listen: args.listen,
        max_clients: args.max_clients,
        auth_enabled: !args.no_mac,
        keylog_dir: args.keylog_dir,
    };

    let server = Server::bind(config).await?;
    let admin = server.admin();
    let accept_loop = tokio::spawn(server.run());

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_command(&admin, &line).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    admin.shutdown().await;
    match accept_loop.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "accept loop task failed"),
    }
    Ok(())
}

/// Execute one console line; returns `false` on quit.
async fn run_command(admin: &Admin, line: &str) -> bool {
    let command = match parse_command(line) {
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(e) => {
            println!("{e}");
            return true;
        }
    };

    match command {
        Command::List => {
            let rows = admin.list().await;
            if rows.is_empty() {
                println!("no connections");
            }
            for row in rows {
                match row.state {
                    Some(state) => println!("{:>4}  {:<22} {}", row.id, row.peer, state),
                    None => println!("{:>4}  {:<22} busy", row.id, row.peer),
                }
            }
        }
        Command::End(id) => match admin.terminate(id).await {
            Ok(TerminateOutcome::Terminated(_)) => println!("session {id} ended"),
            Ok(TerminateOutcome::NoActiveSession) => println!("connection {id} has no active session"),
            Err(e) => println!("end {id}: {e}"),
        },
        Command::Kick(id) => match admin.kick(id).await {
            Ok(()) => println!("connection {id} kicked"),
            Err(e) => println!("kick {id}: {e}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}
