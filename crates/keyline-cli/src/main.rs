//! Keyline CLI tools: offline decryption, parameter generation.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use tracing::debug;

use keyline_core::{SecureFrame, SecurePayload};
use keyline_crypto::{xor_stream, DhParams, SecureChannel, KEY_SIZE};

#[derive(Parser, Debug)]
#[command(name = "keyline")]
#[command(about = "Keyline CLI tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decrypt a captured SECURE ciphertext with a logged key
    Decrypt {
        /// enc_key_hex from a key log file
        #[arg(long)]
        enc_key_hex: String,

        /// `ciphertext` field of the SECURE message
        #[arg(long)]
        ciphertext_b64: String,

        /// mac_key_hex from the key log; checks the tag when given with --mac-b64
        #[arg(long, requires = "mac_b64")]
        mac_key_hex: Option<String>,

        /// `mac` field of the SECURE message
        #[arg(long, requires = "mac_key_hex")]
        mac_b64: Option<String>,
    },

    /// Generate demo Diffie-Hellman parameters
    Params {
        /// Number of parameter sets to print
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    keyline_common::init_tracing_with_default("warn");

    let args = Args::parse();

    match args.command {
        Command::Decrypt {
            enc_key_hex,
            ciphertext_b64,
            mac_key_hex,
            mac_b64,
        } => {
            let plaintext = match (mac_key_hex, mac_b64) {
                (Some(mac_key_hex), Some(mac_b64)) => {
                    let payload =
                        open_verified(&enc_key_hex, &mac_key_hex, &ciphertext_b64, &mac_b64)?;
                    println!("tag: ok");
                    serde_json::to_string(&payload)?
                }
                _ => decrypt(&enc_key_hex, &ciphertext_b64)?,
            };
            println!("{plaintext}");
        }
        Command::Params { count } => {
            for _ in 0..count {
                let params = DhParams::generate();
                println!("p={} g={}", params.p(), params.g());
            }
        }
        Command::Version => {
            println!("keyline {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Undo the stream transform; invalid UTF-8 is replaced, not rejected.
fn decrypt(enc_key_hex: &str, ciphertext_b64: &str) -> Result<String> {
    let enc_key = hex::decode(enc_key_hex.trim()).context("enc key is not hex")?;
    let ciphertext = STANDARD
        .decode(ciphertext_b64.trim())
        .context("ciphertext is not base64")?;
    debug!(len = ciphertext.len(), key_len = enc_key.len(), "decrypting");

    let plaintext = xor_stream(&ciphertext, &enc_key)?;
    Ok(String::from_utf8_lossy(&plaintext).into_owned())
}

/// Verify the tag and parse the inner message.
fn open_verified(
    enc_key_hex: &str,
    mac_key_hex: &str,
    ciphertext_b64: &str,
    mac_b64: &str,
) -> Result<SecurePayload> {
    let channel = SecureChannel::new(key_from_hex(enc_key_hex)?, Some(key_from_hex(mac_key_hex)?), true)?;
    let frame = SecureFrame {
        ciphertext: ciphertext_b64.trim().to_string(),
        mac: Some(mac_b64.trim().to_string()),
    };
    Ok(channel.open(&frame)?)
}

fn key_from_hex(key_hex: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = hex::decode(key_hex.trim()).context("key is not hex")?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("key must be {KEY_SIZE} bytes, got {}", b.len()))
}
