//! Append-only key log for inspecting captured traffic.
//!
//! Every completed handshake appends one entry to
//! `<dir>/<role>.log` or `<dir>/<role>_<id>.log`:
//!
//! ```text
//! [2024-01-01T12:00:00Z] p=7919 g=5 A=1234 B=4321 shared=999
//! enc_key_hex=...
//! mac_key_hex=...
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::handshake::{KeyDerivation, Role};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Key log rooted at a directory.
#[derive(Debug, Clone)]
pub struct KeyLog {
    dir: PathBuf,
}

impl KeyLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an entry for `role` and optional connection `id` goes to.
    pub fn path_for(&self, role: Role, id: Option<u64>) -> PathBuf {
        let name = match id {
            Some(id) => format!("{}_{}.log", role.as_str(), id),
            None => format!("{}.log", role.as_str()),
        };
        self.dir.join(name)
    }

    /// Append an entry for `derivation`, creating the directory if needed.
    pub fn record(&self, derivation: &KeyDerivation) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(derivation.role, derivation.connection_id);
        let entry = format_entry(derivation, Utc::now());

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(entry.as_bytes())?;

        debug!(path = %path.display(), "key log entry written");
        Ok(path)
    }
}

/// Render one entry, terminated by a blank line.
pub fn format_entry(derivation: &KeyDerivation, timestamp: DateTime<Utc>) -> String {
    format!(
        "[{}] p={} g={} A={} B={} shared={}\nenc_key_hex={}\nmac_key_hex={}\n\n",
        timestamp.format(TIMESTAMP_FORMAT),
        derivation.params.p(),
        derivation.params.g(),
        derivation.client_public,
        derivation.server_public,
        derivation.shared.expose(),
        hex::encode(derivation.keys.enc_key()),
        hex::encode(derivation.keys.mac_key()),
    )
}
