//! OpenPGP backend capability interface.
//!
//! The protocol engine never depends on a specific backend: `GpgCli` drives
//! the GnuPG command line tool in production, `MemoryPgp` provides a
//! deterministic in-process keyring for tests.

mod cli;
mod memory;

pub use cli::GpgCli;
pub use memory::MemoryPgp;

use crate::error::Result;

/// A public key as reported by the backend.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub key_id: String,
    pub fingerprint: String,
    /// Human-readable identity strings ("Name <email>").
    pub uids: Vec<String>,
}

/// Outcome of successfully verifying a detached signature.
#[derive(Debug, Clone)]
pub struct Verification {
    pub key_id: String,
    pub fingerprint: String,
    /// Creation time embedded in the signature itself.
    pub sig_timestamp: i64,
}

pub trait Pgp: Send + Sync {
    /// Produce a detached armored signature over `data`, with the signature
    /// creation time pinned to `now`.
    fn sign_detached(&self, data: &[u8], key_id: &str, now: i64) -> Result<String>;

    /// Verify a detached armored signature over `data`. An invalid
    /// signature is an error, not a degraded `Verification`.
    fn verify_detached(&self, signature: &str, data: &[u8]) -> Result<Verification>;

    /// Public keys matching `query` in the local keyring.
    fn list_keys(&self, query: &str) -> Result<Vec<KeyInfo>>;

    /// Inspect armored key material without importing it.
    fn scan_keys(&self, armored: &str) -> Result<Vec<KeyInfo>>;

    /// Import armored key material; returns the number of keys imported.
    fn import_keys(&self, armored: &str) -> Result<usize>;

    /// Export the armored public key for `key_id`.
    fn export_key(&self, key_id: &str) -> Result<String>;
}
