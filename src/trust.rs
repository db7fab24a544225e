//! Trust-on-first-use acquisition of server signing keys.
//!
//! The first successful key fetch for a server establishes long-term trust;
//! later sessions reuse the cached binding and only refetch when the cached
//! key has disappeared from the local keyring.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::client;
use crate::error::Error;
use crate::git::Repository;
use crate::gpg::Pgp;

/// Pluggable store for the server-id → key binding, so tests can run
/// against an in-memory map instead of git config.
pub trait KeyStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Production store: `timestamper.<server>.keyid` / `.name` in git config,
/// written globally with a repo-local fallback.
pub struct GitConfigStore<'a> {
    repo: &'a Repository,
}

impl<'a> GitConfigStore<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }
}

impl KeyStore for GitConfigStore<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.repo.config_get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.repo.config_set(key, value)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Stable cache key for a server URL: scheme and trailing slashes stripped,
/// everything outside `[0-9a-z]` mapped to `-`.
pub fn normalize_server_name(server: &str) -> String {
    let name = server
        .strip_prefix("http://")
        .or_else(|| server.strip_prefix("https://"))
        .unwrap_or(server);
    let name = name.trim_end_matches('/');
    name.chars()
        .map(|c| if c.is_ascii_digit() || c.is_ascii_lowercase() { c } else { '-' })
        .collect()
}

/// Return the cached (key id, full name) binding for `server`, or fetch the
/// server's public key TOFU-style, import it and persist the new binding.
pub fn resolve_key(
    server: &str,
    store: &dyn KeyStore,
    pgp: &dyn Pgp,
    quiet: bool,
) -> Result<(String, String)> {
    let keyname = normalize_server_name(server);
    let keyid_key = format!("timestamper.{}.keyid", keyname);
    let name_key = format!("timestamper.{}.name", keyname);

    if let Some(keyid) = store.get(&keyid_key)? {
        if pgp.list_keys(&keyid)?.is_empty() {
            tracing::warn!(
                "key {} missing in keyring; refetching timestamper key",
                keyid
            );
        } else if let Some(name) = store.get(&name_key)? {
            return Ok((keyid, name));
        }
    }

    let text = fetch_public_key(server)?;
    let (keyid, name) = validate_key_and_import(&text, pgp, quiet)?;
    store.set(&keyid_key, &keyid)?;
    store.set(&name_key, &name)?;
    Ok((keyid, name))
}

fn fetch_public_key(server: &str) -> Result<String> {
    let http = client::http_client()?;
    let resp = http
        .get(server)
        .query(&[("request", "get-public-key-v1")])
        .send()
        .map_err(|e| Error::Transport(format!("cannot connect to server: {}", e)))?;
    client::check_http_status(server, &resp)?;
    resp.text().context("failed to read public key response")
}

/// Require exactly one public key with at least one identity, then import.
fn validate_key_and_import(
    text: &str,
    pgp: &dyn Pgp,
    quiet: bool,
) -> Result<(String, String)> {
    let info = pgp.scan_keys(text)?;
    if info.len() != 1 || info[0].uids.is_empty() {
        return Err(Error::Validation(
            "invalid key returned; maybe not a timestamping server".into(),
        )
        .into());
    }
    let imported = pgp.import_keys(text)?;
    if imported == 1 && !quiet {
        tracing::info!("imported new key {}: {}", info[0].key_id, info[0].uids[0]);
    }
    Ok((info[0].key_id.clone(), info[0].uids[0].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpg::MemoryPgp;

    #[test]
    fn test_normalize_server_name() {
        assert_eq!(
            normalize_server_name("https://gitta.zeitgitter.net"),
            "gitta-zeitgitter-net"
        );
        assert_eq!(
            normalize_server_name("http://localhost:8080/"),
            "localhost-8080"
        );
        assert_eq!(
            normalize_server_name("Stamper.Example.com///"),
            "-tamper--xample-com"
        );
    }

    #[test]
    fn test_validate_key_and_import() {
        let server_ring = MemoryPgp::with_key("AAAA", "FPRA", "Svc <s@e.c>");
        let armored = server_ring.export_key("AAAA").unwrap();

        let local = MemoryPgp::new();
        let (keyid, name) = validate_key_and_import(&armored, &local, true).unwrap();
        assert_eq!(keyid, "AAAA");
        assert_eq!(name, "Svc <s@e.c>");
        assert_eq!(local.list_keys("AAAA").unwrap().len(), 1);
    }

    #[test]
    fn test_validate_key_rejects_garbage() {
        let local = MemoryPgp::new();
        assert!(validate_key_and_import("not a key", &local, true).is_err());
    }

    #[test]
    fn test_cached_binding_reused() {
        let store = MemoryStore::new();
        let pgp = MemoryPgp::with_key("AAAA", "FPRA", "Svc <s@e.c>");
        store.set("timestamper.s-example-com.keyid", "AAAA").unwrap();
        store.set("timestamper.s-example-com.name", "Svc <s@e.c>").unwrap();

        // Cached and resolvable: no network fetch happens.
        let (keyid, name) = resolve_key("https://s.example.com", &store, &pgp, true).unwrap();
        assert_eq!(keyid, "AAAA");
        assert_eq!(name, "Svc <s@e.c>");
    }
}
