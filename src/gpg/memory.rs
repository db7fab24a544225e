//! Deterministic in-memory OpenPGP adapter for tests.
//!
//! Signatures are plain-text blocks wrapped in real armor markers so the
//! byte-level artifact checks (blank line after BEGIN, space-indented
//! gpgsig folding) exercise the same paths as GnuPG output.

use std::sync::Mutex;

use sha1::{Digest, Sha1};

use super::{KeyInfo, Pgp, Verification};
use crate::error::{Error, Result};

const KEY_MARKER: &str = "memorykey:";
const SIG_MARKER: &str = "memorysig:";

pub struct MemoryPgp {
    keys: Mutex<Vec<KeyInfo>>,
}

impl MemoryPgp {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
        }
    }

    /// A keyring holding one signing-capable key.
    pub fn with_key(key_id: &str, fingerprint: &str, uid: &str) -> Self {
        let pgp = Self::new();
        pgp.keys.lock().unwrap().push(KeyInfo {
            key_id: key_id.to_string(),
            fingerprint: fingerprint.to_string(),
            uids: vec![uid.to_string()],
        });
        pgp
    }

    fn armor_key(info: &KeyInfo) -> String {
        format!(
            "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\n{}{}:{}:{}\n-----END PGP PUBLIC KEY BLOCK-----\n",
            KEY_MARKER,
            info.key_id,
            info.fingerprint,
            info.uids.join("|")
        )
    }

    fn digest(data: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    fn find(&self, query: &str) -> Option<KeyInfo> {
        let query = query.to_ascii_uppercase();
        self.keys
            .lock()
            .unwrap()
            .iter()
            .find(|k| {
                k.key_id.to_ascii_uppercase() == query
                    || k.fingerprint.to_ascii_uppercase() == query
                    || k.fingerprint.to_ascii_uppercase().ends_with(&query)
            })
            .cloned()
    }
}

impl Default for MemoryPgp {
    fn default() -> Self {
        Self::new()
    }
}

impl Pgp for MemoryPgp {
    fn sign_detached(&self, data: &[u8], key_id: &str, now: i64) -> Result<String> {
        let key = self
            .find(key_id)
            .ok_or_else(|| Error::Gpg(format!("no secret key for {}", key_id)))?;
        Ok(format!(
            "-----BEGIN PGP SIGNATURE-----\n\n{}{}:{}:{}\n-----END PGP SIGNATURE-----\n",
            SIG_MARKER,
            key.fingerprint,
            now,
            Self::digest(data)
        ))
    }

    fn verify_detached(&self, signature: &str, data: &[u8]) -> Result<Verification> {
        let payload = signature
            .lines()
            .find_map(|l| l.trim().strip_prefix(SIG_MARKER))
            .ok_or_else(|| Error::Validation("not a valid OpenPGP signature".into()))?;
        let mut fields = payload.splitn(3, ':');
        let (fingerprint, stamp, digest) = match (fields.next(), fields.next(), fields.next()) {
            (Some(f), Some(t), Some(d)) => (f, t, d),
            _ => return Err(Error::Validation("not a valid OpenPGP signature".into())),
        };
        if digest != Self::digest(data) {
            return Err(Error::Validation("not a valid OpenPGP signature".into()));
        }
        let key = self
            .find(fingerprint)
            .ok_or_else(|| Error::Gpg(format!("signing key {} not in keyring", fingerprint)))?;
        let sig_timestamp = stamp
            .parse()
            .map_err(|_| Error::Validation("not a valid OpenPGP signature".into()))?;
        Ok(Verification {
            key_id: key.key_id,
            fingerprint: key.fingerprint,
            sig_timestamp,
        })
    }

    fn list_keys(&self, query: &str) -> Result<Vec<KeyInfo>> {
        if query.is_empty() {
            return Ok(self.keys.lock().unwrap().clone());
        }
        Ok(self.find(query).into_iter().collect())
    }

    fn scan_keys(&self, armored: &str) -> Result<Vec<KeyInfo>> {
        let mut keys = Vec::new();
        for line in armored.lines() {
            if let Some(payload) = line.strip_prefix(KEY_MARKER) {
                let mut fields = payload.splitn(3, ':');
                if let (Some(key_id), Some(fingerprint), Some(uids)) =
                    (fields.next(), fields.next(), fields.next())
                {
                    keys.push(KeyInfo {
                        key_id: key_id.to_string(),
                        fingerprint: fingerprint.to_string(),
                        uids: uids
                            .split('|')
                            .filter(|u| !u.is_empty())
                            .map(str::to_string)
                            .collect(),
                    });
                }
            }
        }
        Ok(keys)
    }

    fn import_keys(&self, armored: &str) -> Result<usize> {
        let scanned = self.scan_keys(armored)?;
        let mut ring = self.keys.lock().unwrap();
        let mut imported = 0;
        for key in scanned {
            if !ring.iter().any(|k| k.fingerprint == key.fingerprint) {
                ring.push(key);
                imported += 1;
            }
        }
        Ok(imported)
    }

    fn export_key(&self, key_id: &str) -> Result<String> {
        let key = self
            .find(key_id)
            .ok_or_else(|| Error::Gpg(format!("no key material for {}", key_id)))?;
        Ok(Self::armor_key(&key))
    }
}
