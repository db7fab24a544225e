//! GnuPG command line adapter.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use tempfile::NamedTempFile;

use super::{KeyInfo, Pgp, Verification};
use crate::error::{Error, Result};

/// OpenPGP adapter backed by the `gpg` binary.
pub struct GpgCli {
    gnupg_home: Option<PathBuf>,
}

impl GpgCli {
    pub fn new(gnupg_home: Option<PathBuf>) -> Self {
        Self { gnupg_home }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("gpg");
        cmd.arg("--batch").arg("--no-tty");
        if let Some(home) = &self.gnupg_home {
            cmd.arg("--homedir").arg(home);
        }
        cmd
    }

    fn run_with_input(mut cmd: Command, input: &[u8]) -> Result<Output> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
        Ok(child.wait_with_output()?)
    }

    fn run(mut cmd: Command) -> Result<Output> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        Ok(cmd.output()?)
    }
}

impl Pgp for GpgCli {
    fn sign_detached(&self, data: &[u8], key_id: &str, now: i64) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("--armor")
            .arg("--detach-sign")
            .arg("--local-user")
            .arg(key_id)
            .arg("--faked-system-time")
            .arg(format!("{}!", now));
        let output = Self::run_with_input(cmd, data)?;
        if !output.status.success() {
            return Err(Error::Gpg(format!(
                "gpg --detach-sign failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|_| Error::Gpg("gpg produced non-UTF-8 armor".into()))
    }

    fn verify_detached(&self, signature: &str, data: &[u8]) -> Result<Verification> {
        let mut sigfile = NamedTempFile::new()?;
        sigfile.write_all(signature.as_bytes())?;
        sigfile.flush()?;

        let mut cmd = self.command();
        cmd.arg("--status-fd")
            .arg("1")
            .arg("--verify")
            .arg(sigfile.path())
            .arg("-");
        let output = Self::run_with_input(cmd, data)?;
        let status = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(Error::Validation("not a valid OpenPGP signature".into()));
        }
        parse_verify_status(&status)
            .ok_or_else(|| Error::Validation("not a valid OpenPGP signature".into()))
    }

    fn list_keys(&self, query: &str) -> Result<Vec<KeyInfo>> {
        let mut cmd = self.command();
        cmd.arg("--with-colons").arg("--list-keys").arg(query);
        let output = Self::run(cmd)?;
        // gpg exits non-zero when nothing matches; an empty list is the
        // answer the callers want in that case.
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_colons(&String::from_utf8_lossy(&output.stdout)))
    }

    fn scan_keys(&self, armored: &str) -> Result<Vec<KeyInfo>> {
        let mut cmd = self.command();
        cmd.arg("--with-colons")
            .arg("--import-options")
            .arg("show-only")
            .arg("--import");
        let output = Self::run_with_input(cmd, armored.as_bytes())?;
        if !output.status.success() {
            return Err(Error::Gpg(format!(
                "gpg key scan failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(parse_colons(&String::from_utf8_lossy(&output.stdout)))
    }

    fn import_keys(&self, armored: &str) -> Result<usize> {
        let mut cmd = self.command();
        cmd.arg("--status-fd").arg("1").arg("--import");
        let output = Self::run_with_input(cmd, armored.as_bytes())?;
        if !output.status.success() {
            return Err(Error::Gpg(format!(
                "gpg --import failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let status = String::from_utf8_lossy(&output.stdout);
        Ok(status
            .lines()
            .filter(|l| l.starts_with("[GNUPG:] IMPORT_OK"))
            .count())
    }

    fn export_key(&self, key_id: &str) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("--armor").arg("--export").arg(key_id);
        let output = Self::run(cmd)?;
        if !output.status.success() {
            return Err(Error::Gpg(format!(
                "gpg --export failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let armored = String::from_utf8(output.stdout)
            .map_err(|_| Error::Gpg("gpg produced non-UTF-8 armor".into()))?;
        if armored.is_empty() {
            return Err(Error::Gpg(format!("no key material for {}", key_id)));
        }
        Ok(armored)
    }
}

/// Parse `--with-colons` key listings: `pub` opens a key, `fpr` carries the
/// fingerprint, `uid` adds identity strings.
fn parse_colons(text: &str) -> Vec<KeyInfo> {
    let mut keys: Vec<KeyInfo> = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first() {
            Some(&"pub") => keys.push(KeyInfo {
                key_id: fields.get(4).unwrap_or(&"").to_string(),
                fingerprint: String::new(),
                uids: Vec::new(),
            }),
            Some(&"fpr") => {
                if let Some(key) = keys.last_mut() {
                    if key.fingerprint.is_empty() {
                        key.fingerprint = fields.get(9).unwrap_or(&"").to_string();
                    }
                }
            }
            Some(&"uid") => {
                if let Some(key) = keys.last_mut() {
                    if let Some(uid) = fields.get(9) {
                        if !uid.is_empty() {
                            key.uids.push(uid.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    keys
}

/// Extract key id, fingerprint and signature creation time from
/// `--status-fd` verify output. Requires both GOODSIG and VALIDSIG.
fn parse_verify_status(status: &str) -> Option<Verification> {
    let mut key_id = None;
    let mut fingerprint = None;
    let mut sig_timestamp = None;
    for line in status.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.get(1) {
            Some(&"GOODSIG") => key_id = fields.get(2).map(|s| s.to_string()),
            Some(&"VALIDSIG") => {
                fingerprint = fields.get(2).map(|s| s.to_string());
                sig_timestamp = fields.get(4).and_then(|s| s.parse().ok());
            }
            _ => {}
        }
    }
    Some(Verification {
        key_id: key_id?,
        fingerprint: fingerprint?,
        sig_timestamp: sig_timestamp?,
    })
}
