//! Signing gate: validates requests, durably logs commit hashes in arrival
//! order, and signs under bounded concurrency.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use crate::error::{Error, Result};
use crate::gpg::Pgp;
use crate::{clock, ident, object};

/// Pending log the gate appends to; consumed exclusively by the rotator.
pub const WORK_LOG: &str = "hashes.work";
/// Rotated log awaiting its commit to version control.
pub const ROTATED_LOG: &str = "hashes.log";

/// Server signing identity, resolved once at startup and immutable
/// thereafter.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    pub key_id: String,
    /// Human-readable "Name <email>" used in tagger/author lines.
    pub full_id: String,
    pub public_key: String,
}

impl SigningIdentity {
    pub fn load(pgp: &dyn Pgp, key_id: &str) -> Result<Self> {
        let keys = pgp.list_keys(key_id)?;
        let key = keys
            .first()
            .ok_or_else(|| Error::Gpg(format!("no keys found for {}", key_id)))?;
        let full_id = key
            .uids
            .first()
            .cloned()
            .ok_or_else(|| Error::Gpg(format!("key {} has no identity", key_id)))?;
        let public_key = pgp.export_key(key_id)?;
        Ok(Self {
            key_id: key_id.to_string(),
            full_id,
            public_key,
        })
    }
}

/// The two request shapes accepted by the gate.
#[derive(Debug, Clone)]
pub enum TimestampRequest {
    Tag {
        commit: String,
        tag_name: String,
    },
    Branch {
        commit: String,
        tree: String,
        parent: Option<String>,
    },
}

pub struct Stamper {
    identity: SigningIdentity,
    url: String,
    repository: PathBuf,
    pgp: Arc<dyn Pgp>,
    /// Shared with the rotator: log appends and rotations never interleave.
    serialize: Arc<Mutex<()>>,
    sem: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl Stamper {
    pub fn new(
        identity: SigningIdentity,
        url: String,
        repository: PathBuf,
        pgp: Arc<dyn Pgp>,
        serialize: Arc<Mutex<()>>,
        max_parallel: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            identity,
            url,
            repository,
            pgp,
            serialize,
            sem: Arc::new(Semaphore::new(max_parallel)),
            timeout,
        }
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    pub fn public_key(&self) -> &str {
        &self.identity.public_key
    }

    pub async fn stamp(&self, request: &TimestampRequest) -> Result<String> {
        match request {
            TimestampRequest::Tag { commit, tag_name } => self.stamp_tag(commit, tag_name).await,
            TimestampRequest::Branch {
                commit,
                tree,
                parent,
            } => self.stamp_branch(commit, tree, parent.as_deref()).await,
        }
    }

    /// Build and sign a tag object for `commit`.
    pub async fn stamp_tag(&self, commit: &str, tag_name: &str) -> Result<String> {
        if !ident::valid_commit(commit) || !ident::valid_tag(tag_name) {
            return Err(Error::Validation("bad commit id or tag name".into()));
        }
        let now = self.record(commit).await?;
        let tagobj = object::tag_object(commit, tag_name, &self.identity.full_id, now, &self.url);
        let sig = self.limited_sign(now, tagobj.clone()).await?;
        Ok(format!("{}{}", tagobj, sig))
    }

    /// Build and sign a branch timestamp commit whose last parent is the
    /// commit being stamped.
    pub async fn stamp_branch(
        &self,
        commit: &str,
        tree: &str,
        parent: Option<&str>,
    ) -> Result<String> {
        if !ident::valid_commit(commit)
            || !ident::valid_commit(tree)
            || !parent.map_or(true, ident::valid_commit)
        {
            return Err(Error::Validation("bad commit, tree or parent id".into()));
        }
        let now = self.record(commit).await?;
        let head = object::branch_commit_head(tree, parent, commit, &self.identity.full_id, now);
        let body = object::branch_commit_body(&self.url, now);
        let sig = self.limited_sign(now, format!("{}{}", head, body)).await?;
        Ok(object::branch_commit(&head, &sig, &body))
    }

    /// Capture the time and durably record the commit hash, both under the
    /// serialize lock. No signature is ever produced for a hash that was
    /// not first flushed to the pending log.
    async fn record(&self, commit: &str) -> Result<i64> {
        let _held = self.serialize.lock().await;
        let now = clock::sig_time();
        self.log_commit(commit)?;
        Ok(now)
    }

    /// Append to the pending log and flush it all the way to disk.
    /// Must only be called with the serialize lock held.
    fn log_commit(&self, commit: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.repository.join(WORK_LOG))?;
        file.write_all(format!("{}\n", commit).as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Sign under the admission semaphore, pinning the signature creation
    /// time to the previously captured header time. A request that cannot
    /// get a slot within the configured timeout is rejected as overload
    /// without ever touching the signing backend.
    async fn limited_sign(&self, now: i64, data: String) -> Result<String> {
        let permit = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.sem.clone().acquire_owned())
                .await
                .map_err(|_| Error::Overload)?,
            None => self.sem.clone().acquire_owned().await,
        }
        .map_err(|_| Error::Gpg("signing semaphore closed".into()))?;

        let pgp = self.pgp.clone();
        let key_id = self.identity.key_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            pgp.sign_detached(data.as_bytes(), &key_id, now)
        })
        .await
        .map_err(|e| Error::Gpg(format!("signing task failed: {}", e)));
        drop(permit);
        result?
    }
}
