//! Pending-log rotation: periodically moves the append-only work log into
//! version control and fans out pushes and cross-timestamps.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::Mutex;

use crate::clock;
use crate::stamper::{ROTATED_LOG, WORK_LOG};

/// A remote timestamper we cross-timestamp our own history against.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub branch: String,
    pub server: String,
}

pub struct Rotator {
    repository: PathBuf,
    /// Key used to sign log commits; None leaves them unsigned.
    key_id: Option<String>,
    /// Shared with the signing gate.
    serialize: Arc<Mutex<()>>,
    interval: Duration,
    upstreams: Vec<Upstream>,
    push_repositories: Vec<String>,
    push_branches: Vec<String>,
    gnupg_home: Option<PathBuf>,
}

impl Rotator {
    pub fn new(
        repository: PathBuf,
        key_id: Option<String>,
        serialize: Arc<Mutex<()>>,
        interval: Duration,
        upstreams: Vec<Upstream>,
        push_repositories: Vec<String>,
        push_branches: Vec<String>,
        gnupg_home: Option<PathBuf>,
    ) -> Self {
        Self {
            repository,
            key_id,
            serialize,
            interval,
            upstreams,
            push_repositories,
            push_branches,
            gnupg_home,
        }
    }

    /// Start the rotation loop. The first cycle fires after the full
    /// interval plus a random fraction of it, so a fleet of servers
    /// restarted together does not rotate in lockstep.
    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let offset = rand::thread_rng().gen_range(0.0..1.0_f64);
            let first = self.interval + self.interval.mul_f64(offset);
            tokio::time::sleep(first).await;
            loop {
                if let Err(err) = self.cycle().await {
                    tracing::error!("log rotation failed: {:#}", err);
                }
                tokio::time::sleep(self.interval).await;
            }
        });
    }

    /// One rotation: swap and commit the pending log under the serialize
    /// lock, then push and cross-timestamp without holding it.
    pub async fn cycle(&self) -> Result<()> {
        let repository = self.repository.clone();
        let key_id = self.key_id.clone();
        let gnupg_home = self.gnupg_home.clone();
        let rotated = {
            let _held = self.serialize.lock().await;
            tokio::task::spawn_blocking(move || {
                rotate_in(&repository, key_id.as_deref(), gnupg_home.as_deref())
            })
            .await
            .context("rotation task failed")??
        };
        if rotated {
            self.fan_out();
        }
        Ok(())
    }

    /// Fire-and-forget pushes and upstream timestamps. Failures are logged
    /// and never propagate into the stamping path.
    fn fan_out(&self) {
        for remote in self.push_repositories.clone() {
            let repository = self.repository.clone();
            let branches = self.push_branches.clone();
            tokio::spawn(async move {
                let res = tokio::task::spawn_blocking(move || {
                    push_to(&repository, &remote, &branches)
                })
                .await;
                match res {
                    Ok(Err(err)) => tracing::error!("push failed: {:#}", err),
                    Err(err) => tracing::error!("push task failed: {}", err),
                    Ok(Ok(())) => {}
                }
            });
        }
        for upstream in self.upstreams.clone() {
            let repository = self.repository.clone();
            tokio::spawn(async move {
                let upstream_for_task = upstream.clone();
                let res = tokio::task::spawn_blocking(move || {
                    cross_timestamp(&repository, &upstream_for_task)
                })
                .await;
                match res {
                    Ok(Err(err)) => {
                        tracing::error!("cross-timestamping against {} failed: {:#}", upstream.server, err)
                    }
                    Err(err) => tracing::error!("cross-timestamping task failed: {}", err),
                    Ok(Ok(())) => {}
                }
            });
        }
    }
}

fn git(repository: &Path, gnupg_home: Option<&Path>, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.current_dir(repository).args(args);
    if let Some(home) = gnupg_home {
        cmd.env("GNUPGHOME", home);
    }
    let output = cmd
        .output()
        .with_context(|| format!("failed to run git {:?}", args))?;
    if !output.status.success() {
        anyhow::bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Commit a leftover rotated log from an interrupted earlier rotation.
/// Must run before the work log is renamed over it.
pub fn commit_dangling(repository: &Path, key_id: Option<&str>, gnupg_home: Option<&Path>) -> Result<()> {
    let log = repository.join(ROTATED_LOG);
    if !log.exists() {
        return Ok(());
    }
    let mtime = log
        .metadata()?
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    tracing::warn!("found uncommitted rotated log, committing it first");
    let message = format!("Found uncommitted data from {}", clock::time_str(mtime));
    commit_log(repository, key_id, gnupg_home, &message)
}

fn commit_log(
    repository: &Path,
    key_id: Option<&str>,
    gnupg_home: Option<&Path>,
    message: &str,
) -> Result<()> {
    git(repository, gnupg_home, &["add", ROTATED_LOG])?;
    match key_id {
        Some(key_id) => git(
            repository,
            gnupg_home,
            &[
                "commit",
                "--allow-empty",
                "-m",
                message,
                &format!("--gpg-sign={}", key_id),
            ],
        )?,
        None => git(
            repository,
            gnupg_home,
            &["commit", "--allow-empty", "--no-gpg-sign", "-m", message],
        )?,
    }
    std::fs::remove_file(repository.join(ROTATED_LOG))?;
    Ok(())
}

/// Rotate the pending log into version control. Returns whether a new log
/// commit was made. Caller must hold the serialize lock; nothing may append
/// to the work log while it is being renamed.
pub fn rotate_in(repository: &Path, key_id: Option<&str>, gnupg_home: Option<&Path>) -> Result<bool> {
    commit_dangling(repository, key_id, gnupg_home)?;

    let work = repository.join(WORK_LOG);
    let empty = match work.metadata() {
        Ok(meta) => meta.len() == 0,
        Err(_) => true,
    };
    if empty {
        tracing::debug!("no pending hashes, skipping rotation");
        return Ok(false);
    }

    std::fs::rename(&work, repository.join(ROTATED_LOG))
        .context("failed to rotate pending log")?;
    commit_log(repository, key_id, gnupg_home, "Rotating logs")?;
    std::fs::File::create(&work).context("failed to recreate pending log")?;
    Ok(true)
}

fn push_to(repository: &Path, remote: &str, branches: &[String]) -> Result<()> {
    let mut args = vec!["push", remote];
    for branch in branches {
        args.push(branch);
    }
    tracing::info!("pushing to {}", remote);
    git(repository, None, &args)
}

/// Timestamp our own history against another timestamper, building the
/// chain of mutual attestations.
fn cross_timestamp(repository: &Path, upstream: &Upstream) -> Result<()> {
    tracing::info!(
        "cross-timestamping branch {} against {}",
        upstream.branch,
        upstream.server
    );
    let output = Command::new("git")
        .current_dir(repository)
        .args([
            "timestamp",
            "--branch",
            &upstream.branch,
            "--server",
            &upstream.server,
        ])
        .output()
        .context("failed to run git timestamp")?;
    if !output.status.success() {
        anyhow::bail!(
            "git timestamp failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
