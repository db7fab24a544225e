//! Version-control collaborator: repository discovery, rev lookups, ref
//! updates, config access and raw loose-object writes.
//!
//! Lookups and ref/config updates go through the `git` binary; raw tag and
//! commit objects are written straight into the object database so the
//! server's signature bytes are preserved exactly as validated.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result};
use gix_object::Kind;
use sha1::{Digest, Sha1};

pub struct Repository {
    workdir: PathBuf,
    git_dir: PathBuf,
}

impl Repository {
    /// Discover the repository containing `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let output = Command::new("git")
            .current_dir(dir)
            .args(["rev-parse", "--absolute-git-dir"])
            .output()
            .context("failed to run git")?;
        if !output.status.success() {
            anyhow::bail!("not a git repository: {}", dir.display());
        }
        let git_dir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        Ok(Self {
            workdir: dir.to_path_buf(),
            git_dir,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.workdir)
            .args(args)
            .output()
            .with_context(|| format!("failed to run git {:?}", args))
    }

    /// Run git and require success; returns trimmed stdout.
    fn git_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if !output.status.success() {
            anyhow::bail!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolve a revision to its commit id.
    pub fn resolve_commit(&self, rev: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", rev);
        self.git_ok(&["rev-parse", "--verify", &spec])
            .with_context(|| format!("no such revision: '{}'", rev))
    }

    /// Tree id of a commit.
    pub fn tree_of(&self, commit: &str) -> Result<String> {
        let spec = format!("{}^{{tree}}", commit);
        self.git_ok(&["rev-parse", "--verify", &spec])
    }

    /// Target of a fully-qualified ref, or None if it does not exist.
    pub fn lookup_ref(&self, name: &str) -> Result<Option<String>> {
        let output = self.git(&["rev-parse", "--verify", "--quiet", name])?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// The branch HEAD points at (`refs/heads/...`), or None when detached.
    pub fn head_symbolic(&self) -> Result<Option<String>> {
        let output = self.git(&["symbolic-ref", "-q", "HEAD"])?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// Parent ids of a commit, in order.
    pub fn parents_of(&self, commit: &str) -> Result<Vec<String>> {
        let line = self.git_ok(&["rev-list", "--parents", "-n", "1", commit])?;
        Ok(line.split_whitespace().skip(1).map(str::to_string).collect())
    }

    /// Point `name` at `id`, creating or force-updating it.
    pub fn update_ref(&self, name: &str, id: &str) -> Result<()> {
        self.git_ok(&["update-ref", name, id])?;
        Ok(())
    }

    /// A config value, from the usual lookup chain.
    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let output = self.git(&["config", "--get", key])?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// Record a config value globally; falls back to the repository config
    /// when the global file cannot be written.
    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let output = self.git(&["config", "--global", key, value])?;
        if output.status.success() {
            return Ok(());
        }
        tracing::info!("cannot write global git config, falling back to repo config");
        self.git_ok(&["config", key, value])?;
        Ok(())
    }

    /// Write a raw object into the object database and return its id.
    /// The object bytes are stored verbatim, signature included.
    pub fn write_object(&self, kind: Kind, data: &[u8]) -> Result<String> {
        let id = compute_object_id(kind, data);
        let (dir, file) = id.split_at(2);
        let obj_dir = self.git_dir.join("objects").join(dir);
        std::fs::create_dir_all(&obj_dir)
            .with_context(|| format!("failed to create object directory: {}", obj_dir.display()))?;
        let obj_path = obj_dir.join(file);
        if obj_path.exists() {
            return Ok(id);
        }

        let mut content = format!("{} {}\0", kind_str(kind), data.len()).into_bytes();
        content.extend_from_slice(data);

        let file = std::fs::File::create(&obj_path)
            .with_context(|| format!("failed to create object file: {}", obj_path.display()))?;
        let mut encoder = flate2::write::ZlibEncoder::new(file, flate2::Compression::default());
        encoder
            .write_all(&content)
            .context("failed to write compressed object")?;
        encoder.finish().context("failed to finish compression")?;

        Ok(id)
    }
}

fn kind_str(kind: Kind) -> &'static str {
    match kind {
        Kind::Commit => "commit",
        Kind::Tree => "tree",
        Kind::Blob => "blob",
        Kind::Tag => "tag",
    }
}

/// Git SHA-1 object id over "type size\0data".
fn compute_object_id(kind: Kind, data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}\0", kind_str(kind), data.len()).as_bytes());
    hasher.update(data);
    hex::encode(hasher.finalize())
}
