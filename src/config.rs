//! Server configuration: command line over config file over defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::rotate::Upstream;

/// Independent git timestamping server.
#[derive(Debug, Parser)]
#[command(name = "git-timestampd", version, about)]
pub struct Args {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// PGP key id to sign timestamps with.
    #[arg(long)]
    pub keyid: Option<String>,

    /// URL clients reach this server under; embedded in every artifact.
    #[arg(long)]
    pub own_url: Option<String>,

    /// Git repository holding the pending log and its history.
    #[arg(long)]
    pub repository: Option<PathBuf>,

    /// GnuPG home directory to use instead of the default.
    #[arg(long)]
    pub gnupg_home: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Maximum number of parallel signing operations.
    #[arg(long)]
    pub max_parallel_signatures: Option<usize>,

    /// How long a request may wait for a signing slot before it is
    /// rejected as overload, e.g. `2s`. Unset means wait forever.
    #[arg(long)]
    pub max_parallel_timeout: Option<String>,

    /// Interval between log rotations, e.g. `4h` or `2d8h5m20s`.
    #[arg(long)]
    pub commit_interval: Option<String>,

    /// Upstream timestamper as `branch=server`; repeatable.
    #[arg(long = "upstream-timestamp")]
    pub upstream_timestamps: Vec<String>,

    /// Remote to push the timestamp history to; repeatable.
    #[arg(long = "push-repository")]
    pub push_repositories: Vec<String>,

    /// Branch to push; repeatable. Empty pushes the remote's defaults.
    #[arg(long = "push-branch")]
    pub push_branches: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub keyid: Option<String>,
    pub own_url: Option<String>,
    pub repository: Option<PathBuf>,
    pub gnupg_home: Option<PathBuf>,
    pub listen_address: Option<String>,
    pub listen_port: Option<u16>,
    pub max_parallel_signatures: Option<usize>,
    pub max_parallel_timeout: Option<String>,
    pub commit_interval: Option<String>,
    #[serde(default)]
    pub upstream_timestamps: Vec<String>,
    #[serde(default)]
    pub push_repositories: Vec<String>,
    #[serde(default)]
    pub push_branches: Vec<String>,
}

/// Fully resolved server configuration.
#[derive(Debug)]
pub struct ServerConfig {
    pub keyid: String,
    pub own_url: String,
    pub repository: PathBuf,
    pub gnupg_home: Option<PathBuf>,
    pub listen_address: String,
    pub listen_port: u16,
    pub max_parallel_signatures: usize,
    pub max_parallel_timeout: Option<Duration>,
    pub commit_interval: Duration,
    pub upstreams: Vec<Upstream>,
    pub push_repositories: Vec<String>,
    pub push_branches: Vec<String>,
}

impl ServerConfig {
    /// Merge command-line arguments over the config file and fill in
    /// defaults. Required settings missing from both are an error.
    pub fn resolve(args: Args) -> Result<Self> {
        let path = args.config.clone().or_else(default_config_path);
        let file = match path {
            Some(path) if args.config.is_some() || path.exists() => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read config file {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("cannot parse config file {}", path.display()))?
            }
            _ => FileConfig::default(),
        };

        let keyid = args
            .keyid
            .or(file.keyid)
            .context("no signing key configured (--keyid)")?;
        let own_url = args
            .own_url
            .or(file.own_url)
            .context("no server URL configured (--own-url)")?;
        let repository = args
            .repository
            .or(file.repository)
            .context("no repository configured (--repository)")?;

        let timeout = args
            .max_parallel_timeout
            .or(file.max_parallel_timeout)
            .map(|s| parse_duration(&s))
            .transpose()
            .context("bad --max-parallel-timeout")?;
        let interval = args
            .commit_interval
            .or(file.commit_interval)
            .map(|s| parse_duration(&s))
            .transpose()
            .context("bad --commit-interval")?
            .unwrap_or(Duration::from_secs(3600));

        let mut upstreams = Vec::new();
        let raw = if args.upstream_timestamps.is_empty() {
            file.upstream_timestamps
        } else {
            args.upstream_timestamps
        };
        for entry in raw {
            upstreams.push(parse_upstream(&entry)?);
        }

        Ok(Self {
            keyid,
            own_url,
            repository,
            gnupg_home: args.gnupg_home.or(file.gnupg_home),
            listen_address: args
                .listen_address
                .or(file.listen_address)
                .unwrap_or_else(|| "::".to_string()),
            listen_port: args.listen_port.or(file.listen_port).unwrap_or(8080),
            max_parallel_signatures: args
                .max_parallel_signatures
                .or(file.max_parallel_signatures)
                .unwrap_or(2),
            max_parallel_timeout: timeout,
            commit_interval: interval,
            upstreams,
            push_repositories: if args.push_repositories.is_empty() {
                file.push_repositories
            } else {
                args.push_repositories
            },
            push_branches: if args.push_branches.is_empty() {
                file.push_branches
            } else {
                args.push_branches
            },
        })
    }
}

/// `~/.config/git-timestampd/config.yaml`, consulted when no explicit
/// `--config` is given.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("git-timestampd").join("config.yaml"))
}

fn parse_upstream(entry: &str) -> Result<Upstream> {
    let (branch, server) = entry
        .split_once('=')
        .with_context(|| format!("upstream timestamper '{}' is not branch=server", entry))?;
    if branch.is_empty() || server.is_empty() {
        anyhow::bail!("upstream timestamper '{}' is not branch=server", entry);
    }
    Ok(Upstream {
        branch: branch.to_string(),
        server: server.to_string(),
    })
}

/// Parse durations of the form `2d8h5m20s`. Every number needs a unit.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let mut total = 0u64;
    let mut value: Option<u64> = None;
    for c in text.chars() {
        match c {
            '0'..='9' => {
                let digit = (c as u64) - ('0' as u64);
                value = Some(value.unwrap_or(0) * 10 + digit);
            }
            'd' | 'h' | 'm' | 's' => {
                let v = value
                    .take()
                    .with_context(|| format!("unit '{}' without a number in '{}'", c, text))?;
                let scale = match c {
                    'd' => 86400,
                    'h' => 3600,
                    'm' => 60,
                    _ => 1,
                };
                total += v * scale;
            }
            _ => anyhow::bail!("invalid duration '{}'", text),
        }
    }
    if value.is_some() || total == 0 {
        anyhow::bail!("invalid duration '{}'", text);
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("8h").unwrap(), Duration::from_secs(8 * 3600));
        assert_eq!(
            parse_duration("2d8h5m20s").unwrap(),
            Duration::from_secs(2 * 86400 + 8 * 3600 + 5 * 60 + 20)
        );
        assert_eq!(parse_duration("2m4s").unwrap(), Duration::from_secs(124));
        assert!(parse_duration("120").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5minutes").is_err());
        assert!(parse_duration("1h30").is_err());
    }

    #[test]
    fn test_parse_upstream() {
        let up = parse_upstream("gitta-timestamps=https://gitta.zeitgitter.net").unwrap();
        assert_eq!(up.branch, "gitta-timestamps");
        assert_eq!(up.server, "https://gitta.zeitgitter.net");
        assert!(parse_upstream("no-separator").is_err());
        assert!(parse_upstream("=server").is_err());
    }

    #[test]
    fn test_resolve_defaults_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(
            &path,
            "keyid: DEADBEEF\n\
             own-url: https://stamp.example.com\n\
             repository: /var/lib/timestamper\n\
             commit-interval: 2h\n",
        )
        .unwrap();

        let args = Args::parse_from(["git-timestampd", "--config", path.to_str().unwrap()]);
        let config = ServerConfig::resolve(args).unwrap();
        assert_eq!(config.keyid, "DEADBEEF");
        assert_eq!(config.listen_address, "::");
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.max_parallel_signatures, 2);
        assert!(config.max_parallel_timeout.is_none());
        assert_eq!(config.commit_interval, Duration::from_secs(7200));
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(
            &path,
            "keyid: DEADBEEF\n\
             own-url: https://stamp.example.com\n\
             repository: /var/lib/timestamper\n\
             listen-port: 9000\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "git-timestampd",
            "--config",
            path.to_str().unwrap(),
            "--listen-port",
            "9001",
            "--keyid",
            "CAFE",
        ]);
        let config = ServerConfig::resolve(args).unwrap();
        assert_eq!(config.keyid, "CAFE");
        assert_eq!(config.listen_port, 9001);
    }
}
