//! `git timestamp`: obtain an independent timestamp for a commit and
//! record it as a signed tag or on a timestamp branch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use git_timestamp::client::{self, Options};
use git_timestamp::git::Repository;
use git_timestamp::gpg::GpgCli;
use git_timestamp::trust::GitConfigStore;

#[derive(Debug, Parser)]
#[command(name = "git-timestamp", version, about)]
struct Args {
    /// Commit or branch to timestamp.
    #[arg(default_value = "HEAD")]
    commit: String,

    /// Create a timestamped tag with this name.
    #[arg(long)]
    tag: Option<String>,

    /// Timestamp to this branch instead of a tag.
    #[arg(long)]
    branch: Option<String>,

    /// Timestamping server to use.
    #[arg(long)]
    server: Option<String>,

    /// GnuPG home directory for key verification.
    #[arg(long)]
    gnupg_home: Option<PathBuf>,

    /// Append the current branch name to the timestamp branch.
    #[arg(long, overrides_with = "no_append_branch_name")]
    append_branch_name: bool,

    /// Never append the current branch name.
    #[arg(long)]
    no_append_branch_name: bool,

    /// Suppress non-error output.
    #[arg(short, long)]
    quiet: bool,
}

fn config_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1")
}

fn run(args: Args) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let repo = Repository::discover(&cwd)?;

    // Flags win; git config fills in what was not given.
    let server = match args.server {
        Some(server) => server,
        None => repo
            .config_get("timestamp.server")?
            .unwrap_or_else(|| client::DEFAULT_SERVER.to_string()),
    };
    let branch = match args.branch {
        Some(branch) => Some(branch),
        None if args.tag.is_none() => repo.config_get("timestamp.branch")?,
        None => None,
    };
    let gnupg_home = match args.gnupg_home {
        Some(home) => Some(home),
        None => repo.config_get("timestamp.gnupg-home")?.map(PathBuf::from),
    };
    let append_branch_name = if args.no_append_branch_name {
        false
    } else if args.append_branch_name {
        true
    } else {
        repo.config_get("timestamp.append-branch-name")?
            .map(|v| config_bool(&v))
            .unwrap_or(true)
    };

    let pgp = GpgCli::new(gnupg_home);
    let store = GitConfigStore::new(&repo);
    let opts = Options {
        server,
        tag: args.tag,
        branch,
        commit: args.commit,
        append_branch_name,
        quiet: args.quiet,
    };
    client::run(&repo, &pgp, &store, &opts)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("git-timestamp: {:#}", err);
        std::process::exit(1);
    }
}
