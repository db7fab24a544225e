//! `git-timestampd`: HTTP timestamping service with background log
//! rotation.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Mutex;

use git_timestamp::config::{Args, ServerConfig};
use git_timestamp::gpg::GpgCli;
use git_timestamp::rotate::Rotator;
use git_timestamp::server;
use git_timestamp::stamper::{SigningIdentity, Stamper};

async fn run(config: ServerConfig) -> Result<()> {
    let pgp = Arc::new(GpgCli::new(config.gnupg_home.clone()));

    // Fail fast when the signing key is unusable.
    let identity = SigningIdentity::load(pgp.as_ref(), &config.keyid)
        .with_context(|| format!("cannot load signing key {}", config.keyid))?;
    tracing::info!("signing as {} ({})", identity.full_id, identity.key_id);

    let serialize = Arc::new(Mutex::new(()));
    let stamper = Arc::new(Stamper::new(
        identity,
        config.own_url.clone(),
        config.repository.clone(),
        pgp,
        serialize.clone(),
        config.max_parallel_signatures,
        config.max_parallel_timeout,
    ));

    let rotator = Arc::new(Rotator::new(
        config.repository,
        Some(config.keyid),
        serialize,
        config.commit_interval,
        config.upstreams,
        config.push_repositories,
        config.push_branches,
        config.gnupg_home,
    ));
    rotator.spawn();

    server::serve(stamper, &config.listen_address, config.listen_port).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match ServerConfig::resolve(Args::parse()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("git-timestampd: {:#}", err);
            std::process::exit(2);
        }
    };
    if let Err(err) = run(config).await {
        eprintln!("git-timestampd: {:#}", err);
        std::process::exit(1);
    }
}
