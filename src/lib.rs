//! Independent git timestamping.
//!
//! A timestamping server binds its trusted clock to commit hashes by
//! signing git tag and commit objects; the client revalidates every byte
//! of the response before any ref is created, so a malicious or broken
//! server cannot smuggle anything into the local repository.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod git;
pub mod gpg;
pub mod ident;
pub mod mail;
pub mod object;
pub mod rotate;
pub mod server;
pub mod stamper;
pub mod trust;
pub mod verify;

pub use error::{Error, Result};
