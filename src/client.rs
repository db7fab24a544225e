//! Client orchestration: obtain a timestamp from a server and record it as
//! a local tag or branch head, but only after full revalidation.

use std::time::Duration;

use anyhow::{Context, Result};
use gix_object::Kind;
use reqwest::blocking::{Client, Response};
use reqwest::redirect::Policy;
use reqwest::StatusCode;

use crate::error::Error;
use crate::git::Repository;
use crate::gpg::Pgp;
use crate::trust::{self, KeyStore};
use crate::{ident, verify};

pub const DEFAULT_SERVER: &str = "https://gitta.zeitgitter.net";

const SERVER_ALIASES: &[(&str, &str)] = &[
    ("gitta", "gitta.zeitgitter.net"),
    ("diversity", "diversity.zeitgitter.net"),
];

/// Resolved options for a single timestamping run. `tag` takes precedence
/// over `branch`; with neither, a branch name is derived from the server.
#[derive(Debug, Clone)]
pub struct Options {
    pub server: String,
    pub tag: Option<String>,
    pub branch: Option<String>,
    pub commit: String,
    pub append_branch_name: bool,
    pub quiet: bool,
}

/// HTTP client with redirects disabled, so a 301 relocation can be
/// surfaced to the user instead of silently followed.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")
}

/// Fail on anything but 200; a 301 becomes a relocation notice the caller
/// should persist in their configuration.
pub fn check_http_status(server: &str, resp: &Response) -> crate::error::Result<()> {
    if resp.status() == StatusCode::MOVED_PERMANENTLY {
        let location = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<unknown>");
        return Err(Error::Transport(format!(
            "timestamping server moved from {} to {}; \
             update it with `git config [--global] timestamp.server {}`",
            server, location, location
        )));
    }
    if resp.status() != StatusCode::OK {
        return Err(Error::Transport(format!(
            "timestamping request failed; server responded with {}",
            resp.status()
        )));
    }
    Ok(())
}

/// Expand aliases and default the scheme to https.
pub fn expand_server(server: &str) -> String {
    let server = SERVER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == server)
        .map(|(_, full)| *full)
        .unwrap_or(server);
    if server.contains(':') {
        server.to_string()
    } else {
        format!("https://{}", server)
    }
}

/// Derive a timestamp branch name from the server host: the first field
/// that is not noise ("www", "zeitgitter", anything containing "stamp"),
/// with `:` mapped to `-` and `-timestamps` appended.
pub fn derive_branch_name(server: &str) -> String {
    let flattened = server.replace('/', ".");
    for field in flattened.split('.').skip(1) {
        let field = field.replace(':', "-");
        if !field.is_empty()
            && field != "www"
            && field != "zeitgitter"
            && !field.contains("stamp")
            && ident::valid_ref_name(&field)
        {
            return format!("{}-timestamps", field);
        }
    }
    "zeitgitter-timestamps".to_string()
}

/// Append the current branch name to the timestamp branch, per-branch
/// timestamp branches. `master` is never appended.
fn append_branch_name(repo: &Repository, commit_name: &str, base: &str) -> Result<String> {
    let source = if commit_name == "HEAD" {
        match repo.head_symbolic()? {
            Some(refname) if refname.starts_with("refs/heads/") => {
                refname["refs/heads/".len()..].to_string()
            }
            _ => anyhow::bail!(
                "HEAD must point to a branch for (implicit) options \
                 `--branch` and `--append-branch-name`"
            ),
        }
    } else if repo
        .lookup_ref(&format!("refs/heads/{}", commit_name))?
        .is_some()
    {
        commit_name.to_string()
    } else {
        anyhow::bail!(
            "'{}' must be a branch name for (implicit) options \
             `--branch` and `--append-branch-name`",
            commit_name
        );
    };

    if source == "master" {
        return Ok(base.to_string());
    }
    let extended = format!("{}-{}", base, source);
    if !ident::valid_ref_name(&extended) {
        anyhow::bail!(
            "branch name {} is not valid for timestamping \
             (constructed from {} and source branch {})",
            extended,
            base,
            source
        );
    }
    Ok(extended)
}

/// Resolve the server's key and run the requested timestamping operation.
pub fn run(
    repo: &Repository,
    pgp: &dyn Pgp,
    store: &dyn KeyStore,
    opts: &Options,
) -> Result<()> {
    let mut opts = opts.clone();
    opts.server = expand_server(&opts.server);
    if opts.tag.is_none() && opts.branch.is_none() {
        opts.branch = Some(derive_branch_name(&opts.server));
    }

    let (keyid, name) = trust::resolve_key(&opts.server, store, pgp, opts.quiet)?;
    if opts.tag.is_some() {
        timestamp_tag(repo, pgp, &keyid, &name, &opts)
    } else {
        timestamp_branch(repo, pgp, &keyid, &name, &opts)
    }
}

/// Obtain and add a signed tag.
fn timestamp_tag(
    repo: &Repository,
    pgp: &dyn Pgp,
    keyid: &str,
    name: &str,
    opts: &Options,
) -> Result<()> {
    let tag = opts.tag.as_deref().unwrap_or_default();
    if !ident::valid_ref_name(tag) {
        anyhow::bail!("tag name '{}' is not valid for timestamping", tag);
    }
    let commit = repo.resolve_commit(&opts.commit)?;
    if repo.lookup_ref(&format!("refs/tags/{}", tag))?.is_some() {
        anyhow::bail!("tag '{}' already in use", tag);
    }

    let http = http_client()?;
    let resp = http
        .post(&opts.server)
        .form(&[
            ("request", "stamp-tag-v1"),
            ("commit", &commit),
            ("tagname", tag),
        ])
        .send()
        .map_err(|e| Error::Transport(format!("cannot connect to server: {}", e)))?;
    check_http_status(&opts.server, &resp)?;
    let text = resp.text().context("failed to read server response")?;

    verify::validate_tag(&text, &commit, tag, keyid, name, pgp)?;
    let id = repo.write_object(Kind::Tag, text.as_bytes())?;
    repo.update_ref(&format!("refs/tags/{}", tag), &id)?;
    if !opts.quiet {
        tracing::info!("created timestamped tag {} ({})", tag, id);
    }
    Ok(())
}

/// Obtain and add a branch timestamp commit; create or force-update the
/// branch head.
fn timestamp_branch(
    repo: &Repository,
    pgp: &dyn Pgp,
    keyid: &str,
    name: &str,
    opts: &Options,
) -> Result<()> {
    let mut branch = opts
        .branch
        .clone()
        .context("no branch name to timestamp to")?;
    // An invalid base name cannot become valid by appending.
    if !ident::valid_ref_name(&branch) {
        anyhow::bail!("branch name {} is not valid for timestamping", branch);
    }
    if opts.append_branch_name {
        branch = append_branch_name(repo, &opts.commit, &branch)?;
    }

    let commit = repo.resolve_commit(&opts.commit)?;
    let tree = repo.tree_of(&commit)?;

    let mut parent = None;
    if let Some(head) = repo.lookup_ref(&format!("refs/heads/{}", branch))? {
        if head == commit {
            // Would create a merge commit with the same parent twice.
            anyhow::bail!("cannot timestamp head of timestamp branch to itself");
        }
        let parents = repo.parents_of(&head)?;
        if parents.first() == Some(&commit) || parents.get(1) == Some(&commit) {
            anyhow::bail!("already timestamped commit {} to branch {}", commit, branch);
        }
        parent = Some(head);
    }

    let mut form: Vec<(&str, &str)> = vec![
        ("request", "stamp-branch-v1"),
        ("commit", &commit),
        ("tree", &tree),
    ];
    if let Some(parent) = parent.as_deref() {
        form.push(("parent", parent));
    }

    let http = http_client()?;
    let resp = http
        .post(&opts.server)
        .form(&form)
        .send()
        .map_err(|e| Error::Transport(format!("cannot connect to server: {}", e)))?;
    check_http_status(&opts.server, &resp)?;
    let text = resp.text().context("failed to read server response")?;

    verify::validate_branch(&text, &tree, parent.as_deref(), &commit, keyid, name, pgp)?;
    let id = repo.write_object(Kind::Commit, text.as_bytes())?;
    repo.update_ref(&format!("refs/heads/{}", branch), &id)?;
    if !opts.quiet {
        tracing::info!("timestamped {} to branch {} ({})", commit, branch, id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_server() {
        assert_eq!(expand_server("gitta"), "https://gitta.zeitgitter.net");
        assert_eq!(expand_server("example.com"), "https://example.com");
        assert_eq!(expand_server("https://example.com"), "https://example.com");
        assert_eq!(expand_server("localhost:8080"), "localhost:8080");
    }

    #[test]
    fn test_derive_branch_name() {
        assert_eq!(
            derive_branch_name("https://gitta.zeitgitter.net"),
            "gitta-timestamps"
        );
        assert_eq!(derive_branch_name("https://example.com"), "example-timestamps");
        assert_eq!(
            derive_branch_name("http://localhost:8080"),
            "localhost-8080-timestamps"
        );
        assert_eq!(
            derive_branch_name("https://www.stamper.net"),
            "net-timestamps"
        );
        assert_eq!(derive_branch_name("https://zeitgitter"), "zeitgitter-timestamps");
    }
}
