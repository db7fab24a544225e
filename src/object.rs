//! Artifact codec: the canonical text layout of the two artifact shapes,
//! a signed tag object and a signed two-parent branch commit.
//!
//! Both sides depend on these layouts being byte-exact: the server builds
//! them here and the client reconstructs the expected prefix from the same
//! templates when validating a response.

use crate::clock;

/// Largest artifact either side will accept, in bytes.
pub const MAX_ARTIFACT_BYTES: usize = 8000;

/// Canonical tag object text, up to and including the free-text body.
/// The detached signature is appended verbatim after this.
pub fn tag_object(commit: &str, tagname: &str, fullid: &str, now: i64, url: &str) -> String {
    format!(
        "object {}\ntype commit\ntag {}\ntagger {} {} +0000\n\n{} tag timestamp\n",
        commit, tagname, fullid, now, url
    )
}

/// Header of a branch timestamp commit, up to and including the committer
/// line. The commit being timestamped is always the last parent.
pub fn branch_commit_head(
    tree: &str,
    parent: Option<&str>,
    commit: &str,
    fullid: &str,
    now: i64,
) -> String {
    let mut head = format!("tree {}\n", tree);
    if let Some(parent) = parent {
        head.push_str(&format!("parent {}\n", parent));
    }
    head.push_str(&format!(
        "parent {}\nauthor {} {} +0000\ncommitter {} {} +0000\n",
        commit, fullid, now, fullid, now
    ));
    head
}

/// Free-text body of a branch timestamp commit, starting at the blank line
/// that separates it from the header.
pub fn branch_commit_body(url: &str, now: i64) -> String {
    format!("\n{} branch timestamp {}\n", url, clock::time_str_utc(now))
}

/// Fold a detached armored signature into a `gpgsig` header field: every
/// interior line of the armor is continued with one leading space, the git
/// convention for multi-line header values.
pub fn gpgsig_field(signature: &str) -> String {
    let mut folded = format!(
        "gpgsig {}",
        signature.trim_end_matches('\n').replace('\n', "\n ")
    );
    folded.push('\n');
    folded
}

/// Assemble the final branch commit: header, inline signature, body.
pub fn branch_commit(head: &str, signature: &str, body: &str) -> String {
    format!("{}{}{}", head, gpgsig_field(signature), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMIT: &str = "1111111111111111111111111111111111111111";
    const TREE: &str = "3333333333333333333333333333333333333333";
    const PARENT: &str = "2222222222222222222222222222222222222222";

    #[test]
    fn test_tag_object_template() {
        let text = tag_object(
            COMMIT,
            "sample-timestamping-tag",
            "Test Service <test@example.com>",
            1552053600,
            "https://stamper.example.com",
        );
        assert_eq!(
            text,
            "object 1111111111111111111111111111111111111111\n\
             type commit\n\
             tag sample-timestamping-tag\n\
             tagger Test Service <test@example.com> 1552053600 +0000\n\
             \n\
             https://stamper.example.com tag timestamp\n"
        );
    }

    #[test]
    fn test_branch_commit_head_two_parents() {
        let head = branch_commit_head(TREE, Some(PARENT), COMMIT, "T <t@e.c>", 1552053600);
        let lines: Vec<&str> = head.lines().collect();
        assert_eq!(lines[0], format!("tree {}", TREE));
        assert_eq!(lines[1], format!("parent {}", PARENT));
        assert_eq!(lines[2], format!("parent {}", COMMIT));
        assert_eq!(lines[3], "author T <t@e.c> 1552053600 +0000");
        assert_eq!(lines[4], "committer T <t@e.c> 1552053600 +0000");
    }

    #[test]
    fn test_branch_commit_head_single_parent() {
        let head = branch_commit_head(TREE, None, COMMIT, "T <t@e.c>", 1552053600);
        assert_eq!(head.matches("parent ").count(), 1);
    }

    #[test]
    fn test_gpgsig_field_indents_interior_lines() {
        let sig = "-----BEGIN PGP SIGNATURE-----\n\nabc\n-----END PGP SIGNATURE-----\n";
        let field = gpgsig_field(sig);
        assert_eq!(
            field,
            "gpgsig -----BEGIN PGP SIGNATURE-----\n \n abc\n -----END PGP SIGNATURE-----\n"
        );
    }

    #[test]
    fn test_branch_commit_assembly() {
        let head = branch_commit_head(TREE, None, COMMIT, "T <t@e.c>", 1552053600);
        let body = branch_commit_body("https://s.example.com", 1552053600);
        let sig = "-----BEGIN PGP SIGNATURE-----\n\nabc\n-----END PGP SIGNATURE-----\n";
        let full = branch_commit(&head, sig, &body);
        assert!(full.contains("committer T <t@e.c> 1552053600 +0000\ngpgsig -----BEGIN"));
        assert!(full.ends_with(
            "-----END PGP SIGNATURE-----\n\nhttps://s.example.com branch timestamp 2019-03-08 14:00:00 UTC\n"
        ));
    }
}
