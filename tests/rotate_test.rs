//! Log rotation tests against a real git repository.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use git_timestamp::rotate;
use git_timestamp::stamper::{ROTATED_LOG, WORK_LOG};

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.name", "Timestamper"]);
    git(dir, &["config", "user.email", "stamper@example.com"]);
}

fn commit_count(dir: &Path) -> usize {
    let out = Command::new("git")
        .current_dir(dir)
        .args(["rev-list", "--count", "HEAD"])
        .output()
        .expect("failed to run git");
    if out.status.success() {
        String::from_utf8_lossy(&out.stdout).trim().parse().unwrap()
    } else {
        0
    }
}

#[test]
fn test_rotation_commits_pending_log() {
    let temp = TempDir::new().unwrap();
    init_repo(temp.path());
    std::fs::write(
        temp.path().join(WORK_LOG),
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n",
    )
    .unwrap();

    let rotated = rotate::rotate_in(temp.path(), None, None).unwrap();
    assert!(rotated);
    assert_eq!(commit_count(temp.path()), 1);
    assert_eq!(git(temp.path(), &["log", "-1", "--format=%s"]), "Rotating logs");

    // The rotated log is in history, not in the worktree.
    assert_eq!(
        git(temp.path(), &["show", &format!("HEAD:{}", ROTATED_LOG)]),
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
    );
    assert!(!temp.path().join(ROTATED_LOG).exists());

    // A fresh, empty pending log is ready for the next interval.
    let work = temp.path().join(WORK_LOG);
    assert!(work.exists());
    assert_eq!(work.metadata().unwrap().len(), 0);
}

#[test]
fn test_empty_pending_log_is_a_noop() {
    let temp = TempDir::new().unwrap();
    init_repo(temp.path());

    assert!(!rotate::rotate_in(temp.path(), None, None).unwrap());
    assert_eq!(commit_count(temp.path()), 0);

    std::fs::write(temp.path().join(WORK_LOG), "").unwrap();
    assert!(!rotate::rotate_in(temp.path(), None, None).unwrap());
    assert_eq!(commit_count(temp.path()), 0);
}

#[test]
fn test_dangling_rotated_log_committed_first() {
    let temp = TempDir::new().unwrap();
    init_repo(temp.path());

    // A crash between rename and commit leaves hashes.log behind.
    std::fs::write(
        temp.path().join(ROTATED_LOG),
        "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n",
    )
    .unwrap();
    std::fs::write(
        temp.path().join(WORK_LOG),
        "cccccccccccccccccccccccccccccccccccccccc\n",
    )
    .unwrap();

    assert!(rotate::rotate_in(temp.path(), None, None).unwrap());
    assert_eq!(commit_count(temp.path()), 2);

    // Recovery commit first, annotated with the leftover file's age.
    let messages = git(temp.path(), &["log", "--format=%s"]);
    let messages: Vec<&str> = messages.lines().collect();
    assert_eq!(messages[0], "Rotating logs");
    assert!(messages[1].starts_with("Found uncommitted data from "));

    assert_eq!(
        git(temp.path(), &["show", &format!("HEAD~1:{}", ROTATED_LOG)]),
        "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
    );
    assert_eq!(
        git(temp.path(), &["show", &format!("HEAD:{}", ROTATED_LOG)]),
        "cccccccccccccccccccccccccccccccccccccccc"
    );
    assert_eq!(temp.path().join(WORK_LOG).metadata().unwrap().len(), 0);
}
