//! Identifier validation as defined by the timestamping protocol.
//!
//! The server enforces `valid_commit` and `valid_tag` on every request;
//! the client additionally restricts ref names it is willing to create
//! with `valid_ref_name`.

/// Exactly 40 lowercase hex characters, nothing else.
pub fn valid_commit(commit: &str) -> bool {
    commit.len() == 40
        && commit
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Server-side tag names: a letter followed by up to 99 of `[-_a-z0-9]`,
/// case-insensitive. Newlines and control characters never match.
pub fn valid_tag(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    if bytes.is_empty() || bytes.len() > 100 {
        return false;
    }
    if !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|&b| matches!(b.to_ascii_lowercase(), b'-' | b'_' | b'a'..=b'z' | b'0'..=b'9'))
}

/// Client-side ref names that can be sanely stored as file names anywhere:
/// `[_a-z][-._a-z0-9]{0,99}` case-insensitive, and never containing `..`.
pub fn valid_ref_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 100 {
        return false;
    }
    if bytes[0] != b'_' && !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    if name.contains("..") {
        return false;
    }
    bytes[1..].iter().all(|&b| {
        matches!(
            b.to_ascii_lowercase(),
            b'-' | b'.' | b'_' | b'a'..=b'z' | b'0'..=b'9'
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_commit() {
        assert!(valid_commit(&"1".repeat(40)));
        assert!(valid_commit("0123456789abcdef0123456789abcdef01234567"));
        assert!(!valid_commit(&"1".repeat(39)));
        assert!(!valid_commit(&"1".repeat(41)));
        assert!(!valid_commit("0123456789ABCDEF0123456789abcdef01234567"));
        assert!(!valid_commit("0123456789abcdeg0123456789abcdef01234567"));
        assert!(!valid_commit(&format!("{}\n{}", "1".repeat(20), "1".repeat(19))));
        assert!(!valid_commit(""));
    }

    #[test]
    fn test_valid_tag() {
        assert!(valid_tag("sample-timestamping-tag"));
        assert!(valid_tag("V1_0"));
        assert!(valid_tag(&format!("a{}", "b".repeat(99))));
        assert!(!valid_tag(&format!("a{}", "b".repeat(100))));
        assert!(!valid_tag(""));
        assert!(!valid_tag("1tag"));
        assert!(!valid_tag("has space"));
        assert!(!valid_tag("has\nnewline"));
        assert!(!valid_tag("dotted.tag"));
    }

    #[test]
    fn test_valid_ref_name() {
        assert!(valid_ref_name("gitta-timestamps"));
        assert!(valid_ref_name("_private"));
        assert!(valid_ref_name("v1.0"));
        assert!(!valid_ref_name("double..dot"));
        assert!(!valid_ref_name("-leading-dash"));
        assert!(!valid_ref_name("has\nnewline"));
        assert!(!valid_ref_name(&"x".repeat(101)));
    }
}
