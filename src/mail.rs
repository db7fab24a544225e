//! Verification of clearsigned mail replies from an external PGP
//! timestamper against the rotated log they are supposed to attest.
//!
//! The reply must embed the log contiguously and completely; only a
//! bounded number of extra lines is tolerated around it.

/// Extra lines allowed before and after the embedded log.
pub const DEFAULT_SLICE_TOLERANCE: usize = 20;

/// How many foreign lines surround the embedded log in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceMargins {
    pub before: usize,
    pub after: usize,
}

/// Extract the clearsigned part of a mail body: from the signed-message
/// marker up to and including the end-of-signature marker.
pub fn extract_pgp_body(body: &str) -> Option<Vec<&str>> {
    let lines: Vec<&str> = body.lines().collect();
    let start = lines
        .iter()
        .position(|l| *l == "-----BEGIN PGP SIGNED MESSAGE-----")?;
    let end = lines[start..]
        .iter()
        .position(|l| *l == "-----END PGP SIGNATURE-----")?;
    Some(lines[start..start + end + 1].to_vec())
}

/// Check that `bodylines` contains every line of `log`, in order and
/// without gaps, and report how many lines surround the embedded log.
///
/// Leading slack lines must be empty or start with `#` or `-`. After the
/// log, only empty lines may precede the signature block, and nothing in
/// the signature block besides its markers may start with `-`.
pub fn body_contains_log(bodylines: &[&str], log: &str) -> Option<SliceMargins> {
    let mut loglines = log.lines().map(str::trim_end);
    let firstline = loglines.next()?;

    let mut before = 0;
    let mut i = bodylines.iter().position(|l| *l == firstline)?;
    for line in &bodylines[..i] {
        if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
            before += 1;
        } else {
            return None;
        }
    }

    // The log must appear contiguously.
    i += 1;
    for logline in loglines {
        if bodylines.get(i).copied() != Some(logline) {
            return None;
        }
        i += 1;
    }
    let after = bodylines.len() - i;

    // Only empty lines between the log and the signature block.
    i += 1;
    while bodylines.get(i).copied() == Some("") {
        i += 1;
    }
    if bodylines.get(i).copied() != Some("-----BEGIN PGP SIGNATURE-----") {
        return None;
    }

    // Nothing else in the signature block may look like a marker.
    for line in &bodylines[i + 1..bodylines.len() - 1] {
        if !line.is_empty() && line.starts_with('-') {
            return None;
        }
    }
    Some(SliceMargins { before, after })
}

/// Full slice check for a reply body: extract the clearsigned part, locate
/// the log in it, and bound the surrounding slack.
pub fn verify_log_slice(body: &str, log: &str, tolerance: usize) -> Option<Vec<String>> {
    let bodylines = extract_pgp_body(body)?;
    let margins = body_contains_log(&bodylines, log)?;
    if margins.before > tolerance || margins.after > tolerance {
        tracing::warn!(
            "reply has too many surrounding lines ({} before, {} after)",
            margins.before,
            margins.after
        );
        return None;
    }
    Some(bodylines.into_iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
                       bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n";

    fn reply(before: &str, after: &str) -> String {
        format!(
            "Some mail preamble\n\
             \n\
             -----BEGIN PGP SIGNED MESSAGE-----\n\
             {}aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
             bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
             {}\n\
             -----BEGIN PGP SIGNATURE-----\n\
             \n\
             c2lnbmF0dXJlZGF0YQ==\n\
             -----END PGP SIGNATURE-----\n\
             Mail trailer\n",
            before, after
        )
    }

    #[test]
    fn test_extract_pgp_body() {
        let body = reply("", "");
        let lines = extract_pgp_body(&body).unwrap();
        assert_eq!(lines[0], "-----BEGIN PGP SIGNED MESSAGE-----");
        assert_eq!(*lines.last().unwrap(), "-----END PGP SIGNATURE-----");
        assert!(extract_pgp_body("no signature here\n").is_none());
    }

    #[test]
    fn test_contains_log_exact() {
        let body = reply("", "");
        let lines = extract_pgp_body(&body).unwrap();
        let margins = body_contains_log(&lines, LOG).unwrap();
        assert_eq!(margins, SliceMargins { before: 1, after: 5 });
    }

    #[test]
    fn test_leading_comment_lines_allowed() {
        let body = reply("# stamper header\n\n", "");
        let lines = extract_pgp_body(&body).unwrap();
        assert!(body_contains_log(&lines, LOG).is_some());
    }

    #[test]
    fn test_foreign_leading_line_rejected() {
        let body = reply("injected content\n", "");
        let lines = extract_pgp_body(&body).unwrap();
        assert!(body_contains_log(&lines, LOG).is_none());
    }

    #[test]
    fn test_gap_in_log_rejected() {
        let body = reply("", "");
        let tampered = body.replace(
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "cccccccccccccccccccccccccccccccccccccccc",
        );
        let lines = extract_pgp_body(&tampered).unwrap();
        assert!(body_contains_log(&lines, LOG).is_none());
    }

    #[test]
    fn test_tolerance_enforced() {
        let body = reply("", "");
        assert!(verify_log_slice(&body, LOG, DEFAULT_SLICE_TOLERANCE).is_some());
        assert!(verify_log_slice(&body, LOG, 0).is_none());
    }
}
