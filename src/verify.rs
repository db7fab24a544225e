//! Client-side revalidation of server responses.
//!
//! Nothing a server returns is trusted until every structural and
//! cryptographic property has been re-derived locally: byte-exact header
//! prefix, timestamp freshness, zone suffix, signature placement, signature
//! validity, signature freshness and signer identity. Any deviation is
//! fatal to the request.

use crate::clock;
use crate::error::{Error, Result};
use crate::gpg::Pgp;
use crate::object::MAX_ARTIFACT_BYTES;

const SIG_BEGIN: &str = "-----BEGIN PGP SIGNATURE-----";

fn check_size_and_charset(what: &str, text: &str) -> Result<()> {
    if text.len() > MAX_ARTIFACT_BYTES {
        return Err(Error::Validation(format!(
            "returned {} too long ({} > {})",
            what,
            text.len(),
            MAX_ARTIFACT_BYTES
        )));
    }
    if !text
        .bytes()
        .all(|b| b == b'\n' || (0x20..=0x7e).contains(&b))
    {
        return Err(Error::Validation(format!(
            "returned {} does not only contain printable ASCII",
            what
        )));
    }
    Ok(())
}

/// Validate the 10-digit timestamp and the mandatory ` +0000` zone suffix
/// ending the header line that continues at `offset`. Returns the offset of
/// the next line.
fn check_timestamp_zone_eol(header: &str, text: &str, offset: usize) -> Result<usize> {
    let stamp = text.get(offset..offset + 10).ok_or_else(|| {
        Error::Validation(format!("returned {} header is truncated", header))
    })?;
    let istamp: i64 = stamp.parse().map_err(|_| {
        Error::Validation(format!(
            "returned {} timestamp '{}' is not a number",
            header, stamp
        ))
    })?;
    if !clock::within_window(istamp) {
        return Err(Error::Temporal {
            what: header.to_string(),
            stamp: istamp,
            now: clock::sig_time(),
        });
    }
    let tz = text.get(offset + 10..offset + 17).ok_or_else(|| {
        Error::Validation(format!("returned {} header is truncated", header))
    })?;
    if tz != " +0000\n" {
        return Err(Error::Validation(format!(
            "returned {} timezone is not GMT or not at end of line: {:?}",
            header, tz
        )));
    }
    Ok(offset + 17)
}

/// Verify the detached signature and apply the second, independent temporal
/// check against the signature's own embedded creation time, then pin the
/// signer to the previously established identity.
fn verify_signature_and_timestamp(
    pgp: &dyn Pgp,
    expected_key_id: &str,
    signed: &[u8],
    signature: &str,
) -> Result<()> {
    let verified = pgp.verify_detached(signature, signed)?;
    if !clock::within_window(verified.sig_timestamp) {
        return Err(Error::Temporal {
            what: "signature".to_string(),
            stamp: verified.sig_timestamp,
            now: clock::sig_time(),
        });
    }
    if expected_key_id != verified.key_id && expected_key_id != verified.fingerprint {
        return Err(Error::Identity {
            expected: expected_key_id.to_string(),
            got: verified.key_id,
        });
    }
    Ok(())
}

/// Check a returned tag object head to toe.
pub fn validate_tag(
    text: &str,
    commit: &str,
    tagname: &str,
    expected_key_id: &str,
    name: &str,
    pgp: &dyn Pgp,
) -> Result<()> {
    check_size_and_charset("tag", text)?;

    let lead = format!(
        "object {}\ntype commit\ntag {}\ntagger {} ",
        commit, tagname, name
    );
    if !text.starts_with(&lead) {
        return Err(Error::Validation(format!(
            "signed tag does not start with the expected header:\n{}",
            lead
        )));
    }
    let pos = check_timestamp_zone_eol("tagger", text, lead.len())?;
    if text.as_bytes().get(pos) != Some(&b'\n') {
        return Err(Error::Validation(
            "signed tag has unexpected data after 'tagger' header".into(),
        ));
    }

    let marker = format!("\n{}\n\n", SIG_BEGIN);
    match text[lead.len()..].find(&marker) {
        Some(rel) => {
            let pgpstart = lead.len() + rel;
            let signed = &text.as_bytes()[..pgpstart + 1];
            let signature = &text[pgpstart + 1..];
            verify_signature_and_timestamp(pgp, expected_key_id, signed, signature)
        }
        None => Err(Error::Validation("no OpenPGP signature found".into())),
    }
}

/// Check a returned branch timestamp commit head to toe.
pub fn validate_branch(
    text: &str,
    tree: &str,
    parent: Option<&str>,
    commit: &str,
    expected_key_id: &str,
    name: &str,
    pgp: &dyn Pgp,
) -> Result<()> {
    check_size_and_charset("branch commit", text)?;

    let mut lead = format!("tree {}\n", tree);
    if let Some(parent) = parent {
        lead.push_str(&format!("parent {}\n", parent));
    }
    lead.push_str(&format!("parent {}\nauthor {} ", commit, name));
    if !text.starts_with(&lead) {
        return Err(Error::Validation(format!(
            "signed branch commit does not start with the expected header:\n{}",
            lead
        )));
    }
    let pos = check_timestamp_zone_eol("author", text, lead.len())?;

    let follow = format!("committer {} ", name);
    if !text[pos..].starts_with(&follow) {
        return Err(Error::Validation(
            "committer in signed branch commit does not match".into(),
        ));
    }
    let pos = check_timestamp_zone_eol("committer", text, pos + follow.len())?;

    if !text[pos..].starts_with("gpgsig ") {
        return Err(Error::Validation(
            "signed branch commit missing 'gpgsig' after 'committer'".into(),
        ));
    }
    // The armor is space-indented as a multi-line header field: first line
    // follows "gpgsig " directly, the armor's blank line becomes " ".
    let sigbody = &text[pos + 7..];
    let begin = format!("{}\n \n", SIG_BEGIN);
    let end_marker = "\n -----END PGP SIGNATURE-----\n\n";
    let sig_end = match (sigbody.starts_with(&begin), sigbody.find(end_marker)) {
        (true, Some(rel)) => rel + end_marker.len(),
        _ => {
            return Err(Error::Validation(
                "incorrect OpenPGP signature in signed branch commit".into(),
            ))
        }
    };
    let signature = sigbody[..sig_end].replace("\n ", "\n");
    // Everything except the gpgsig field itself; the final newline of the
    // matched range doubles as the blank line before the body.
    let signed = format!("{}{}", &text[..pos], &text[pos + 7 + sig_end - 1..]);

    verify_signature_and_timestamp(pgp, expected_key_id, signed.as_bytes(), &signature)
}
