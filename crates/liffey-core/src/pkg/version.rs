//! Semver range matching against candidate version sets.
//!
//! npm ranges are a superset of what [`semver::VersionReq`] parses, so
//! ranges are normalized first: bare versions become exact comparators,
//! hyphen ranges and x-ranges become comparator pairs, space-separated
//! comparators become comma-separated ones, and `||` alternatives are
//! matched independently.

use super::error::PkgError;
use semver::{Version, VersionReq};

/// Return the candidate versions satisfying `range`, sorted ascending.
///
/// The last element is the greatest satisfying version. An unparseable
/// range is an error so that callers can fall back to dist-tag lookup;
/// a parseable range with no matches returns an empty vector.
///
/// # Errors
/// Returns `PKG_SPEC_INVALID` when no alternative of the range parses as
/// a semver range.
pub fn matching_versions(range: &str, candidates: &[String]) -> Result<Vec<Version>, PkgError> {
    let reqs = parse_range(range)?;

    let mut matched: Vec<Version> = candidates
        .iter()
        .filter_map(|c| Version::parse(c).ok())
        .filter(|v| reqs.iter().any(|req| req.matches(v)))
        .collect();
    matched.sort();
    Ok(matched)
}

/// Parse an npm range into its `||` alternatives.
///
/// Invalid alternatives are skipped; the range as a whole is invalid only
/// when nothing parses.
fn parse_range(range: &str) -> Result<Vec<VersionReq>, PkgError> {
    let range = range.trim();

    let reqs: Vec<VersionReq> = range
        .split("||")
        .map(str::trim)
        .filter_map(|alt| parse_alternative(alt).ok())
        .collect();

    if reqs.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid version range '{range}'"
        )));
    }
    Ok(reqs)
}

fn parse_alternative(alt: &str) -> Result<VersionReq, PkgError> {
    let invalid = |e| PkgError::spec_invalid(format!("Invalid version range '{alt}': {e}"));

    // An empty alternative or a wildcard matches everything.
    if alt.is_empty() || matches!(alt, "*" | "x" | "X") {
        return VersionReq::parse(">=0.0.0").map_err(invalid);
    }

    // A bare version is an exact requirement in npm, not a caret one.
    if let Ok(exact) = Version::parse(alt) {
        return VersionReq::parse(&format!("={exact}")).map_err(invalid);
    }

    // Hyphen ranges: "1.0.0 - 2.0.0" means ">=1.0.0, <=2.0.0".
    if let Some((start, end)) = split_hyphen_range(alt) {
        return VersionReq::parse(&format!(">={start}, <={end}")).map_err(invalid);
    }

    // X-ranges: "1.x" / "1.2.x" / "1.*".
    if let Some(converted) = convert_x_range(alt) {
        return VersionReq::parse(&converted).map_err(invalid);
    }

    // Space-separated comparators mean AND: ">= 2.1.2 < 3.0.0".
    let joined = join_comparators(alt);
    VersionReq::parse(&joined).map_err(invalid)
}

fn split_hyphen_range(alt: &str) -> Option<(&str, &str)> {
    let (start, end) = alt.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() {
        return None;
    }
    Some((start, end))
}

/// Convert an x-range to a comparator pair, or `None` if `alt` is not one.
///
/// Only dot-parts that are all numeric or `x`/`X`/`*` qualify, so
/// prerelease tags containing the letter x are left alone.
fn convert_x_range(alt: &str) -> Option<String> {
    let is_x = |part: &str| matches!(part, "x" | "X" | "*");
    let is_num = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    let parts: Vec<&str> = alt.split('.').collect();
    if parts.len() > 3 || !parts.iter().all(|p| is_x(p) || is_num(p)) {
        return None;
    }

    match parts.as_slice() {
        [major, minor] | [major, minor, _] if is_num(major) && is_x(minor) => {
            let m: u64 = major.parse().ok()?;
            Some(format!(">={m}.0.0, <{}.0.0", m + 1))
        }
        [major, minor, patch] if is_num(major) && is_num(minor) && is_x(patch) => {
            let m: u64 = major.parse().ok()?;
            let n: u64 = minor.parse().ok()?;
            Some(format!(">={m}.{n}.0, <{m}.{}.0", n + 1))
        }
        _ => None,
    }
}

/// Join space-separated comparators with commas, reattaching operators
/// that were separated from their version (">= 1.2.3").
fn join_comparators(alt: &str) -> String {
    let mut out = String::new();
    let mut pending_op: Option<String> = None;

    for token in alt.split_whitespace() {
        let has_digit = token.bytes().any(|b| b.is_ascii_digit());
        if !has_digit {
            match pending_op {
                Some(ref mut op) => op.push_str(token),
                None => pending_op = Some(token.to_string()),
            }
            continue;
        }

        let piece = match pending_op.take() {
            Some(op) => format!("{op}{token}"),
            None => token.to_string(),
        };
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&piece);
    }

    if let Some(op) = pending_op {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&op);
    }

    if out.is_empty() {
        alt.to_string()
    } else {
        out
    }
}
