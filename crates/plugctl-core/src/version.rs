//! Version selection
//!
//! Picks one version out of a list of version strings given a constraint:
//! `latest` (or empty), an exact version, or a `vMAJOR` / `vMAJOR.MINOR`
//! prefix. Ordering is semantic-version precedence; a leading `v` is optional.

use std::cmp::Ordering;

use semver::Version;

use crate::error::{PluginError, Result};

/// Constraint selecting the highest stable version
pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Constraint {
    Latest,
    Exact(Version),
    Major(u64),
    MajorMinor(u64, u64),
    /// Not a recognised shape; only a verbatim match can satisfy it
    Opaque,
}

/// Parse a version string, tolerating a leading `v`
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    Version::parse(stripped).ok()
}

fn parse_constraint(raw: &str) -> Constraint {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(LATEST) {
        return Constraint::Latest;
    }

    if let Some(version) = parse_version(trimmed) {
        return Constraint::Exact(version);
    }

    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let parts: Vec<&str> = stripped.split('.').collect();
    let numbers: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();

    match numbers.as_deref() {
        Some([major]) => Constraint::Major(*major),
        Some([major, minor]) => Constraint::MajorMinor(*major, *minor),
        _ => Constraint::Opaque,
    }
}

impl Constraint {
    fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Latest => true,
            Self::Exact(exact) => version == exact,
            Self::Major(major) => version.major == *major,
            Self::MajorMinor(major, minor) => version.major == *major && version.minor == *minor,
            Self::Opaque => false,
        }
    }
}

/// Compare two version strings by semver precedence.
///
/// Unparseable strings sort below every valid version and lexically among
/// themselves.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// True when `candidate` has strictly higher precedence than `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

/// Ascending semver order with duplicates removed
pub fn sort_versions<S: AsRef<str>>(versions: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = versions.iter().map(|v| v.as_ref().to_string()).collect();
    sorted.sort_by(|a, b| compare_versions(a, b));
    sorted.dedup();
    sorted
}

/// Select the best version in `available` for `constraint`.
pub fn select_version<S: AsRef<str>>(available: &[S], constraint: &str) -> Result<String> {
    select_version_for("the requested item", available, constraint)
}

/// Same as [`select_version`], naming `subject` in the error.
pub fn select_version_for<S: AsRef<str>>(
    subject: &str,
    available: &[S],
    constraint: &str,
) -> Result<String> {
    let not_found = || PluginError::VersionNotFound {
        subject: subject.to_string(),
        constraint: constraint.to_string(),
        available: sort_versions(available),
    };

    // Verbatim hit, even for strings that are not semver.
    if let Some(hit) = available
        .iter()
        .map(AsRef::as_ref)
        .find(|v| *v == constraint.trim() && !constraint.trim().is_empty())
    {
        return Ok(hit.to_string());
    }

    let parsed = parse_constraint(constraint);

    let mut candidates: Vec<(Version, &str)> = Vec::new();
    for raw in available.iter().map(AsRef::as_ref) {
        match parse_version(raw) {
            Some(version) if parsed.matches(&version) => candidates.push((version, raw)),
            Some(_) => {}
            None => tracing::debug!(version = raw, "ignoring unparseable version"),
        }
    }

    if let Constraint::Exact(_) = parsed {
        return candidates
            .into_iter()
            .map(|(_, raw)| raw.to_string())
            .next()
            .ok_or_else(not_found);
    }

    let any_stable = candidates.iter().any(|(v, _)| v.pre.is_empty());
    candidates
        .into_iter()
        .filter(|(v, _)| !any_stable || v.pre.is_empty())
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_string())
        .ok_or_else(not_found)
}
