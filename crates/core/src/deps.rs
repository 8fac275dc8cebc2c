//! Dependency-map merge for package manifests.
//!
//! One policy is used everywhere manifests are merged (dependencies, dev and
//! peer dependencies, overrides, catalogs): start from upstream, keep every
//! fork-only entry, and when both sides pin the same package the
//! numerically greater version wins. Ties and specifiers that cannot be
//! compared (protocols, paths, `workspace:` / `catalog:` references) keep
//! upstream's value.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tracing::debug;

/// Outcome of comparing two version specifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Greater,
    Less,
    Equal,
    Incomparable,
}

/// A parsed `major.minor.patch[-prerelease]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Version {
    /// Parse a specifier after stripping range prefixes (`^ ~ >= > = v`).
    ///
    /// Returns `None` for anything that is not a single concrete version:
    /// protocol URLs, local paths, workspace/catalog references, wildcards,
    /// compound ranges.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut s = spec.trim();
        while let Some(rest) = s.strip_prefix(['^', '~', '>', '=', 'v']) {
            s = rest.trim_start();
        }
        if s.is_empty()
            || s.contains(char::is_whitespace)
            || s.contains("||")
            || s.contains(':')
            || s.contains('/')
        {
            return None;
        }

        // Build metadata never affects precedence.
        let s = s.split_once('+').map_or(s, |(core, _)| core);
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return None,
            None => (s, None),
        };

        let mut parts = core.split('.');
        let major = parts.next()?.parse::<u64>().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u64>().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse::<u64>().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // A release outranks any prerelease of the same version.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare dot-separated prerelease identifiers: numeric ones numerically,
/// numeric below alphanumeric, otherwise lexically.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Compare two specifiers semantically.
pub fn compare_specifiers(a: &str, b: &str) -> VersionOrdering {
    if a.trim() == b.trim() {
        return VersionOrdering::Equal;
    }
    match (Version::parse(a), Version::parse(b)) {
        (Some(x), Some(y)) => match x.cmp(&y) {
            Ordering::Greater => VersionOrdering::Greater,
            Ordering::Less => VersionOrdering::Less,
            Ordering::Equal => VersionOrdering::Equal,
        },
        _ => VersionOrdering::Incomparable,
    }
}

/// The merged map plus a human-readable log of every decision.
#[derive(Debug, Clone, Default)]
pub struct DependencyMerge {
    pub result: Map<String, Value>,
    pub change_log: Vec<String>,
}

/// Stateless dependency-map merge engine.
pub struct DependencyMerger;

impl DependencyMerger {
    /// Merge the fork's map (`ours`) with upstream's (`theirs`).
    ///
    /// Upstream's key order is kept; fork-only keys are appended in the
    /// fork's order. Every key of either input is present in the result.
    pub fn merge(ours: &Map<String, Value>, theirs: &Map<String, Value>) -> DependencyMerge {
        let mut result = theirs.clone();
        let mut change_log = Vec::new();

        for (name, ours_value) in ours {
            let Some(theirs_value) = theirs.get(name) else {
                change_log.push(format!(
                    "{name}: kept fork-only dependency {}",
                    display_value(ours_value)
                ));
                result.insert(name.clone(), ours_value.clone());
                continue;
            };
            if theirs_value == ours_value {
                continue;
            }

            let (Some(o), Some(t)) = (ours_value.as_str(), theirs_value.as_str()) else {
                change_log.push(format!(
                    "{name}: non-string specifier, kept upstream {}",
                    display_value(theirs_value)
                ));
                continue;
            };

            match compare_specifiers(o, t) {
                VersionOrdering::Greater => {
                    change_log.push(format!("{name}: kept fork {o} (newer than upstream {t})"));
                    result.insert(name.clone(), ours_value.clone());
                }
                VersionOrdering::Less => {
                    change_log.push(format!("{name}: took upstream {t} (newer than fork {o})"));
                }
                VersionOrdering::Equal => {
                    change_log.push(format!("{name}: {o} and {t} are equivalent, kept upstream {t}"));
                }
                VersionOrdering::Incomparable => {
                    change_log.push(format!(
                        "{name}: cannot compare fork {o} with upstream {t}, kept upstream"
                    ));
                }
            }
        }

        debug!(
            ours = ours.len(),
            theirs = theirs.len(),
            merged = result.len(),
            decisions = change_log.len(),
            "merged dependency map"
        );
        DependencyMerge { result, change_log }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
