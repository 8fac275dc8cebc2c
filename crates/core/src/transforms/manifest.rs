//! Structured rewrite of `package.json` manifests.
//!
//! Unlike the text transforms this one parses JSON: package names are
//! renamed, dependency maps are merged with the fork's copy through
//! [`DependencyMerger`], the version is pinned to the fork's release, and
//! fork-only entries (dependencies, overrides, workspace members) are
//! restored. Key order is preserved throughout.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{BrandingConfig, ManifestConfig};
use crate::deps::DependencyMerger;
use crate::errors::TransformError;
use crate::transforms::rules::Rewrite;

const DEPENDENCY_SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

const OVERRIDE_SECTIONS: [&str; 3] = ["overrides", "resolutions", "patchedDependencies"];

/// Rewrites one manifest given upstream's text and, optionally, the fork's.
#[derive(Debug, Clone)]
pub struct ManifestTransform {
    root_manifest: String,
    package_renames: BTreeMap<String, String>,
    scope_rename: Option<(String, String)>,
    fork_version: Option<String>,
    fork_only_dependencies: BTreeMap<String, BTreeMap<String, String>>,
}

impl ManifestTransform {
    pub fn new(
        manifest: &ManifestConfig,
        branding: &BrandingConfig,
        fork_version: Option<String>,
    ) -> Self {
        let up_scope = format!("@{}/", branding.upstream.scope());
        let fork_scope = format!("@{}/", branding.fork.scope());
        Self {
            root_manifest: manifest.root.clone(),
            package_renames: manifest.package_renames.clone(),
            scope_rename: (up_scope != fork_scope).then_some((up_scope, fork_scope)),
            fork_version,
            fork_only_dependencies: manifest.fork_only_dependencies.clone(),
        }
    }

    /// Fork-side name for an upstream package, if it is renamed.
    pub fn rename_package(&self, name: &str) -> Option<String> {
        if let Some(renamed) = self.package_renames.get(name) {
            return (renamed != name).then(|| renamed.clone());
        }
        let (from, to) = self.scope_rename.as_ref()?;
        name.strip_prefix(from.as_str())
            .map(|rest| format!("{to}{rest}"))
    }

    /// Rewrite `theirs` (upstream's manifest). `ours` is the fork's copy of
    /// the same file when one exists.
    ///
    /// Returns the input byte-for-byte when nothing changes.
    pub fn transform(
        &self,
        path: &str,
        theirs: &str,
        ours: Option<&str>,
    ) -> Result<Rewrite, TransformError> {
        let mut doc = parse_object(path, theirs)?;
        let ours_doc = ours.map(|text| parse_object(path, text)).transpose()?;

        let mut changes = 0;
        let mut notes = Vec::new();

        // Package name.
        if let Some(Value::String(name)) = doc.get("name") {
            if let Some(renamed) = self.rename_package(name) {
                notes.push(format!("name: {name} -> {renamed}"));
                doc.insert("name".into(), Value::String(renamed));
                changes += 1;
            }
        }

        // Dependency sections: rename keys, then merge with the fork's copy.
        for section in DEPENDENCY_SECTIONS {
            if let Some(Value::Object(deps)) = doc.get(section) {
                let (renamed, count) = self.rename_keys(deps, section, &mut notes);
                if count > 0 {
                    doc.insert(section.into(), Value::Object(renamed));
                    changes += count;
                }
            }
            let ours_section = ours_doc.as_ref().and_then(|o| o.get(section));
            changes += merge_section(&mut doc, section, ours_section, &mut notes);
        }

        // Version.
        if let Some(version) = &self.fork_version {
            if let Some(current) = doc.get("version") {
                if current.as_str() != Some(version.as_str()) {
                    notes.push(format!("version: {} -> {version}", display(current)));
                    doc.insert("version".into(), Value::String(version.clone()));
                    changes += 1;
                }
            }
        }

        // Fork-only dependencies declared in config.
        if let Some(extra) = self.fork_only_dependencies.get(path) {
            changes += inject_dependencies(&mut doc, extra, &mut notes);
        }

        for section in OVERRIDE_SECTIONS {
            let ours_section = ours_doc.as_ref().and_then(|o| o.get(section));
            changes += merge_section(&mut doc, section, ours_section, &mut notes);
        }

        if path == self.root_manifest {
            if let Some(ours_doc) = &ours_doc {
                changes += merge_workspaces(&mut doc, ours_doc, &mut notes);
                changes += merge_section(&mut doc, "catalog", ours_doc.get("catalog"), &mut notes);
            }
        }

        debug!(path, changes, "manifest transform");
        if changes == 0 {
            return Ok(Rewrite::unchanged(theirs));
        }

        let mut content = serde_json::to_string_pretty(&Value::Object(doc)).map_err(|e| {
            TransformError::InvalidJson {
                path: path.to_string(),
                detail: e.to_string(),
            }
        })?;
        content.push('\n');
        Ok(Rewrite {
            content,
            replacements: changes,
            notes,
        })
    }

    fn rename_keys(
        &self,
        deps: &Map<String, Value>,
        section: &str,
        notes: &mut Vec<String>,
    ) -> (Map<String, Value>, usize) {
        let mut renamed = Map::new();
        let mut count = 0;
        for (name, spec) in deps {
            match self.rename_package(name) {
                Some(new_name) => {
                    notes.push(format!("{section}: renamed {name} -> {new_name}"));
                    renamed.insert(new_name, spec.clone());
                    count += 1;
                }
                None => {
                    renamed.insert(name.clone(), spec.clone());
                }
            }
        }
        (renamed, count)
    }
}

fn parse_object(path: &str, text: &str) -> Result<Map<String, Value>, TransformError> {
    let value: Value = serde_json::from_str(text).map_err(|e| TransformError::InvalidJson {
        path: path.to_string(),
        detail: e.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(TransformError::NotAnObject(path.to_string())),
    }
}

/// Merge the fork's `key` map into `doc[key]`. Returns the number of entries
/// that differ from upstream's map afterwards.
fn merge_section(
    doc: &mut Map<String, Value>,
    key: &str,
    ours: Option<&Value>,
    notes: &mut Vec<String>,
) -> usize {
    let Some(Value::Object(ours)) = ours else {
        return 0;
    };
    let theirs = match doc.get(key) {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return 0,
        None => Map::new(),
    };

    let merged = DependencyMerger::merge(ours, &theirs);
    let changed = merged
        .result
        .iter()
        .filter(|(name, value)| theirs.get(*name) != Some(*value))
        .count();
    if changed > 0 {
        notes.extend(merged.change_log.into_iter().map(|line| format!("{key}: {line}")));
        doc.insert(key.to_string(), Value::Object(merged.result));
    }
    changed
}

fn inject_dependencies(
    doc: &mut Map<String, Value>,
    extra: &BTreeMap<String, String>,
    notes: &mut Vec<String>,
) -> usize {
    let mut count = 0;
    for (name, spec) in extra {
        let present = DEPENDENCY_SECTIONS.iter().any(|section| {
            matches!(doc.get(*section), Some(Value::Object(deps)) if deps.contains_key(name))
        });
        if present {
            continue;
        }
        let deps = doc
            .entry("dependencies")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(deps) = deps {
            deps.insert(name.clone(), Value::String(spec.clone()));
            notes.push(format!("dependencies: injected fork-only {name}@{spec}"));
            count += 1;
        }
    }
    count
}

/// Keep the fork's workspace member list and merge the workspace catalog.
fn merge_workspaces(
    doc: &mut Map<String, Value>,
    ours: &Map<String, Value>,
    notes: &mut Vec<String>,
) -> usize {
    match ours.get("workspaces") {
        Some(Value::Array(members)) => {
            let fork_members = Value::Array(members.clone());
            if doc.get("workspaces") == Some(&fork_members) {
                return 0;
            }
            notes.push("workspaces: kept fork member list".into());
            doc.insert("workspaces".into(), fork_members);
            1
        }
        Some(Value::Object(ours_ws)) => {
            let mut ws = match doc.get("workspaces") {
                Some(Value::Object(theirs_ws)) => theirs_ws.clone(),
                _ => Map::new(),
            };
            let mut count = 0;
            if let Some(packages) = ours_ws.get("packages") {
                if ws.get("packages") != Some(packages) {
                    notes.push("workspaces.packages: kept fork member list".into());
                    ws.insert("packages".into(), packages.clone());
                    count += 1;
                }
            }
            count += merge_section(&mut ws, "catalog", ours_ws.get("catalog"), notes);
            if count > 0 {
                doc.insert("workspaces".into(), Value::Object(ws));
            }
            count
        }
        _ => 0,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
