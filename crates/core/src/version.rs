//! Resolution of a user-supplied target (tag, version, commit or `latest`)
//! to a concrete upstream commit.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::UpstreamConfig;
use crate::deps::Version;
use crate::errors::VcsError;
use crate::vcs::VersionControlPort;

/// A concrete upstream commit to merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTarget {
    /// Version label used in branch and report names (tag without prefix,
    /// or a short commit id).
    pub version: String,
    pub tag: Option<String>,
    pub commit: String,
}

/// A release tag published by upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRelease {
    pub version: String,
    pub tag: String,
    pub prerelease: bool,
}

pub struct VersionResolver<'a, V> {
    vcs: &'a V,
    remote: String,
    branch: String,
    tag_prefix: String,
}

impl<'a, V: VersionControlPort> VersionResolver<'a, V> {
    pub fn new(vcs: &'a V, upstream: &UpstreamConfig) -> Self {
        Self {
            vcs,
            remote: upstream.remote.clone(),
            branch: upstream.branch.clone(),
            tag_prefix: upstream.tag_prefix.clone(),
        }
    }

    fn parse_tag(&self, tag: &str) -> Option<(String, Version)> {
        let version = tag.strip_prefix(self.tag_prefix.as_str()).unwrap_or(tag);
        if !version.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        Version::parse(version).map(|v| (version.to_string(), v))
    }

    /// Upstream release tags, newest first.
    pub async fn list_versions(&self) -> Result<Vec<UpstreamRelease>, VcsError> {
        let tags = self.vcs.list_remote_tags(&self.remote).await?;
        let mut parsed: Vec<(Version, UpstreamRelease)> = tags
            .into_iter()
            .filter_map(|tag| {
                let (version, semver) = self.parse_tag(&tag)?;
                let release = UpstreamRelease {
                    version,
                    prerelease: semver.pre.is_some(),
                    tag,
                };
                Some((semver, release))
            })
            .collect();
        parsed.sort_by(|a, b| b.0.cmp(&a.0));
        parsed.dedup_by(|a, b| a.0 == b.0);
        debug!(count = parsed.len(), "listed upstream versions");
        Ok(parsed.into_iter().map(|(_, release)| release).collect())
    }

    /// The newest stable release, or the tip of the upstream branch when
    /// upstream has no stable tags.
    pub async fn latest_upstream(&self) -> Result<Option<UpstreamTarget>, VcsError> {
        for release in self.list_versions().await? {
            if release.prerelease {
                continue;
            }
            if let Some(commit) = self.vcs.rev_parse(&format!("refs/tags/{}", release.tag)).await? {
                info!(version = %release.version, commit = %commit, "resolved latest upstream release");
                return Ok(Some(UpstreamTarget {
                    version: release.version,
                    tag: Some(release.tag),
                    commit,
                }));
            }
        }

        let branch_ref = format!("{}/{}", self.remote, self.branch);
        let Some(commit) = self.vcs.rev_parse(&branch_ref).await? else {
            return Ok(None);
        };
        info!(branch = %branch_ref, commit = %commit, "no stable tag; using upstream branch tip");
        self.describe_commit(commit).await.map(Some)
    }

    /// Resolve `latest`, a version (`1.2.3`), a tag (`v1.2.3`) or a commit
    /// id. `None` if nothing matches.
    pub async fn resolve(&self, input: &str) -> Result<Option<UpstreamTarget>, VcsError> {
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("latest") {
            return self.latest_upstream().await;
        }

        let mut candidates = vec![input.to_string()];
        if !input.starts_with(self.tag_prefix.as_str()) {
            candidates.push(format!("{}{input}", self.tag_prefix));
        }
        for tag in candidates {
            if let Some(commit) = self.vcs.rev_parse(&format!("refs/tags/{tag}")).await? {
                let version = tag
                    .strip_prefix(self.tag_prefix.as_str())
                    .unwrap_or(&tag)
                    .to_string();
                debug!(input, tag = %tag, "resolved target as tag");
                return Ok(Some(UpstreamTarget {
                    version,
                    tag: Some(tag),
                    commit,
                }));
            }
        }

        if is_commit_id(input) {
            if let Some(commit) = self.vcs.rev_parse(input).await? {
                debug!(input, "resolved target as commit");
                return self.describe_commit(commit).await.map(Some);
            }
        }
        Ok(None)
    }

    /// Label a bare commit with a release tag pointing at it, if any.
    async fn describe_commit(&self, commit: String) -> Result<UpstreamTarget, VcsError> {
        let tags = self.vcs.tags_pointing_at(&commit).await?;
        if let Some((tag, version)) = tags
            .iter()
            .find_map(|t| self.parse_tag(t).map(|(v, _)| (t.clone(), v)))
        {
            return Ok(UpstreamTarget {
                version,
                tag: Some(tag),
                commit,
            });
        }
        Ok(UpstreamTarget {
            version: commit.chars().take(10).collect(),
            tag: None,
            commit,
        })
    }
}

fn is_commit_id(s: &str) -> bool {
    (7..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}
