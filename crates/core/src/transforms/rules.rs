//! Ordered rewrite-rule tables and the line rewriter that applies them.
//!
//! Every text transform is the same engine driven by a different table.
//! Tables are built from the `[branding]` config, most specific pattern
//! first, so that `org/repo` is rewritten before the bare product name can
//! touch it.

use std::collections::BTreeMap;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BrandNames, BrandingConfig};
use crate::errors::ConfigError;
use crate::models::{FileType, Recommendation};

/// Which text transform a rule table belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    Branding,
    I18n,
    Platform,
    Script,
    Extension,
    Web,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 6] = [
        Self::Branding,
        Self::I18n,
        Self::Platform,
        Self::Script,
        Self::Extension,
        Self::Web,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Branding => "branding",
            Self::I18n => "i18n",
            Self::Platform => "platform",
            Self::Script => "script",
            Self::Extension => "extension",
            Self::Web => "web",
        }
    }

    /// The recommendation this table implements.
    pub fn recommendation(&self) -> Recommendation {
        match self {
            Self::Branding => Recommendation::BrandingTransform,
            Self::I18n => Recommendation::I18nTransform,
            Self::Platform => Recommendation::PlatformTransform,
            Self::Script => Recommendation::ScriptTransform,
            Self::Extension => Recommendation::ExtensionTransform,
            Self::Web => Recommendation::WebTransform,
        }
    }

    pub fn from_recommendation(rec: Recommendation) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.recommendation() == rec)
    }

    /// File types this transform is allowed to touch. Branding rewrites any
    /// text file except manifests, which have their own structured merge.
    pub fn handles(&self, file_type: FileType) -> bool {
        match self {
            Self::Branding => file_type != FileType::Manifest,
            Self::I18n => file_type == FileType::I18n,
            Self::Platform => file_type == FileType::PlatformConfig,
            Self::Script => file_type == FileType::Script,
            Self::Extension => file_type == FileType::Extension,
            Self::Web => file_type == FileType::WebDoc,
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Rules and tables
// ---------------------------------------------------------------------------

/// A compiled pattern and its replacement template (`$1` style captures).
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    /// A regex rule. `replacement` may reference capture groups.
    pub fn regex(pattern: &str, replacement: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    /// Replace the literal `from` wherever it is not glued to a neighbouring
    /// word character.
    pub fn word(from: &str, to: &str) -> Result<Self, regex_lite::Error> {
        let start = if from.starts_with(is_word_char) { r"\b" } else { "" };
        let end = if from.ends_with(is_word_char) { r"\b" } else { "" };
        Self::regex(
            &format!("{start}{}{end}", regex_lite::escape(from)),
            &escape_replacement(to),
        )
    }

    /// Replace the literal prefix `from` at the start of a word, keeping the
    /// rest of the word (env var names).
    pub fn prefix(from: &str, to: &str) -> Result<Self, regex_lite::Error> {
        let start = if from.starts_with(is_word_char) { r"\b" } else { "" };
        Self::regex(
            &format!("{start}{}", regex_lite::escape(from)),
            &escape_replacement(to),
        )
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn escape_replacement(s: &str) -> String {
    s.replace('$', "$$")
}

/// An ordered list of rules for one category. Earlier rules run first.
#[derive(Debug, Clone)]
pub struct RuleTable {
    category: RuleCategory,
    rules: Vec<RewriteRule>,
}

impl RuleTable {
    pub fn new(category: RuleCategory, rules: Vec<RewriteRule>) -> Self {
        Self { category, rules }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Naming fragments a table can be built from.
#[derive(Debug, Clone, Copy)]
enum Fragment {
    RepoPath,
    NpmScope,
    Org,
    EnvPrefix,
    Domain,
    BundleId,
    Product,
    Slug,
    UpperSlug,
}

impl RuleCategory {
    fn fragments(&self) -> &'static [Fragment] {
        use Fragment::*;
        match self {
            Self::Branding => &[
                RepoPath, NpmScope, Org, EnvPrefix, Domain, BundleId, Product, Slug, UpperSlug,
            ],
            Self::I18n => &[Domain, Product],
            Self::Platform => &[RepoPath, Org, BundleId, Domain, Product, Slug],
            Self::Script => &[
                RepoPath, NpmScope, Org, EnvPrefix, Domain, Product, Slug, UpperSlug,
            ],
            Self::Extension => &[RepoPath, NpmScope, Org, Domain, Product, Slug],
            Self::Web => &[RepoPath, NpmScope, Org, Domain, Product, Slug],
        }
    }
}

fn fragment_rule(
    fragment: Fragment,
    up: &BrandNames,
    fork: &BrandNames,
) -> Result<Option<RewriteRule>, regex_lite::Error> {
    let pair = match fragment {
        Fragment::RepoPath => Some((
            format!("{}/{}", up.org, up.repo),
            format!("{}/{}", fork.org, fork.repo),
        )),
        Fragment::NpmScope => Some((format!("@{}/", up.scope()), format!("@{}/", fork.scope()))),
        Fragment::Org => Some((up.org.clone(), fork.org.clone())),
        Fragment::EnvPrefix => up.env_prefix.clone().zip(fork.env_prefix.clone()),
        Fragment::Domain => up.domain.clone().zip(fork.domain.clone()),
        Fragment::BundleId => up.bundle_id.clone().zip(fork.bundle_id.clone()),
        Fragment::Product => Some((up.product.clone(), fork.product.clone())),
        Fragment::Slug => Some((up.slug.clone(), fork.slug.clone())),
        Fragment::UpperSlug => {
            let upper = up.slug.to_uppercase();
            if upper == up.slug || upper == up.product {
                None
            } else {
                Some((upper, fork.slug.to_uppercase()))
            }
        }
    };

    let Some((from, to)) = pair else {
        return Ok(None);
    };
    if from.is_empty() || from == to {
        return Ok(None);
    }
    let rule = match fragment {
        Fragment::EnvPrefix => RewriteRule::prefix(&from, &to)?,
        _ => RewriteRule::word(&from, &to)?,
    };
    Ok(Some(rule))
}

/// All category tables for one upstream/fork naming pair.
#[derive(Debug, Clone)]
pub struct RuleSet {
    tables: BTreeMap<RuleCategory, RuleTable>,
}

impl RuleSet {
    /// Build every category table. Configured extra rules run before the
    /// generated ones.
    pub fn from_branding(branding: &BrandingConfig) -> Result<Self, ConfigError> {
        let mut tables = BTreeMap::new();
        for category in RuleCategory::ALL {
            let mut rules = Vec::new();
            for extra in branding.extra_rules.iter().filter(|r| r.category == category) {
                let rule = RewriteRule::regex(&extra.pattern, &extra.replacement).map_err(|e| {
                    ConfigError::InvalidPattern {
                        field: "branding.extra_rules".into(),
                        pattern: extra.pattern.clone(),
                        detail: e.to_string(),
                    }
                })?;
                rules.push(rule);
            }
            for fragment in category.fragments() {
                let rule = fragment_rule(*fragment, &branding.upstream, &branding.fork).map_err(
                    |e| ConfigError::InvalidValue {
                        field: "branding".into(),
                        detail: e.to_string(),
                    },
                )?;
                rules.extend(rule);
            }
            tables.insert(category, RuleTable::new(category, rules));
        }
        Ok(Self { tables })
    }

    pub fn table(&self, category: RuleCategory) -> Option<&RuleTable> {
        self.tables.get(&category)
    }
}

// ---------------------------------------------------------------------------
// Line rewriter
// ---------------------------------------------------------------------------

/// Result of rewriting a piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub content: String,
    /// Substitutions that actually changed text.
    pub replacements: usize,
    /// Human-readable decisions worth surfacing in the report.
    pub notes: Vec<String>,
}

impl Rewrite {
    pub fn unchanged(content: &str) -> Self {
        Self {
            content: content.to_string(),
            replacements: 0,
            notes: Vec::new(),
        }
    }
}

/// Applies a [`RuleTable`] line by line.
///
/// Lines containing the preserve marker are copied verbatim, allowlisted
/// tokens are never touched, and line endings (`\n` or `\r\n`) survive
/// unchanged.
#[derive(Debug, Clone)]
pub struct LineRewriter {
    preserve_marker: String,
    protected: Vec<String>,
}

impl LineRewriter {
    pub fn new(preserve_marker: impl Into<String>, protected: Vec<String>) -> Self {
        Self {
            preserve_marker: preserve_marker.into(),
            protected: protected.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn from_branding(branding: &BrandingConfig) -> Self {
        Self::new(
            branding.preserve_marker.clone(),
            branding.env_allowlist.clone(),
        )
    }

    pub fn rewrite(&self, table: &RuleTable, content: &str) -> Rewrite {
        if table.is_empty() {
            return Rewrite::unchanged(content);
        }

        let mut out = String::with_capacity(content.len());
        let mut replacements = 0;
        for piece in content.split_inclusive('\n') {
            let (body, ending) = split_line_ending(piece);
            if !self.preserve_marker.is_empty() && body.contains(&self.preserve_marker) {
                out.push_str(piece);
                continue;
            }
            let (line, count) = self.rewrite_line(table, body);
            out.push_str(&line);
            out.push_str(ending);
            replacements += count;
        }

        if replacements == 0 {
            return Rewrite::unchanged(content);
        }
        debug!(category = %table.category, replacements, "rewrote text");
        Rewrite {
            content: out,
            replacements,
            notes: Vec::new(),
        }
    }

    /// Rewrite one line in a single pass over the original text.
    ///
    /// Rules claim spans of the input in table order. A later rule only
    /// matches text no earlier rule claimed, so replacement text is never
    /// matched again.
    fn rewrite_line(&self, table: &RuleTable, line: &str) -> (String, usize) {
        let mut claimed: Vec<(usize, usize)> = self.protected_spans(line);
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        let mut count = 0;
        for rule in table.rules() {
            for caps in rule.pattern.captures_iter(line) {
                let Some(m) = caps.get(0) else { continue };
                let (start, end) = (m.start(), m.end());
                if start == end || claimed.iter().any(|&(s, e)| start < e && s < end) {
                    continue;
                }
                let mut replaced = String::new();
                caps.expand(&rule.replacement, &mut replaced);
                claimed.push((start, end));
                if replaced != m.as_str() {
                    count += 1;
                    edits.push((start, end, replaced));
                }
            }
        }
        if edits.is_empty() {
            return (line.to_string(), 0);
        }

        edits.sort_by_key(|&(start, _, _)| start);
        let mut out = String::with_capacity(line.len());
        let mut pos = 0;
        for (start, end, replacement) in edits {
            out.push_str(&line[pos..start]);
            out.push_str(&replacement);
            pos = end;
        }
        out.push_str(&line[pos..]);
        (out, count)
    }

    /// Byte spans of allowlisted tokens standing as whole words.
    fn protected_spans(&self, line: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        for token in &self.protected {
            for (start, _) in line.match_indices(token.as_str()) {
                let end = start + token.len();
                let before_ok = !line[..start].ends_with(is_word_char);
                let after_ok = !line[end..].starts_with(is_word_char);
                if before_ok && after_ok {
                    spans.push((start, end));
                }
            }
        }
        spans
    }
}

fn split_line_ending(piece: &str) -> (&str, &str) {
    if let Some(body) = piece.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = piece.strip_suffix('\n') {
        (body, "\n")
    } else {
        (piece, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtraRule;

    fn names(org: &str, repo: &str, product: &str, slug: &str, env: &str, domain: &str) -> BrandNames {
        BrandNames {
            org: org.into(),
            repo: repo.into(),
            product: product.into(),
            slug: slug.into(),
            env_prefix: Some(env.into()),
            domain: Some(domain.into()),
            npm_scope: None,
            bundle_id: None,
        }
    }

    fn branding() -> BrandingConfig {
        BrandingConfig {
            upstream: names("nimbus-dev", "nimbus", "Nimbus", "nimbus", "NIMBUS_", "nimbus.dev"),
            fork: names("cirrus-labs", "cirrus", "Cirrus", "cirrus", "CIRRUS_", "cirrus.sh"),
            preserve_marker: "forksync:preserve".into(),
            env_allowlist: vec!["NIMBUS_API_KEY".into()],
            extra_rules: Vec::new(),
        }
    }

    fn run(category: RuleCategory, input: &str) -> Rewrite {
        let config = branding();
        let set = RuleSet::from_branding(&config).unwrap();
        LineRewriter::from_branding(&config).rewrite(set.table(category).unwrap(), input)
    }

    #[test]
    fn test_branding_rewrites_names() {
        let out = run(
            RuleCategory::Branding,
            "Install Nimbus from https://github.com/nimbus-dev/nimbus or nimbus.dev\n",
        );
        assert_eq!(
            out.content,
            "Install Cirrus from https://github.com/cirrus-labs/cirrus or cirrus.sh\n"
        );
        assert_eq!(out.replacements, 3);
    }

    #[test]
    fn test_env_prefix_and_allowlist() {
        let out = run(
            RuleCategory::Branding,
            "export NIMBUS_HOME=1\nexport NIMBUS_API_KEY=secret\n",
        );
        assert_eq!(
            out.content,
            "export CIRRUS_HOME=1\nexport NIMBUS_API_KEY=secret\n"
        );
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_preserve_marker_lines_are_untouched() {
        let input = "Nimbus rocks\nbased on Nimbus // forksync:preserve\n";
        let out = run(RuleCategory::Branding, input);
        assert_eq!(out.content, "Cirrus rocks\nbased on Nimbus // forksync:preserve\n");
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_idempotent() {
        let input = "@nimbus-dev/sdk uses NIMBUS_TOKEN on nimbus.dev (Nimbus, nimbus, NIMBUS)\r\n";
        let first = run(RuleCategory::Branding, input);
        assert!(first.replacements > 0);
        let second = run(RuleCategory::Branding, &first.content);
        assert_eq!(second.replacements, 0);
        assert_eq!(second.content, first.content);
    }

    #[test]
    fn test_replacement_text_is_not_rewritten_again() {
        let mut config = branding();
        config.fork.org = "nimbus-community".into();
        let set = RuleSet::from_branding(&config).unwrap();
        let out = LineRewriter::from_branding(&config).rewrite(
            set.table(RuleCategory::Branding).unwrap(),
            "see https://github.com/nimbus-dev/nimbus\n",
        );
        assert_eq!(out.content, "see https://github.com/nimbus-community/cirrus\n");
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_every_category_is_idempotent() {
        let input = "Nimbus docs at https://nimbus.dev by nimbus-dev/nimbus (@nimbus-dev/sdk, nimbus, NIMBUS_HOME)\r\n\
                     keep Nimbus here // forksync:preserve\n\
                     export NIMBUS_API_KEY=1 for Nimbus\n";
        for category in RuleCategory::ALL {
            let first = run(category, input);
            assert!(first.replacements > 0, "{category} rewrote nothing");

            let lines: Vec<&str> = first.content.split_inclusive('\n').collect();
            assert_eq!(lines.len(), 3, "{category}");
            assert!(lines[0].ends_with("\r\n"), "{category}");
            assert_eq!(lines[1], "keep Nimbus here // forksync:preserve\n", "{category}");
            assert_eq!(lines[2], "export NIMBUS_API_KEY=1 for Cirrus\n", "{category}");

            let second = run(category, &first.content);
            assert_eq!(second.replacements, 0, "{category} rewrote its own output");
            assert_eq!(second.content, first.content, "{category}");
        }
    }

    #[test]
    fn test_crlf_and_missing_trailing_newline_preserved() {
        let out = run(RuleCategory::Branding, "Nimbus\r\nnimbus");
        assert_eq!(out.content, "Cirrus\r\ncirrus");
    }

    #[test]
    fn test_no_match_returns_input_unchanged() {
        let out = run(RuleCategory::Branding, "nothing to see here\n");
        assert_eq!(out.replacements, 0);
        assert_eq!(out.content, "nothing to see here\n");
    }

    #[test]
    fn test_word_boundaries() {
        let out = run(RuleCategory::Branding, "nimbuses and MY_NIMBUS_X stay\n");
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn test_i18n_table_is_narrow() {
        let out = run(
            RuleCategory::I18n,
            "{\"title\": \"Welcome to Nimbus\", \"key\": \"nimbus.welcome\"}\n",
        );
        assert_eq!(
            out.content,
            "{\"title\": \"Welcome to Cirrus\", \"key\": \"nimbus.welcome\"}\n"
        );
    }

    #[test]
    fn test_extra_rules_run_first() {
        let mut config = branding();
        config.extra_rules.push(ExtraRule {
            category: RuleCategory::Web,
            pattern: r"Nimbus Cloud".into(),
            replacement: "Cirrus Hosted".into(),
        });
        let set = RuleSet::from_branding(&config).unwrap();
        let out = LineRewriter::from_branding(&config)
            .rewrite(set.table(RuleCategory::Web).unwrap(), "Try Nimbus Cloud or Nimbus\n");
        assert_eq!(out.content, "Try Cirrus Hosted or Cirrus\n");
        assert_eq!(out.replacements, 2);
    }

    #[test]
    fn test_invalid_extra_rule_is_rejected() {
        let mut config = branding();
        config.extra_rules.push(ExtraRule {
            category: RuleCategory::Branding,
            pattern: "(".into(),
            replacement: String::new(),
        });
        assert!(matches!(
            RuleSet::from_branding(&config),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_category_mapping() {
        for category in RuleCategory::ALL {
            assert_eq!(
                RuleCategory::from_recommendation(category.recommendation()),
                Some(category)
            );
        }
        assert_eq!(RuleCategory::from_recommendation(Recommendation::ManifestTransform), None);
        assert!(!RuleCategory::Branding.handles(FileType::Manifest));
        assert!(RuleCategory::Web.handles(FileType::WebDoc));
        assert!(!RuleCategory::Web.handles(FileType::Code));
    }
}
