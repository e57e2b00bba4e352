use std::collections::HashMap;

use chrono::{DateTime, Utc};
use portico_mcp::ServerType;
use serde::{Deserialize, Serialize};

/// Packages known to publish broken or misleading MCP servers.
pub const DENYLISTED_PACKAGES: &[&str] = &["bitcoin-mcp", "mcp-notes"];

/// Command the remote normalizer emits when an entry has no install information.
pub(crate) const PLACEHOLDER_COMMAND: &str = "echo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

/// Server template shipped with an entry: a type tag plus that type's config payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTemplate {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl InstallCommand {
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
        }
    }

    /// A blank command or the `echo` placeholder cannot start a server.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        let command = self.command.trim();
        !command.is_empty() && command != PLACEHOLDER_COMMAND
    }
}

fn git() -> String {
    "git".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(rename = "type", default = "git")]
    pub kind: String,
    pub url: String,
}

/// One installable server template as published by a registry or the local catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub popularity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ServerTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<InstallCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RegistryEntry {
    /// Minimal entry with every optional field empty.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: None,
            popularity: 0,
            difficulty: None,
            tags: Vec::new(),
            template: None,
            install_command: None,
            package_name: None,
            package_registry: None,
            repository: None,
            author: None,
            version: None,
            license: None,
            updated_at: None,
            source: None,
        }
    }

    /// Package name, unless it is blank or denylisted.
    #[must_use]
    pub fn usable_package(&self) -> Option<&str> {
        self.package_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !is_denylisted(p))
    }
}

#[must_use]
pub fn is_denylisted(package: &str) -> bool {
    let package = package.trim();
    DENYLISTED_PACKAGES
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(package))
}

/// Whether `entry` carries enough information to launch a server.
///
/// True when the entry has a runnable install command, a package name that is not
/// denylisted, or a repository URL.
#[must_use]
pub fn is_server_installable(entry: &RegistryEntry) -> bool {
    entry
        .install_command
        .as_ref()
        .is_some_and(InstallCommand::is_runnable)
        || entry.usable_package().is_some()
        || entry
            .repository
            .as_ref()
            .is_some_and(|r| !r.url.trim().is_empty())
}

/// Lowercase name, optionally `@scope/name`, made of `[a-z0-9._-]`.
#[must_use]
pub fn is_valid_npm_package_name(name: &str) -> bool {
    fn segment_ok(segment: &str) -> bool {
        !segment.is_empty()
            && segment.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
            })
    }

    if name.is_empty() || name.len() > 214 {
        return false;
    }
    match name.strip_prefix('@') {
        Some(scoped) => {
            let mut parts = scoped.split('/');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(scope), Some(package), None) if segment_ok(scope) && segment_ok(package)
            )
        }
        None => segment_ok(name),
    }
}

/// Extract `(owner, repo)` from the common spellings of a GitHub repository reference.
#[must_use]
pub fn github_repo(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');

    let (path, bare) = if let Some(rest) = trimmed.strip_prefix("github:") {
        (rest, false)
    } else if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
        (rest, false)
    } else if let Some(idx) = trimmed.find("github.com/") {
        (&trimmed[idx + "github.com/".len()..], false)
    } else if !trimmed.contains("://") {
        (trimmed, true)
    } else {
        return None;
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if bare && segments.len() != 2 {
        return None;
    }
    let (owner, repo) = match segments.as_slice() {
        [owner, repo, ..] => (*owner, repo.trim_end_matches(".git")),
        _ => return None,
    };
    if owner.is_empty() || repo.is_empty() || owner.contains(char::is_whitespace) {
        return None;
    }
    Some((owner.to_owned(), repo.to_owned()))
}

/// Canonical `https://github.com/owner/repo` form, or `None` for non-GitHub references.
#[must_use]
pub fn normalize_github_url(raw: &str) -> Option<String> {
    github_repo(raw).map(|(owner, repo)| format!("https://github.com/{owner}/{repo}"))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn github_spellings_normalize_to_https() {
        for raw in [
            "github:acme/tools",
            "git@github.com:acme/tools.git",
            "https://github.com/acme/tools",
            "https://www.github.com/acme/tools/tree/main",
            "github.com/acme/tools/",
            "acme/tools",
            "https://github.com/acme/tools.git#readme",
        ] {
            assert_eq!(
                normalize_github_url(raw).as_deref(),
                Some("https://github.com/acme/tools"),
                "{raw}"
            );
        }
    }

    #[test]
    fn non_github_references_are_rejected() {
        assert!(normalize_github_url("https://gitlab.com/acme/tools").is_none());
        assert!(normalize_github_url("tools").is_none());
        assert!(normalize_github_url("a/b/c").is_none());
        assert!(normalize_github_url("").is_none());
        assert!(normalize_github_url("https://github.com/acme").is_none());
    }

    #[test]
    fn npm_names() {
        assert!(is_valid_npm_package_name("mcp-server-time"));
        assert!(is_valid_npm_package_name("@modelcontextprotocol/server-github"));
        assert!(is_valid_npm_package_name("pkg.js_2"));
        assert!(!is_valid_npm_package_name("MyPackage"));
        assert!(!is_valid_npm_package_name("@scope"));
        assert!(!is_valid_npm_package_name("@scope/a/b"));
        assert!(!is_valid_npm_package_name("@/pkg"));
        assert!(!is_valid_npm_package_name("has space"));
        assert!(!is_valid_npm_package_name(""));
    }

    #[test]
    fn installability() {
        let bare = RegistryEntry::new("x", "X");
        assert!(!is_server_installable(&bare));

        let mut placeholder = bare.clone();
        placeholder.install_command = Some(InstallCommand::new("echo", ["missing"]));
        assert!(!is_server_installable(&placeholder));

        let mut runnable = bare.clone();
        runnable.install_command = Some(InstallCommand::new("npx", ["-y", "pkg"]));
        assert!(is_server_installable(&runnable));

        let mut denied = bare.clone();
        denied.package_name = Some("mcp-notes".into());
        assert!(!is_server_installable(&denied));

        let mut packaged = bare.clone();
        packaged.package_name = Some("mcp-server-time".into());
        assert!(is_server_installable(&packaged));

        let mut repo = bare;
        repo.repository = Some(Repository {
            kind: "git".into(),
            url: "https://github.com/acme/tools".into(),
        });
        assert!(is_server_installable(&repo));
    }

    #[test]
    fn denylist_is_case_insensitive() {
        assert!(is_denylisted("Bitcoin-MCP"));
        assert!(is_denylisted(" mcp-notes "));
        assert!(!is_denylisted("mcp-notes-pro"));
    }

    #[test]
    fn entry_deserializes_with_defaults() {
        let entry: RegistryEntry = serde_json::from_value(serde_json::json!({
            "id": "filesystem",
            "name": "Filesystem",
            "difficulty": "beginner",
            "template": { "type": "filesystem", "config": { "rootPath": "~" } },
            "repository": { "url": "https://github.com/modelcontextprotocol/servers" },
            "somethingElse": true
        }))
        .unwrap();
        assert_eq!(entry.difficulty, Some(Difficulty::Beginner));
        assert_eq!(entry.repository.unwrap().kind, "git");
        assert!(entry.tags.is_empty());
        assert_eq!(
            entry.template.unwrap().server_type,
            portico_mcp::ServerType::Filesystem
        );
    }

    proptest! {
        #[test]
        fn uppercase_is_never_a_valid_npm_name(name in "[a-z]{0,8}[A-Z][a-zA-Z0-9-]{0,8}") {
            prop_assert!(!is_valid_npm_package_name(&name));
        }

        #[test]
        fn normalized_github_url_is_a_fixed_point(owner in "[a-z][a-z0-9-]{0,10}", repo in "[a-z][a-z0-9_]{0,10}") {
            let url = normalize_github_url(&format!("git@github.com:{owner}/{repo}.git")).unwrap();
            prop_assert_eq!(normalize_github_url(&url), Some(url.clone()));
        }
    }
}
