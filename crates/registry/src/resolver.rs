//! Repository references from published package metadata

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use stackscore_core::{Error, RefId, Result};

const DEFAULT_BASE_URL: &str = "https://cdn.jsdelivr.net";

static SHORT_REPO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^(github[/:])?([^/]+/[^/#?"']+)$"#).expect("valid short repo pattern")
});

static GITHUB_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(git@)?github\.com[/:]([^/]+/[^/#?"']+)(\.git)?"#)
        .expect("valid github pattern")
});

/// Turns package names into repository references
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Resolve what can be resolved; unresolved names are left out.
    async fn resolve(&self, names: &[String]) -> IndexMap<String, RefId>;
}

/// Canonical form of a repository coordinate: no `git@`, `github.com/` or
/// `.git` affixes, lowercase.
pub fn normalize(raw: &str) -> String {
    let s = raw.strip_suffix(".git").unwrap_or(raw);
    let s = s.strip_prefix("git@").unwrap_or(s);
    let s = s.strip_prefix("github.com/").unwrap_or(s);
    s.to_lowercase()
}

/// Every distinct repository mentioned by the `bugs`, `homepage` and
/// `repository` fields of a package manifest.
pub fn scan_for_refs(package: &Value) -> Vec<RefId> {
    let suspects = json!({
        "bugs": package.get("bugs"),
        "homepage": package.get("homepage"),
        "repository": package.get("repository"),
    })
    .to_string();

    let mut hits: Vec<String> = GITHUB_PATTERN
        .captures_iter(&suspects)
        .filter_map(|caps| caps.get(2).map(|m| m.as_str().to_string()))
        .collect();

    if let Some(short) = package
        .get("repository")
        .and_then(Value::as_str)
        .and_then(|repo| SHORT_REPO_PATTERN.captures(repo))
        .and_then(|caps| caps.get(2))
    {
        hits.push(short.as_str().to_string());
    }

    hits.iter()
        .map(|hit| normalize(hit))
        .collect::<IndexSet<_>>()
        .into_iter()
        .map(RefId::new)
        .collect()
}

/// Resolver backed by the jsDelivr npm CDN
#[derive(Debug, Clone)]
pub struct JsDelivrResolver {
    client: reqwest::Client,
    base_url: String,
}

impl Default for JsDelivrResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl JsDelivrResolver {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn manifest_url(&self, name: &str) -> String {
        format!("{}/npm/{}/package.json", self.base_url, name)
    }

    async fn fetch_manifest(&self, name: &str) -> Result<Value> {
        let url = self.manifest_url(name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::network(&url, e.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::network(&url, format!("invalid package.json: {e}")))
    }
}

#[async_trait]
impl ReferenceResolver for JsDelivrResolver {
    async fn resolve(&self, names: &[String]) -> IndexMap<String, RefId> {
        let mut resolved = IndexMap::new();

        for name in names {
            let package = match self.fetch_manifest(name).await {
                Ok(package) => package,
                Err(e) => {
                    tracing::warn!(package = %name, error = %e, "Failed to read package.json for package");
                    continue;
                }
            };

            let mut refs = scan_for_refs(&package);
            match refs.len() {
                0 => tracing::warn!(package = %name, "No match for package"),
                1 => {
                    resolved.insert(name.clone(), refs.remove(0));
                }
                _ => tracing::warn!(package = %name, refs = ?refs, "Ambiguous matches for package"),
            }
        }

        resolved
    }
}
