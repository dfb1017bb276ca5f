use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Site id of the fallback bundle. Never a registry entry, never a match.
pub const DEFAULT_SITE_ID: &str = "_default";
pub const DEFAULT_CHUNK: &str = "sites/_default.js";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    #[default]
    DocumentIdle,
    DocumentStart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub chunk: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub run_at: RunAt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// `*.example.com`, stored as `example.com`.
    Wildcard(String),
}

impl HostPattern {
    fn parse(raw: &str) -> Result<Self> {
        let pattern = normalize_host(raw);
        if pattern.is_empty() {
            bail!("empty hostname pattern");
        }
        match pattern.strip_prefix("*.") {
            Some(base) if !base.is_empty() && !base.contains('*') => {
                Ok(HostPattern::Wildcard(base.to_string()))
            }
            Some(_) => bail!("malformed wildcard pattern {raw}"),
            None if pattern.contains('*') => bail!("wildcard only allowed as a leading `*.` label: {raw}"),
            None => Ok(HostPattern::Exact(pattern)),
        }
    }

    fn matches_exact(&self, host: &str) -> bool {
        matches!(self, HostPattern::Exact(exact) if exact == host)
    }

    fn matches_wildcard(&self, host: &str) -> bool {
        let HostPattern::Wildcard(base) = self else {
            return false;
        };
        host == base
            || host
                .strip_suffix(base.as_str())
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1)
    }
}

/// Lower-cases and drops a trailing root dot.
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    entry: RegistryEntry,
    patterns: Vec<HostPattern>,
}

/// The bundle chosen for a hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bundle<'a> {
    Site(&'a RegistryEntry),
    Default { chunk: &'a str },
}

impl Bundle<'_> {
    pub fn site_id(&self) -> &str {
        match self {
            Bundle::Site(entry) => &entry.id,
            Bundle::Default { .. } => DEFAULT_SITE_ID,
        }
    }

    pub fn chunk(&self) -> &str {
        match self {
            Bundle::Site(entry) => &entry.chunk,
            Bundle::Default { chunk } => chunk,
        }
    }

    pub fn run_at(&self) -> RunAt {
        match self {
            Bundle::Site(entry) => entry.run_at,
            Bundle::Default { .. } => RunAt::DocumentIdle,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Bundle::Default { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DomainRegistry {
    entries: Vec<CompiledEntry>,
    default_chunk: String,
}

impl DomainRegistry {
    pub fn new(entries: Vec<RegistryEntry>, default_chunk: impl Into<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.id.trim().is_empty() {
                bail!("registry entry with empty id");
            }
            if entry.id == DEFAULT_SITE_ID {
                bail!("{DEFAULT_SITE_ID} is reserved for the fallback bundle");
            }
            if !seen.insert(entry.id.clone()) {
                bail!("duplicate registry entry {}", entry.id);
            }
            if entry.patterns.is_empty() {
                bail!("registry entry {} has no patterns", entry.id);
            }
            let patterns = entry
                .patterns
                .iter()
                .map(|raw| HostPattern::parse(raw))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("invalid pattern in registry entry {}", entry.id))?;
            compiled.push(CompiledEntry { entry, patterns });
        }

        Ok(Self {
            entries: compiled,
            default_chunk: default_chunk.into(),
        })
    }

    pub fn from_json(raw: &str, default_chunk: impl Into<String>) -> Result<Self> {
        let entries: Vec<RegistryEntry> =
            serde_json::from_str(raw).context("failed to parse domain registry")?;
        Self::new(entries, default_chunk)
    }

    pub fn load(path: &Path, default_chunk: impl Into<String>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read domain registry {}", path.display()))?;
        Self::from_json(&raw, default_chunk)
    }

    /// Sites the crate knows how to capture without a registry file.
    pub fn builtin() -> Self {
        let entry = |id: &str, patterns: &[&str]| RegistryEntry {
            id: id.to_string(),
            chunk: format!("sites/{id}.js"),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            run_at: RunAt::DocumentIdle,
        };
        let compiled = [
            entry("youtube", &["youtube.com", "*.youtube.com", "youtu.be"]),
            entry("twitter", &["twitter.com", "*.twitter.com", "x.com", "*.x.com"]),
        ]
        .into_iter()
        .map(|entry| {
            let patterns = entry
                .patterns
                .iter()
                .filter_map(|raw| HostPattern::parse(raw).ok())
                .collect();
            CompiledEntry { entry, patterns }
        })
        .collect();

        Self {
            entries: compiled,
            default_chunk: DEFAULT_CHUNK.to_string(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().map(|compiled| &compiled.entry)
    }

    pub fn default_chunk(&self) -> &str {
        &self.default_chunk
    }

    /// Exact patterns win over wildcards; within a pass, registry order wins.
    pub fn match_host(&self, host: &str) -> Option<&RegistryEntry> {
        let host = normalize_host(host);
        if host.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|compiled| compiled.patterns.iter().any(|p| p.matches_exact(&host)))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|compiled| compiled.patterns.iter().any(|p| p.matches_wildcard(&host)))
            })
            .map(|compiled| &compiled.entry)
    }

    pub fn resolve(&self, host: &str) -> Bundle<'_> {
        match self.match_host(host) {
            Some(entry) => Bundle::Site(entry),
            None => Bundle::Default {
                chunk: &self.default_chunk,
            },
        }
    }

    /// `None` for anything that is not an http(s) page with a host.
    pub fn resolve_url(&self, url: &str) -> Option<Bundle<'_>> {
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?;
        Some(self.resolve(host))
    }
}
