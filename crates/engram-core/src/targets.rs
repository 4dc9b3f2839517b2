//! Target Registry
//!
//! Canonicalises target names so near-identical spellings do not fragment the
//! namespace. Aliases and known targets persist to `targets.json` under the
//! storage root; unknown names pass through untouched so new targets are
//! never blocked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata kept per canonical target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    targets: BTreeMap<String, TargetRecord>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

/// Registry of canonical target names and their aliases
#[derive(Debug)]
pub struct TargetRegistry {
    file_path: PathBuf,
    targets: BTreeMap<String, TargetRecord>,
    aliases: BTreeMap<String, String>,
}

impl TargetRegistry {
    /// Load the registry from `<storage>/targets.json`, starting empty if the
    /// file is absent or unreadable.
    pub fn load(storage_path: &Path) -> Self {
        let file_path = storage_path.join("targets.json");
        let mut registry = Self {
            file_path,
            targets: BTreeMap::new(),
            aliases: BTreeMap::new(),
        };
        match std::fs::read_to_string(&registry.file_path) {
            Ok(raw) => match serde_json::from_str::<RegistryFile>(&raw) {
                Ok(file) => {
                    registry.targets = file.targets;
                    registry.aliases = file.aliases;
                }
                Err(e) => tracing::warn!("Target registry unreadable, starting empty: {}", e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to read target registry: {}", e),
        }
        registry
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = RegistryFile {
            targets: self.targets.clone(),
            aliases: self.aliases.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .unwrap_or_else(|_| "{\"targets\":{},\"aliases\":{}}".to_string());
        std::fs::write(&self.file_path, json)?;
        Ok(())
    }

    /// Canonical name for an input: exact match, then alias, then
    /// case-insensitive match against both, then the input itself.
    pub fn normalize(&self, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            return "unknown".to_string();
        }
        if self.targets.contains_key(name) {
            return name.to_string();
        }
        if let Some(canonical) = self.aliases.get(name) {
            return canonical.clone();
        }

        let lower = name.to_lowercase();
        for known in self.targets.keys() {
            if known.to_lowercase() == lower {
                return known.clone();
            }
        }
        for (alias, canonical) in &self.aliases {
            if alias.to_lowercase() == lower {
                return canonical.clone();
            }
        }

        name.to_string()
    }

    /// Register a canonical target with optional aliases.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        aliases: &[String],
    ) -> Result<()> {
        self.targets.entry(name.to_string()).or_insert(TargetRecord {
            description: description.to_string(),
            created_at: Some(Utc::now()),
        });
        for alias in aliases {
            self.aliases.insert(alias.clone(), name.to_string());
        }
        self.save()
    }

    /// Known targets similar to the query, best first. Similarity is bigram
    /// overlap (Dice coefficient), cutoff 0.6.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = self
            .targets
            .keys()
            .map(|name| (bigram_similarity(query, name), name))
            .filter(|(score, _)| *score >= 0.6)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// All canonical target names.
    pub fn known_targets(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.to_lowercase().chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn bigram_similarity(a: &str, b: &str) -> f64 {
    if a.eq_ignore_ascii_case(b) {
        return 1.0;
    }
    let a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }
    let mut remaining = b_grams.clone();
    let mut matches = 0usize;
    for gram in &a_grams {
        if let Some(pos) = remaining.iter().position(|g| g == gram) {
            remaining.swap_remove(pos);
            matches += 1;
        }
    }
    (2.0 * matches as f64) / (a_grams.len() + b_grams.len()) as f64
}
