//! Artifact - the persisted unit of semantic memory
//!
//! Each artifact is a decision or proposal about a target, persisted as a
//! human-readable document (structured header + free-form body) and addressed
//! by an opaque `fid` that stays stable for the artifact's whole life.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod codec;
mod transitions;

pub use codec::{parse_artifact, parse_artifact_lenient, serialize_artifact};
pub use transitions::{is_minor_content_diff, validate_transition};

// ============================================================================
// ENUMS
// ============================================================================

/// Kinds of semantic artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A long-lived statement of current truth about a target
    #[default]
    Decision,
    /// A hypothesis, promotable to a decision
    Proposal,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Decision => "decision",
            ArtifactKind::Proposal => "proposal",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "decision" => Some(ArtifactKind::Decision),
            "proposal" => Some(ArtifactKind::Proposal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who originated a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Agent,
    User,
    System,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Agent => "agent",
            Source::User => "user",
            Source::System => "system",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Source::Agent),
            "user" => Some(Source::User),
            "system" => Some(Source::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// The current truth for its target
    #[default]
    Active,
    /// Replaced by a successor
    Superseded,
    /// Retired without a successor
    Deprecated,
    /// Unpromoted proposal
    Draft,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Active => "active",
            ArtifactStatus::Superseded => "superseded",
            ArtifactStatus::Deprecated => "deprecated",
            ArtifactStatus::Draft => "draft",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(ArtifactStatus::Active),
            "superseded" => Some(ArtifactStatus::Superseded),
            "deprecated" => Some(ArtifactStatus::Deprecated),
            "draft" => Some(ArtifactStatus::Draft),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptive lifecycle phase of a decision. Not invariant-enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Emergent,
    Pattern,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Emergent => "emergent",
            Phase::Pattern => "pattern",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "emergent" => Some(Phase::Emergent),
            "pattern" => Some(Phase::Pattern),
            _ => None,
        }
    }
}

/// Descriptive vitality of a decision. Not invariant-enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vitality {
    Active,
    Dormant,
    Obsolete,
}

impl Vitality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vitality::Active => "active",
            Vitality::Dormant => "dormant",
            Vitality::Obsolete => "obsolete",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Vitality::Active),
            "dormant" => Some(Vitality::Dormant),
            "obsolete" => Some(Vitality::Obsolete),
            _ => None,
        }
    }
}

// ============================================================================
// CONTEXT & ARTIFACT
// ============================================================================

/// Structured context carried in the artifact header.
///
/// Known keys are typed fields; anything else the document carried lands in
/// `extra` and round-trips verbatim, so future keys do not break older
/// parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactContext {
    /// Short human-readable title
    pub title: String,
    /// Canonical subject this artifact applies to
    pub target: String,
    /// Scope within the target space
    pub namespace: String,
    /// Lifecycle status
    pub status: ArtifactStatus,
    /// Why this decision was made
    pub rationale: String,
    /// Keywords feeding the full-text index
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Successor fid, set when this artifact is superseded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// Predecessor fids this artifact replaces
    #[serde(default)]
    pub supersedes: Vec<String>,
    /// Stable identity preserved across supersessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    /// Descriptive phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Descriptive vitality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitality: Option<Vitality>,
    /// Proposal confidence in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Opaque tail: unknown header keys, preserved verbatim
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ArtifactContext {
    pub fn new(title: impl Into<String>, target: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            target: target.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            rationale: rationale.into(),
            ..Default::default()
        }
    }
}

/// Default namespace for targets that do not specify one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A semantic artifact: decision or proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Opaque engine-assigned identifier, stable for life
    pub fid: String,
    pub kind: ArtifactKind,
    pub source: Source,
    /// Free-form body text
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub context: ArtifactContext,
}

impl Artifact {
    /// Relative path of this artifact inside the repository working tree.
    pub fn relative_path(&self) -> String {
        format!("{}.md", self.fid)
    }

    /// Text fed to the embedding provider: title, rationale and body.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.context.title, self.context.rationale, self.content
        )
    }

    /// Whether this artifact still participates in conflict checks.
    pub fn is_active(&self) -> bool {
        self.context.status == ArtifactStatus::Active
    }
}

/// Relative path for a bare fid.
pub fn fid_relative_path(fid: &str) -> String {
    format!("{}.md", fid)
}

/// fid from an artifact's on-disk file name, if it looks like one.
pub fn fid_from_file_name(name: &str) -> Option<&str> {
    name.strip_suffix(".md").filter(|s| !s.is_empty())
}

// ============================================================================
// FID ASSIGNMENT
// ============================================================================

/// Derive a stable filesystem-safe fid from the write timestamp and a hash of
/// title and target. Collisions within the same second on the same
/// title/target pair are the same logical write.
pub fn assign_fid(timestamp: DateTime<Utc>, title: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    let mut short = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        short.push_str(&format!("{:02x}", byte));
    }
    format!("d-{}-{}", timestamp.format("%Y%m%dT%H%M%S%3f"), short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_roundtrips() {
        for kind in [ArtifactKind::Decision, ArtifactKind::Proposal] {
            assert_eq!(ArtifactKind::parse_name(kind.as_str()), Some(kind));
        }
        for status in [
            ArtifactStatus::Active,
            ArtifactStatus::Superseded,
            ArtifactStatus::Deprecated,
            ArtifactStatus::Draft,
        ] {
            assert_eq!(ArtifactStatus::parse_name(status.as_str()), Some(status));
        }
        for source in [Source::Agent, Source::User, Source::System] {
            assert_eq!(Source::parse_name(source.as_str()), Some(source));
        }
        assert_eq!(ArtifactStatus::parse_name("bogus"), None);
    }

    #[test]
    fn test_fid_is_stable_and_filesystem_safe() {
        let ts = Utc::now();
        let a = assign_fid(ts, "Use sqlite", "storage");
        let b = assign_fid(ts, "Use sqlite", "storage");
        assert_eq!(a, b);
        assert!(a.starts_with("d-"));
        assert!(!a.contains('/'));
        assert!(!a.contains(char::is_whitespace));

        let c = assign_fid(ts, "Use sqlite", "cache");
        assert_ne!(a, c);
    }

    #[test]
    fn test_fid_file_name_roundtrip() {
        let ts = Utc::now();
        let fid = assign_fid(ts, "t", "x");
        let path = fid_relative_path(&fid);
        assert_eq!(fid_from_file_name(&path), Some(fid.as_str()));
        assert_eq!(fid_from_file_name("README"), None);
    }

    #[test]
    fn test_embedding_text_composition() {
        let mut artifact = Artifact {
            fid: "d-x".into(),
            kind: ArtifactKind::Decision,
            source: Source::User,
            content: "body".into(),
            timestamp: Utc::now(),
            context: ArtifactContext::new("Title", "target", "because"),
        };
        artifact.context.status = ArtifactStatus::Active;
        let text = artifact.embedding_text();
        assert!(text.contains("Title"));
        assert!(text.contains("because"));
        assert!(text.contains("body"));
    }
}
