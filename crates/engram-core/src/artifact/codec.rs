//! Artifact document codec
//!
//! An artifact is persisted as a human-readable text document: a `---`
//! delimited header of `key: value` lines followed by the free-form body.
//! Structured values are JSON-encoded so header lines stay single-line;
//! unknown keys are preserved verbatim in the context's opaque tail.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{MemoryError, Result};

use super::{
    Artifact, ArtifactContext, ArtifactKind, ArtifactStatus, Phase, Source, Vitality,
    DEFAULT_NAMESPACE,
};

const DELIMITER: &str = "---";

// ============================================================================
// SERIALIZATION
// ============================================================================

/// Render an artifact to its on-disk document form.
pub fn serialize_artifact(artifact: &Artifact) -> String {
    let ctx = &artifact.context;
    let mut out = String::with_capacity(artifact.content.len() + 512);

    out.push_str(DELIMITER);
    out.push('\n');

    push_raw(&mut out, "kind", artifact.kind.as_str());
    push_raw(&mut out, "source", artifact.source.as_str());
    push_raw(&mut out, "timestamp", &artifact.timestamp.to_rfc3339());
    push_json(&mut out, "title", &Value::String(ctx.title.clone()));
    push_json(&mut out, "target", &Value::String(ctx.target.clone()));
    push_raw(&mut out, "namespace", &ctx.namespace);
    push_raw(&mut out, "status", ctx.status.as_str());
    push_json(&mut out, "rationale", &Value::String(ctx.rationale.clone()));

    if !ctx.keywords.is_empty() {
        push_json(&mut out, "keywords", &serde_json::json!(ctx.keywords));
    }
    if let Some(successor) = &ctx.superseded_by {
        push_raw(&mut out, "superseded_by", successor);
    }
    if !ctx.supersedes.is_empty() {
        push_json(&mut out, "supersedes", &serde_json::json!(ctx.supersedes));
    }
    if let Some(decision_id) = &ctx.decision_id {
        push_raw(&mut out, "decision_id", decision_id);
    }
    if let Some(phase) = ctx.phase {
        push_raw(&mut out, "phase", phase.as_str());
    }
    if let Some(vitality) = ctx.vitality {
        push_raw(&mut out, "vitality", vitality.as_str());
    }
    if let Some(confidence) = ctx.confidence {
        push_raw(&mut out, "confidence", &confidence.to_string());
    }
    for (key, value) in &ctx.extra {
        push_json(&mut out, key, value);
    }

    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&artifact.content);
    out
}

fn push_raw(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn push_json(out: &mut String, key: &str, value: &Value) {
    out.push_str(key);
    out.push_str(": ");
    // Value serialization to a one-line JSON string cannot fail
    out.push_str(&value.to_string());
    out.push('\n');
}

// ============================================================================
// PARSING
// ============================================================================

/// A parsed document plus the header keys that had to be defaulted.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub artifact: Artifact,
    /// Required or expected keys that were missing and filled with defaults
    pub defaulted: Vec<&'static str>,
}

/// Strict parse: every required header key must be present.
pub fn parse_artifact(fid: &str, text: &str) -> Result<Artifact> {
    let parsed = parse_artifact_lenient(fid, text)?;
    if parsed.defaulted.is_empty() {
        Ok(parsed.artifact)
    } else {
        Err(MemoryError::Parse(format!(
            "{}: missing required header keys: {}",
            fid,
            parsed.defaulted.join(", ")
        )))
    }
}

/// Lenient parse used by recovery and legacy migration: missing `kind`,
/// `source`, `namespace`, `status`, `timestamp` or `rationale` are defaulted
/// and reported. `title` and `target` are mandatory in any document.
pub fn parse_artifact_lenient(fid: &str, text: &str) -> Result<ParsedDocument> {
    let mut lines = text.lines();
    if lines.next() != Some(DELIMITER) {
        return Err(MemoryError::Parse(format!(
            "{}: document does not start with a header leader",
            fid
        )));
    }

    let mut header: Vec<(String, String)> = Vec::new();
    let mut header_bytes = DELIMITER.len() + 1;
    let mut closed = false;
    for line in lines {
        header_bytes += line.len() + 1;
        if line == DELIMITER {
            closed = true;
            break;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                header.push((key.trim().to_string(), value.trim().to_string()));
            }
            None if line.trim().is_empty() => {}
            None => {
                return Err(MemoryError::Parse(format!(
                    "{}: malformed header line: {:?}",
                    fid, line
                )));
            }
        }
    }
    if !closed {
        return Err(MemoryError::Parse(format!(
            "{}: header trailer not found",
            fid
        )));
    }

    let content = if header_bytes >= text.len() {
        String::new()
    } else {
        text[header_bytes..].to_string()
    };

    let mut defaulted = Vec::new();
    let mut kind = None;
    let mut source = None;
    let mut timestamp = None;
    let mut ctx = ArtifactContext::default();
    let mut saw = SeenKeys::default();

    for (key, raw) in header {
        match key.as_str() {
            "kind" => kind = ArtifactKind::parse_name(&raw),
            "source" => source = Source::parse_name(&raw),
            "timestamp" => {
                timestamp = DateTime::parse_from_rfc3339(&raw)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "title" => {
                ctx.title = string_value(&raw);
                saw.title = true;
            }
            "target" => {
                ctx.target = string_value(&raw);
                saw.target = true;
            }
            "namespace" => {
                ctx.namespace = string_value(&raw);
                saw.namespace = !ctx.namespace.is_empty();
            }
            "status" => {
                if let Some(status) = ArtifactStatus::parse_name(&raw) {
                    ctx.status = status;
                    saw.status = true;
                }
            }
            "rationale" => {
                ctx.rationale = string_value(&raw);
                saw.rationale = true;
            }
            "keywords" => ctx.keywords = string_list(&raw),
            "superseded_by" => ctx.superseded_by = Some(string_value(&raw)),
            "supersedes" => ctx.supersedes = string_list(&raw),
            "decision_id" => ctx.decision_id = Some(string_value(&raw)),
            "phase" => ctx.phase = Phase::parse_name(&raw),
            "vitality" => ctx.vitality = Vitality::parse_name(&raw),
            "confidence" => ctx.confidence = raw.parse::<f64>().ok(),
            _ => {
                // Unknown key: keep verbatim in the opaque tail
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                ctx.extra.insert(key, value);
            }
        }
    }

    if !saw.title || !saw.target {
        return Err(MemoryError::Parse(format!(
            "{}: header lacks title or target",
            fid
        )));
    }

    let kind = kind.unwrap_or_else(|| {
        defaulted.push("kind");
        ArtifactKind::Decision
    });
    let source = source.unwrap_or_else(|| {
        defaulted.push("source");
        Source::Agent
    });
    let timestamp = timestamp.unwrap_or_else(|| {
        defaulted.push("timestamp");
        Utc::now()
    });
    if !saw.namespace {
        defaulted.push("namespace");
        ctx.namespace = DEFAULT_NAMESPACE.to_string();
    }
    if !saw.status {
        defaulted.push("status");
    }
    if !saw.rationale {
        defaulted.push("rationale");
    }

    Ok(ParsedDocument {
        artifact: Artifact {
            fid: fid.to_string(),
            kind,
            source,
            content,
            timestamp,
            context: ctx,
        },
        defaulted,
    })
}

#[derive(Default)]
struct SeenKeys {
    title: bool,
    target: bool,
    namespace: bool,
    status: bool,
    rationale: bool,
}

/// Accept either a JSON string or a raw value.
fn string_value(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => s,
        _ => raw.to_string(),
    }
}

fn string_list(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_artifact() -> Artifact {
        let mut ctx = ArtifactContext::new("Use WAL mode", "storage/sqlite", "Fewer writer stalls under load");
        ctx.keywords = vec!["sqlite".into(), "wal".into()];
        ctx.decision_id = Some("0b5a0c1e-3d5f-4b2a-9a7e-1f2d3c4b5a69".into());
        ctx.supersedes = vec!["d-20250101T000000000-aabbccdd".into()];
        ctx.phase = Some(Phase::Pattern);
        ctx.confidence = Some(0.75);
        ctx.extra
            .insert("reviewer".into(), Value::String("ops-team".into()));
        Artifact {
            fid: "d-20260101T120000000-11223344".into(),
            kind: ArtifactKind::Decision,
            source: Source::User,
            content: "Journal mode WAL.\n\n---\nbody may contain delimiters too.".into(),
            timestamp: Utc::now(),
            context: ctx,
        }
    }

    #[test]
    fn test_roundtrip() {
        let artifact = sample_artifact();
        let text = serialize_artifact(&artifact);
        let parsed = parse_artifact(&artifact.fid, &text).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_extra_keys_preserved_verbatim() {
        let artifact = sample_artifact();
        let text = serialize_artifact(&artifact);
        let parsed = parse_artifact(&artifact.fid, &text).unwrap();
        assert_eq!(
            parsed.context.extra.get("reviewer"),
            Some(&Value::String("ops-team".into()))
        );
    }

    #[test]
    fn test_multiline_rationale_stays_in_header() {
        let mut artifact = sample_artifact();
        artifact.context.rationale = "line one\nline two: with colon".into();
        let text = serialize_artifact(&artifact);
        let parsed = parse_artifact(&artifact.fid, &text).unwrap();
        assert_eq!(parsed.context.rationale, artifact.context.rationale);
    }

    #[test]
    fn test_missing_required_key_is_strict_error() {
        let text = "---\ntitle: \"t\"\ntarget: \"x\"\n---\nbody";
        assert!(parse_artifact("f", text).is_err());

        let lenient = parse_artifact_lenient("f", text).unwrap();
        assert!(lenient.defaulted.contains(&"kind"));
        assert!(lenient.defaulted.contains(&"rationale"));
        assert_eq!(lenient.artifact.context.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_title_and_target_are_mandatory() {
        let text = "---\nkind: decision\n---\n";
        assert!(parse_artifact_lenient("f", text).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_artifact("f", "not a document").is_err());
        assert!(parse_artifact("f", "---\nunterminated: header\n").is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            title in "[a-zA-Z0-9 :/_-]{1,40}",
            target in "[a-zA-Z0-9/_-]{1,30}",
            rationale in "\\PC{0,120}",
            content in "\\PC{0,300}",
        ) {
            let mut ctx = ArtifactContext::new(title, target, rationale);
            ctx.status = ArtifactStatus::Active;
            let artifact = Artifact {
                fid: "d-prop".into(),
                kind: ArtifactKind::Decision,
                source: Source::Agent,
                content,
                timestamp: Utc::now(),
                context: ctx,
            };
            let text = serialize_artifact(&artifact);
            let parsed = parse_artifact("d-prop", &text).unwrap();
            prop_assert_eq!(parsed, artifact);
        }
    }
}
