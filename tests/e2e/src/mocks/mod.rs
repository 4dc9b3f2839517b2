//! Event and input fixtures

use engram_core::{event_kind, NewEvent, Source};

/// A task event from an agent.
pub fn task_event(content: &str) -> NewEvent {
    NewEvent {
        source: Source::Agent,
        kind: event_kind::TASK.into(),
        content: content.into(),
        ..Default::default()
    }
}

/// A result event carrying an explicit success flag.
pub fn result_event(content: &str, success: bool, target: Option<&str>) -> NewEvent {
    let mut context = serde_json::Map::new();
    context.insert("success".into(), serde_json::json!(success));
    if let Some(target) = target {
        context.insert("target".into(), serde_json::json!(target));
    }
    NewEvent {
        source: Source::Agent,
        kind: event_kind::RESULT.into(),
        content: content.into(),
        context,
        ..Default::default()
    }
}
