//! Lifecycle events delivered to an explicit observer.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub ts: String,
    /// Name of the definition that emitted the event
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl ExecutionEvent {
    pub fn with_now(scope: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            scope: scope.into(),
            event_type: event_type.into(),
            data,
        }
    }
}

/// Receives execution events. Failures are logged and otherwise ignored.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent) -> Result<(), String>;
}

/// Observer that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn on_event(&self, event: &ExecutionEvent) -> Result<(), String> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
