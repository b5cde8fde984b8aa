//! Flow sequencing, halting, observation and cancellation

use std::sync::Arc;
use std::time::Duration;
use weft::error::{EngineError, GenerationError};
use weft::provider::GenerationOutput;
use weft::runtime::CancelHandle;
use weft::thread::ThreadStep;
use weft::{Context, Flow, Runtime, ScriptedBackend, Status, Workflow};

use super::test_utils::{recording_runtime, unit, SlowBackend};

fn story_flow() -> Flow {
    Flow::new(
        "story",
        vec![
            unit("outline", vec![ThreadStep::literal("topic", "tides")], "Outline {topic}", &["topic"], "outline"),
            unit("draft", vec![], "Draft from {outline}", &["outline"], "draft"),
            unit("polish", vec![], "Polish {draft}", &["draft"], "final"),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_flow_events_are_ordered() {
    let backend = ScriptedBackend::new()
        .respond_text("outline", "1. moon")
        .respond_text("draft", "The moon pulls.")
        .respond_text("polish", "The moon pulls the sea.");
    let (runtime, observer) = recording_runtime(Arc::new(backend));

    let result = story_flow().execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.context.text("final"), Some("The moon pulls the sea."));

    let types = observer.event_types();
    assert_eq!(types.first().map(String::as_str), Some("flow_started"));
    assert_eq!(types.last().map(String::as_str), Some("flow_finished"));
    let unit_scopes: Vec<String> = observer
        .events()
        .into_iter()
        .filter(|event| event.event_type == "unit_finished")
        .map(|event| event.scope)
        .collect();
    assert_eq!(unit_scopes, vec!["outline", "draft", "polish"]);
}

#[tokio::test]
async fn test_failure_stops_the_flow_with_generation_cause() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_text("outline", "1. moon")
            .fail("draft", GenerationError::CapacityRejected("busy".into())),
    );
    let runtime = Runtime::new(backend.clone());

    let result = story_flow().execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Error);
    assert_eq!(backend.call_count("polish"), 0);
    match result.error {
        Some(EngineError::Generation { config, cause }) => {
            assert_eq!(config, "draft");
            assert_eq!(cause, GenerationError::CapacityRejected("busy".into()));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(result.context.text("outline"), Some("1. moon"));
}

#[tokio::test]
async fn test_structured_output_fields_are_merged() {
    let backend = ScriptedBackend::new()
        .respond(
            "outline",
            GenerationOutput {
                text: "outline ready".to_string(),
                structured: Some(serde_json::json!({ "sections": 3, "title": "Tides" })),
            },
        )
        .with_fallback(|request| Ok(GenerationOutput::text(request.goal.clone())));
    let runtime = Runtime::new(Arc::new(backend));

    let result = story_flow().execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.context.text("title"), Some("Tides"));
    assert_eq!(result.context.text("draft"), Some("Draft from outline ready"));
}

#[tokio::test]
async fn test_cancelled_flow_discards_context() {
    let cancel = CancelHandle::new();
    let backend = Arc::new(ScriptedBackend::new());
    let runtime = Runtime::new(backend.clone()).with_cancel(cancel.clone());
    cancel.cancel();

    let result = story_flow().execute(Context::from_entries([("seed", "x")]), &runtime).await;
    assert_eq!(result.status, Status::Cancelled);
    assert_eq!(result.error, Some(EngineError::Cancelled));
    assert!(result.context.is_empty());
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn test_generation_timeout_is_reported() {
    let runtime = Runtime::new(Arc::new(SlowBackend {
        delay: Duration::from_millis(200),
    }))
    .with_generation_timeout(Some(Duration::from_millis(10)));

    let result = story_flow().execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Error);
    assert!(matches!(
        result.error,
        Some(EngineError::Generation {
            cause: GenerationError::Timeout(_),
            ..
        })
    ));
}
