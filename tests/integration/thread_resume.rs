//! Thread injection and pause/resume across a serialized suspension

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use weft::error::{EngineError, ResourceError, ResumeError};
use weft::resource::{FunctionRegistry, LocalResolver};
use weft::thread::{Dovetail, ThreadStep, WeaveSpec};
use weft::{Context, ContextThread, ContextValue, EchoBackend, Runtime, Status, Suspension, Workflow};

use super::test_utils::unit;

fn echo_runtime() -> Runtime {
    Runtime::new(Arc::new(EchoBackend::new()))
}

#[test]
fn test_injection_sources_land_in_context() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("brief.md"), "Ship the bridge").unwrap();

    let functions = Arc::new(FunctionRegistry::new());
    functions.register("shout", |args| {
        let text = args
            .get("text")
            .and_then(ContextValue::as_text)
            .ok_or_else(|| anyhow::anyhow!("text argument required"))?;
        Ok(ContextValue::from(text.to_uppercase()))
    });
    let resolver = LocalResolver::new()
        .with_root(workspace.path())
        .with_env("WEFT_TEST_REGION", "eu-west")
        .with_functions(functions);
    let runtime = echo_runtime().with_resources(Arc::new(resolver));

    let thread = ContextThread::new(
        "prep",
        vec![
            ThreadStep::file("brief.md", "brief"),
            ThreadStep::function("shout", [("text", json!("$brief"))], "loud"),
            ThreadStep::env("WEFT_TEST_REGION", "region"),
            ThreadStep::env_or("WEFT_TEST_UNSET_VARIABLE", "tier", "standard"),
            ThreadStep::weave(WeaveSpec::new().copy("region", "zone").drop("region")),
        ],
    );

    let result = thread.run(Context::new(), &runtime);
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.context.text("brief"), Some("Ship the bridge"));
    assert_eq!(result.context.text("loud"), Some("SHIP THE BRIDGE"));
    assert_eq!(result.context.text("zone"), Some("eu-west"));
    assert_eq!(result.context.text("tier"), Some("standard"));
    assert!(!result.context.contains("region"));
}

#[test]
fn test_missing_file_fails_with_resource_error() {
    let workspace = TempDir::new().unwrap();
    let runtime = echo_runtime().with_resources(Arc::new(LocalResolver::new().with_root(workspace.path())));
    let thread = ContextThread::new(
        "prep",
        vec![
            ThreadStep::literal("kept", "yes"),
            ThreadStep::file("absent.txt", "doc"),
            ThreadStep::literal("never", "set"),
        ],
    );

    let result = thread.run(Context::new(), &runtime);
    assert_eq!(result.status, Status::Error);
    assert!(matches!(
        result.error,
        Some(EngineError::ResourceResolution(ResourceError::File { .. }))
    ));
    assert_eq!(result.context.text("kept"), Some("yes"));
    assert!(!result.context.contains("never"));
}

#[test]
fn test_dovetail_maps_nested_outputs() {
    let runtime = echo_runtime();
    let thread = ContextThread::new(
        "prep",
        vec![
            ThreadStep::literal("analysis", json!({ "summary": "calm seas", "risks": ["fog"] })),
            ThreadStep::dovetail(
                Dovetail::new("unpack")
                    .expect("analysis.summary")
                    .map("summary", "analysis.summary")
                    .map("first_risk", "analysis.risks.0"),
            ),
        ],
    );

    let result = thread.run(Context::new(), &runtime);
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.context.text("summary"), Some("calm seas"));
    assert_eq!(result.context.text("first_risk"), Some("fog"));
}

#[tokio::test]
async fn test_resume_after_serialization_matches_preinjected_run() {
    let runtime = echo_runtime();
    let paused_unit = unit(
        "drafter",
        vec![ThreadStep::human("What should we build?", "spec")],
        "{spec}",
        &["spec"],
        "draft",
    );

    let paused = paused_unit.execute(Context::new(), &runtime).await;
    assert_eq!(paused.status, Status::AwaitingInput);
    assert_eq!(paused.pending_prompt(), Some("What should we build?"));

    let stored = serde_json::to_string(paused.suspension.as_ref().unwrap()).unwrap();
    let restored: Suspension = serde_json::from_str(&stored).unwrap();
    let resumed = paused_unit.resume(restored, "a lighthouse".into(), &runtime).await;

    let preinjected = unit(
        "drafter",
        vec![ThreadStep::literal("spec", "a lighthouse")],
        "{spec}",
        &["spec"],
        "draft",
    );
    let direct = preinjected.execute(Context::new(), &runtime).await;

    assert_eq!(resumed.status, Status::Success);
    assert_eq!(resumed.context.entries(), direct.context.entries());
    assert_eq!(resumed.output, direct.output);
}

#[test]
fn test_choice_answers_are_enforced() {
    let runtime = echo_runtime();
    let thread = ContextThread::new(
        "prep",
        vec![ThreadStep::human_choice("Tone?", "tone", ["formal", "casual"])],
    );
    let paused = thread.run(Context::new(), &runtime);
    let suspension = paused.suspension.unwrap();
    assert_eq!(
        suspension.choices(),
        Some(&["formal".to_string(), "casual".to_string()][..])
    );

    let rejected = thread.resume(suspension.pause(), "sarcastic", &runtime);
    assert_eq!(rejected.status, Status::Error);
    assert!(matches!(
        rejected.error,
        Some(EngineError::ResumeMismatch(ResumeError::AnswerNotAllowed { .. }))
    ));

    let accepted = thread.resume(suspension.pause(), "casual", &runtime);
    assert_eq!(accepted.status, Status::Success);
    assert_eq!(accepted.context.text("tone"), Some("casual"));
}

#[test]
fn test_tampered_suspension_is_rejected() {
    let runtime = echo_runtime();
    let thread = ContextThread::new(
        "prep",
        vec![ThreadStep::literal("a", "1"), ThreadStep::human("?", "b")],
    );
    let paused = thread.run(Context::new(), &runtime);
    let mut pause = paused.suspension.unwrap().pause().clone();
    pause.context = pause.context.with("a", "2");
    pause.context_version += 1;

    let result = thread.resume(&pause, "x", &runtime);
    assert_eq!(result.status, Status::Error);
    assert!(matches!(
        result.error,
        Some(EngineError::ResumeMismatch(ResumeError::ContextDigest))
    ));
}
