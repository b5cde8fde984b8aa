//! Refinement loop budgets, feedback threading and approval

use std::sync::Arc;
use weft::context::ValueKind;
use weft::thread::ThreadStep;
use weft::{
    Context, ContextThread, ContextValue, GenerationConfig, LoopState, RefinementLoop, Runtime,
    ScriptedBackend, Status, Unit, Workflow,
};

use super::test_utils::tag_evaluator;

fn writer() -> Unit {
    Unit::new(
        "writer",
        ContextThread::new("writer_thread", vec![ThreadStep::literal("topic", "tides")]),
        GenerationConfig::new("write", "Write about {topic}. Notes: {feedback}")
            .declare("topic", ValueKind::Text)
            .declare("feedback", ValueKind::Text)
            .with_default("feedback", "none")
            .with_output_key("draft"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_feedback_reaches_the_next_target_call() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_text("write", "v1")
            .respond_text("write", "v2")
            .respond_text("critic", "<approved>no</approved><feedback>mention the moon</feedback>")
            .respond_text("critic", "<approved>yes</approved>"),
    );
    let runtime = Runtime::new(backend.clone());
    let refinement = RefinementLoop::new("review", writer(), tag_evaluator("critic", "draft"), 4).unwrap();

    let result = refinement.execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.loop_state, Some(LoopState::Approved));
    assert_eq!(result.iterations, 2);
    assert_eq!(result.feedback_history, vec!["mention the moon"]);
    assert_eq!(result.output, Some(ContextValue::from("v2")));

    let goals: Vec<String> = backend
        .calls()
        .into_iter()
        .filter(|request| request.config_name == "write")
        .map(|request| request.goal)
        .collect();
    assert_eq!(
        goals,
        vec![
            "Write about tides. Notes: none".to_string(),
            "Write about tides. Notes: mention the moon".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_budget_exhaustion_keeps_every_feedback() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_fallback(|request| {
                let text = if request.config_name == "critic" {
                    "<approved>false</approved><feedback>again</feedback>".to_string()
                } else {
                    "draft".to_string()
                };
                Ok(weft::provider::GenerationOutput::text(text))
            }),
    );
    let runtime = Runtime::new(backend.clone());
    let refinement = RefinementLoop::new("review", writer(), tag_evaluator("critic", "draft"), 3).unwrap();

    let result = refinement.execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::MaxIterations);
    assert_eq!(result.loop_state, Some(LoopState::Exhausted));
    assert_eq!(result.iterations, 3);
    assert_eq!(result.feedback_history.len(), 3);
    assert_eq!(backend.call_count("write"), 3);
    assert_eq!(backend.call_count("critic"), 3);
    assert_eq!(result.output, Some(ContextValue::from("draft")));
}

#[tokio::test]
async fn test_iteration_marker_is_visible_to_target() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_fallback(|request| {
                let text = if request.config_name == "critic" {
                    "<approved>no</approved><feedback>more</feedback>"
                } else {
                    "draft"
                };
                Ok(weft::provider::GenerationOutput::text(text))
            }),
    );
    let runtime = Runtime::new(backend.clone());
    let counting_writer = Unit::new(
        "writer",
        ContextThread::empty("writer_thread"),
        GenerationConfig::new("write", "Attempt {round}")
            .declare("round", ValueKind::Record)
            .with_output_key("draft"),
    )
    .unwrap();
    let refinement = RefinementLoop::new("review", counting_writer, tag_evaluator("critic", "draft"), 2)
        .unwrap()
        .with_iteration_key("round");

    let result = refinement.execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::MaxIterations);
    let goals: Vec<String> = backend
        .calls()
        .into_iter()
        .filter(|request| request.config_name == "write")
        .map(|request| request.goal)
        .collect();
    assert_eq!(goals, vec!["Attempt 1", "Attempt 2"]);
}

#[test]
fn test_zero_budget_is_rejected() {
    let err = RefinementLoop::new("review", writer(), tag_evaluator("critic", "draft"), 0).unwrap_err();
    assert_eq!(err.to_string(), "Refinement loop 'review' needs a positive iteration budget");
}
