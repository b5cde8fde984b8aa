//! Dependency-graph execution across nested composition levels

use std::sync::Arc;
use weft::error::GenerationError;
use weft::result::NodeOutcome;
use weft::thread::ThreadStep;
use weft::{
    Context, ContextValue, Flow, MetaFlow, RefinementLoop, Runtime, ScriptedBackend, Status,
    Suspension, Workflow,
};

use super::test_utils::{recording_runtime, tag_evaluator, unit};

fn diamond(review_best_effort: bool) -> MetaFlow {
    let research = unit("research", vec![ThreadStep::literal("topic", "tides")], "Research {topic}", &["topic"], "notes");
    let outline = unit("outline", vec![], "Outline {notes}", &["notes"], "outline");
    let review = RefinementLoop::new(
        "examples",
        unit("examples", vec![], "Examples for {notes}", &["notes"], "examples"),
        tag_evaluator("examples_critic", "examples"),
        2,
    )
    .unwrap();
    let compose = unit("compose", vec![], "Compose {outline}", &["outline"], "article");

    let builder = MetaFlow::builder("article")
        .node("research", Arc::new(research))
        .node("outline", Arc::new(outline))
        .node("compose", Arc::new(compose));
    let builder = if review_best_effort {
        builder.best_effort_node("examples", Arc::new(review))
    } else {
        builder.node("examples", Arc::new(review))
    };
    builder
        .edge("research", "outline")
        .edge("research", "examples")
        .edge("outline", "compose")
        .edge("examples", "compose")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_branches_merge_before_join_node() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_text("research", "moon and sea")
            .respond_text("outline", "1. moon 2. sea")
            .respond_text("examples", "Bay of Fundy")
            .respond_text("examples_critic", "<approved>true</approved>")
            .respond_text("compose", "Tides article"),
    );
    let (runtime, observer) = recording_runtime(backend.clone());
    let flow = diamond(false);

    let result = flow.execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.context.text("outline"), Some("1. moon 2. sea"));
    assert_eq!(result.context.text("examples"), Some("Bay of Fundy"));
    assert_eq!(result.context.text("article"), Some("Tides article"));
    assert_eq!(result.output, Some(ContextValue::from("Tides article")));
    assert_eq!(result.nodes.len(), 4);
    assert!(result.nodes.iter().all(|node| node.outcome == NodeOutcome::Completed));
    assert_eq!(
        observer
            .event_types()
            .iter()
            .filter(|kind| kind.as_str() == "node_finished")
            .count(),
        4
    );
}

#[tokio::test]
async fn test_best_effort_failure_skips_dependents_only() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_text("research", "moon and sea")
            .respond_text("outline", "1. moon 2. sea")
            .fail("examples", GenerationError::Backend("offline".into())),
    );
    let runtime = Runtime::new(backend.clone());

    let result = diamond(true).execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(backend.call_count("compose"), 0);
    assert_eq!(result.context.text("outline"), Some("1. moon 2. sea"));

    let outcome = |name: &str| {
        result
            .nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| node.outcome)
    };
    assert_eq!(outcome("examples"), Some(NodeOutcome::FailedBestEffort));
    assert_eq!(outcome("compose"), Some(NodeOutcome::Skipped));
}

#[tokio::test]
async fn test_halting_failure_stops_the_graph() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_text("research", "moon and sea")
            .fail("outline", GenerationError::Malformed("garbled".into()))
            .respond_text("examples", "Bay of Fundy")
            .respond_text("examples_critic", "<approved>true</approved>"),
    );
    let runtime = Runtime::new(backend.clone());

    let result = diamond(false).execute(Context::new(), &runtime).await;
    assert_eq!(result.status, Status::Error);
    assert_eq!(backend.call_count("compose"), 0);
}

#[tokio::test]
async fn test_pause_deep_inside_graph_resumes_in_place() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .respond_text("plan", "plan ready")
            .respond_text("write", "written")
            .respond_text("ship", "shipped"),
    );
    let runtime = Runtime::new(backend.clone());
    let inner = Flow::new(
        "writing",
        vec![
            unit("plan", vec![], "Plan", &[], "plan"),
            unit("write", vec![ThreadStep::human("Audience?", "audience")], "Write for {audience}", &["audience"], "text"),
        ],
    )
    .unwrap();
    let graph = MetaFlow::builder("release")
        .node("writing", Arc::new(inner))
        .node("ship", Arc::new(unit("ship", vec![], "Ship {text}", &["text"], "shipped")))
        .edge("writing", "ship")
        .build()
        .unwrap();

    let paused = graph.execute(Context::new(), &runtime).await;
    assert_eq!(paused.status, Status::AwaitingInput);
    let suspension = paused.suspension.unwrap();
    assert_eq!(suspension.level(), "meta_flow");
    assert_eq!(suspension.input_key(), "audience");
    match &suspension {
        Suspension::MetaFlow { inner, .. } => assert_eq!(inner.level(), "flow"),
        other => panic!("unexpected suspension: {:?}", other),
    }

    let resumed = graph.resume(suspension, "sailors".into(), &runtime).await;
    assert_eq!(resumed.status, Status::Success);
    assert_eq!(resumed.context.text("audience"), Some("sailors"));
    assert_eq!(resumed.context.text("shipped"), Some("shipped"));
    assert_eq!(backend.call_count("plan"), 1);
}
