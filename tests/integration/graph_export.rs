//! Graph export of nested compositions

use std::sync::Arc;
use weft::thread::ThreadStep;
use weft::workflow::{EdgeCondition, GraphNodeKind, END, START};
use weft::{Flow, GraphExport, MetaFlow, RefinementLoop};

use super::test_utils::{tag_evaluator, unit};

#[test]
fn test_meta_flow_graph_nests_every_level() {
    let refinement = RefinementLoop::new(
        "polish",
        unit("draft", vec![ThreadStep::human("Tone?", "tone")], "Draft in {tone}", &["tone"], "draft"),
        tag_evaluator("critic", "draft"),
        3,
    )
    .unwrap();
    let prep = Flow::new("prep", vec![unit("gather", vec![], "Gather", &[], "facts")]).unwrap();
    let graph = MetaFlow::builder("release")
        .node("prep", Arc::new(prep))
        .node("polish", Arc::new(refinement))
        .edge("prep", "polish")
        .build()
        .unwrap()
        .to_graph();

    assert_eq!(graph.successors(START, EdgeCondition::Always), vec!["prep"]);
    assert_eq!(graph.successors("prep", EdgeCondition::Success), vec!["polish"]);
    assert_eq!(graph.successors("polish", EdgeCondition::Success), vec![END]);

    let polish = graph.node("polish").unwrap();
    assert_eq!(polish.kind, GraphNodeKind::RefinementLoop);
    let loop_graph = polish.subgraph.as_ref().unwrap();
    assert_eq!(loop_graph.successors("evaluator", EdgeCondition::Rejected), vec!["target"]);
    assert_eq!(loop_graph.successors("evaluator", EdgeCondition::Approved), vec![END]);

    let target = loop_graph.node("target").unwrap().subgraph.as_ref().unwrap();
    let thread = target.node("thread").unwrap().subgraph.as_ref().unwrap();
    assert!(thread.nodes.iter().any(|node| node.kind == GraphNodeKind::HumanInput));
}

#[test]
fn test_graph_json_is_self_describing() {
    let flow = Flow::new("single", vec![unit("only", vec![], "Go", &[], "out")]).unwrap();
    let json = flow.to_graph().to_json();

    assert_eq!(json["name"], "single");
    let nodes = json["nodes"].as_array().unwrap();
    assert!(nodes.iter().any(|node| node["id"] == "unit_0"));
    let edges = json["edges"].as_array().unwrap();
    assert!(edges
        .iter()
        .any(|edge| edge["from"] == START && edge["to"] == "unit_0"));
}
