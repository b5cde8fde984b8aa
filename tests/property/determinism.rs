//! Property-based tests for determinism and bounded execution

use proptest::prelude::*;
use std::sync::Arc;
use weft::context::ValueKind;
use weft::error::GenerationError;
use weft::provider::GenerationOutput;
use weft::thread::ThreadStep;
use weft::{
    Context, ContextThread, EchoBackend, Flow, GenerationConfig, RefinementLoop, Runtime,
    ScriptedBackend, Status, Unit, Workflow,
};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn literal_steps() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec((key_strategy(), "[ -~]{0,24}"), 0..12)
}

/// Same steps on the same input always produce the same context
#[test]
fn test_thread_run_is_deterministic() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&literal_steps(), |entries| {
            let steps: Vec<ThreadStep> = entries
                .iter()
                .map(|(key, value)| ThreadStep::literal(key.clone(), value.as_str()))
                .collect();
            let thread = ContextThread::new("prep", steps);
            let runtime = Runtime::new(Arc::new(EchoBackend::new()));

            let first = thread.run(Context::new(), &runtime);
            let second = thread.run(Context::new(), &runtime);
            prop_assert_eq!(first.status, Status::Success);
            prop_assert_eq!(first.context.entries(), second.context.entries());
            prop_assert_eq!(first.context.digest(), second.context.digest());

            // Later literals win for repeated keys
            for (key, _) in &entries {
                let last = entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v);
                prop_assert_eq!(first.context.text(key), last.map(String::as_str));
            }
            Ok(())
        })
        .unwrap();
}

/// Resuming with an answer equals running with that answer injected as a literal
#[test]
fn test_resume_equals_preinjected_literal() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(literal_steps(), literal_steps(), "[ -~]{0,32}"),
            |(before, after, answer)| {
                let literals = |entries: &[(String, String)]| -> Vec<ThreadStep> {
                    entries
                        .iter()
                        .map(|(key, value)| ThreadStep::literal(format!("pre_{}", key), value.as_str()))
                        .collect()
                };
                let mut paused_steps = literals(&before);
                paused_steps.push(ThreadStep::human("Answer?", "answer"));
                paused_steps.extend(literals(&after));
                let mut direct_steps = literals(&before);
                direct_steps.push(ThreadStep::literal("answer", answer.as_str()));
                direct_steps.extend(literals(&after));

                let runtime = Runtime::new(Arc::new(EchoBackend::new()));
                let paused_thread = ContextThread::new("prep", paused_steps);
                let paused = paused_thread.run(Context::new(), &runtime);
                prop_assert_eq!(paused.status, Status::AwaitingInput);
                let suspension = paused.suspension.unwrap();
                let resumed = paused_thread.resume(suspension.pause(), answer.as_str(), &runtime);
                let direct = ContextThread::new("prep", direct_steps).run(Context::new(), &runtime);

                prop_assert_eq!(resumed.status, Status::Success);
                prop_assert_eq!(resumed.context.entries(), direct.context.entries());
                Ok(())
            },
        )
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// No unit after the first failing one is ever invoked
    #[test]
    fn test_flow_halts_at_first_failure(len in 1usize..8, fail_at in 0usize..8) {
        let fail_at = fail_at % len;
        let mut backend = ScriptedBackend::new();
        let mut units = Vec::new();
        for index in 0..len {
            let name = format!("u{}", index);
            backend = if index == fail_at {
                backend.fail(&name, GenerationError::Backend("down".into()))
            } else {
                backend.respond_text(&name, "ok")
            };
            units.push(
                Unit::new(
                    name.clone(),
                    ContextThread::empty(format!("{}_thread", name)),
                    GenerationConfig::new(name.clone(), "go").with_output_key(name),
                )
                .unwrap(),
            );
        }
        let backend = Arc::new(backend);
        let runtime = Runtime::new(backend.clone());
        let flow = Flow::new("chain", units).unwrap();

        let result = block_on(flow.execute(Context::new(), &runtime));
        prop_assert_eq!(result.status, Status::Error);
        prop_assert_eq!(backend.total_calls(), fail_at + 1);
        for index in 0..len {
            prop_assert_eq!(result.context.contains(&format!("u{}", index)), index < fail_at);
        }
    }

    /// A loop that never approves calls its target exactly `k` times
    #[test]
    fn test_refinement_runs_at_most_budget(budget in 1u32..6, approve_at in 1u32..8) {
        let backend = Arc::new(ScriptedBackend::new().with_fallback(move |request| {
            if request.config_name != "critic" {
                return Ok(GenerationOutput::text("draft"));
            }
            let attempt: u32 = request.goal.trim_start_matches("Round ").parse().unwrap_or(0);
            let verdict = if attempt >= approve_at { "yes" } else { "no" };
            Ok(GenerationOutput::text(format!(
                "<approved>{}</approved><feedback>round {}</feedback>",
                verdict, attempt
            )))
        }));
        let runtime = Runtime::new(backend.clone());
        let target = Unit::new(
            "writer",
            ContextThread::empty("writer_thread"),
            GenerationConfig::new("write", "Write").with_output_key("draft"),
        )
        .unwrap();
        let evaluator = Unit::new(
            "critic",
            ContextThread::empty("critic_thread"),
            GenerationConfig::new("critic", "Round {refinement_iteration}")
                .declare("refinement_iteration", ValueKind::Record)
                .with_output_key("review")
                .extract_tag("approved")
                .extract_tag("feedback"),
        )
        .unwrap();
        let refinement = RefinementLoop::new("review", target, evaluator, budget).unwrap();

        let result = block_on(refinement.execute(Context::new(), &runtime));
        let expected_calls = approve_at.min(budget) as usize;
        prop_assert_eq!(backend.call_count("write"), expected_calls);
        prop_assert!(result.iterations <= budget);
        if approve_at <= budget {
            prop_assert_eq!(result.status, Status::Success);
            prop_assert_eq!(result.feedback_history.len(), approve_at as usize - 1);
        } else {
            prop_assert_eq!(result.status, Status::MaxIterations);
            prop_assert_eq!(result.feedback_history.len(), budget as usize);
        }
    }
}
