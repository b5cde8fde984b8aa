//! `<genuinely-blocked>` reports
//!
//! A generation step may refuse a goal it cannot attempt with the context it was given.
//! The refusal is a recoverable outcome, reported as a small block of `key: value` lines.

use regex::Regex;
use serde::{Deserialize, Serialize};

const BLOCKED_PATTERN: &str = r"(?is)<genuinely-blocked>\s*(.*?)\s*</genuinely-blocked>";

/// Instructions appended to the goal when a config opts into blocked reporting.
pub const BLOCKED_INSTRUCTIONS: &str = "\n\n## If You Cannot Proceed\n\n\
If you encounter a genuine obstacle that prevents completing this task, report it using this EXACT format:\n\n\
<genuinely-blocked>\n\
goal: [the goal you were trying to accomplish]\n\
open_tasks: [what remains to be done]\n\
obstacle: [what specifically is blocking you]\n\
reason: [missing_input, permission_denied, ambiguous_goal, tool_failure, dependency_missing, human_required, or other]\n\
</genuinely-blocked>\n\n\
Only use this when truly blocked. Try to complete the task first.";

/// Why a generation step could not proceed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedReport {
    /// Name of the generation config that reported the block
    pub config: String,
    pub goal: String,
    pub open_tasks: String,
    pub obstacle: String,
    pub reason: String,
    /// Body of the block as produced, before field parsing
    pub raw: String,
}

impl BlockedReport {
    /// Parse the first `<genuinely-blocked>` block in `text`, if any.
    ///
    /// Unknown lines are kept only in `raw`; field names are case-insensitive and spaces in
    /// them read as underscores (`Open Tasks:` is `open_tasks`).
    pub fn parse(config: &str, text: &str) -> Option<BlockedReport> {
        let pattern = Regex::new(BLOCKED_PATTERN).ok()?;
        let body = pattern.captures(text)?.get(1)?.as_str();

        let mut report = BlockedReport {
            config: config.to_string(),
            raw: body.to_string(),
            ..BlockedReport::default()
        };
        for line in body.lines() {
            let Some((field, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match field.trim().to_lowercase().replace(' ', "_").as_str() {
                "goal" => report.goal = value,
                "open_tasks" => report.open_tasks = value,
                "obstacle" => report.obstacle = value,
                "reason" => report.reason = value,
                _ => {}
            }
        }
        Some(report)
    }
}
