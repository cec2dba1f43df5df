//! Role-specific mission prompt templates.

use crate::state::Agent;

use super::types::{VerifyAttempt, WorkerResult};

pub fn lead_kickoff(objective: &str, workers: &[&Agent]) -> String {
    let roster = workers
        .iter()
        .map(|w| format!("- `{}` ({})", w.id, w.role))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"# Mission objective

{objective}

You are the mission lead. Your workers are already running their own slices:

{roster}

Plan the overall approach, watch group chat for progress, and unblock workers
over DM when they stall. Do not implement worker slices yourself; facilitate,
resolve conflicts, and keep a running picture of where the mission stands."#
    )
}

pub fn worker_kickoff(objective: &str, worker: &Agent, teammates: &[&Agent]) -> String {
    let others = teammates
        .iter()
        .filter(|t| t.id != worker.id)
        .map(|t| format!("- `{}` ({})", t.id, t.role))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"# Mission objective

{objective}

Execute your slice of this objective with full autonomy as the team's {role}.
Teammates working in parallel:

{others}

Coordinate over group chat, claim your area early to avoid overlap, and post
a summary of what you produced when your slice is done."#,
        role = worker.role,
    )
}

/// Demands machine-readable assignments; surrounding prose is tolerated and
/// stripped by the parser.
pub fn fix_round(failure_output: &str) -> String {
    format!(
        r#"Verification failed. Output:

```
{failure_output}
```

Decide which workers should fix what. Respond with ONLY a JSON array, each
entry {{"agentId": "<worker id>", "task": "<what to do>"}}. Use an empty
array [] if no fixes are needed."#
    )
}

pub fn compilation(
    objective: &str,
    workers: &[WorkerResult],
    verification: Option<&VerifyAttempt>,
) -> String {
    let outcomes = workers
        .iter()
        .map(|w| {
            let status = if w.ok { "ok" } else { "error" };
            format!("### `{}` ({})\n{}", w.agent_id, status, w.output)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let verify_section = match verification {
        Some(attempt) => format!(
            "\n\n## Final verification (attempt {}): {}\n\n```\n{}\n```",
            attempt.attempt,
            if attempt.passed { "passed" } else { "failed" },
            attempt.output
        ),
        None => String::new(),
    };

    format!(
        r#"The mission "{objective}" has finished executing. Compile the final report.

## Worker outcomes

{outcomes}{verify_section}

Summarize what was accomplished, call out failures or gaps honestly, and list
the concrete deliverables."#
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::state::AgentConfig;

    fn agent(role: &str) -> Agent {
        Agent::from_config(AgentConfig::new(role), &PathBuf::from("/w"))
    }

    #[test]
    fn test_lead_kickoff_lists_workers() {
        let dev = agent("dev");
        let qa = agent("qa");
        let prompt = lead_kickoff("ship it", &[&dev, &qa]);
        assert!(prompt.contains("ship it"));
        assert!(prompt.contains(&dev.id));
        assert!(prompt.contains(&qa.id));
    }

    #[test]
    fn test_worker_kickoff_excludes_self() {
        let dev = agent("dev");
        let qa = agent("qa");
        let prompt = worker_kickoff("ship it", &dev, &[&dev, &qa]);
        assert!(prompt.contains(&qa.id));
        assert!(!prompt.contains(&format!("- `{}`", dev.id)));
    }

    #[test]
    fn test_fix_round_demands_json() {
        let prompt = fix_round("3 tests failed");
        assert!(prompt.contains("3 tests failed"));
        assert!(prompt.contains("JSON array"));
    }
}
