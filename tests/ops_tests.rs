//! Operator operations over state and adapter: messaging guards, relay,
//! and the task auto-start cascade.

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use fixtures::{Harness, MockFailure};
use squadron::error::SquadronError;
use squadron::ops::Operations;
use squadron::state::{AgentConfig, TaskStatus};

fn operations(harness: &Harness) -> Operations {
    Operations::new(
        Arc::clone(&harness.store),
        Arc::clone(&harness.bus),
        Arc::clone(&harness.tokens),
        Arc::clone(&harness.adapter),
    )
}

fn sorted_agent_ids(harness: &Harness, team_id: &str) -> Vec<String> {
    let team = harness.store.get_team(team_id).unwrap();
    let mut ids: Vec<String> = team.agents.keys().cloned().collect();
    ids.sort();
    ids
}

async fn settle() {
    // Lets background kicks run to completion on the test runtime.
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_send_message_refuses_working_agent() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team("t", vec![AgentConfig::new("dev")])
        .unwrap();
    let agent = sorted_agent_ids(&harness, &team.id).remove(0);
    harness.mock.hang("long");

    let inflight = {
        let adapter = Arc::clone(&harness.adapter);
        let team_id = team.id.clone();
        let agent = agent.clone();
        tokio::spawn(async move { adapter.send(&team_id, &agent, "long job").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcome = ops.send_message(&team.id, &agent, "hello").await;
    assert!(matches!(outcome, Err(SquadronError::Busy(_))));

    harness.adapter.cancel(&agent);
    let _ = inflight.await.unwrap();
}

#[tokio::test]
async fn test_broadcast_skips_working_agents_and_reports_everyone() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team(
            "t",
            vec![
                AgentConfig::new("alpha"),
                AgentConfig::new("beta"),
                AgentConfig::new("gamma"),
            ],
        )
        .unwrap();
    let ids = sorted_agent_ids(&harness, &team.id);
    harness.mock.hang("occupied");

    let inflight = {
        let adapter = Arc::clone(&harness.adapter);
        let team_id = team.id.clone();
        let busy = ids[0].clone();
        tokio::spawn(async move { adapter.send(&team_id, &busy, "occupied now").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let entries = ops
        .broadcast(&team.id, "announcement for all", None)
        .await
        .unwrap();

    assert_eq!(entries.len(), 3);
    let skipped = entries.iter().find(|e| e.agent_id == ids[0]).unwrap();
    assert!(!skipped.ok);
    assert!(skipped.detail.contains("skipped"));
    assert!(entries.iter().filter(|e| e.ok).count() == 2);

    harness.adapter.cancel(&ids[0]);
    let _ = inflight.await.unwrap();
}

#[tokio::test]
async fn test_relay_requires_output_and_destination() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team("t", vec![AgentConfig::new("src"), AgentConfig::new("dst")])
        .unwrap();
    let ids = sorted_agent_ids(&harness, &team.id);
    let (dst, src) = (ids[0].clone(), ids[1].clone());

    // No output yet.
    let outcome = ops.relay(&team.id, &src, Some(dst.clone()), false, None).await;
    assert!(matches!(outcome, Err(SquadronError::InvalidArgument(_))));

    harness.mock.respond("produce", "the findings");
    harness.adapter.send(&team.id, &src, "produce it").await.unwrap();

    // No destination selector.
    let outcome = ops.relay(&team.id, &src, None, false, None).await;
    assert!(matches!(outcome, Err(SquadronError::InvalidArgument(_))));

    let entries = ops
        .relay(&team.id, &src, None, true, Some("From your teammate:".into()))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].agent_id, dst);
    assert!(entries[0].ok);

    let relayed = harness.mock.prompts().pop().unwrap();
    assert!(relayed.starts_with("From your teammate:"));
    assert!(relayed.contains("the findings"));
}

/// Root auto-starts; left and right stay pending until the root completes,
/// then both unblock and start.
#[tokio::test]
async fn test_dependency_cascade() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team(
            "cascade",
            vec![
                AgentConfig::new("a"),
                AgentConfig::new("b"),
                AgentConfig::new("c"),
            ],
        )
        .unwrap();
    let ids = sorted_agent_ids(&harness, &team.id);

    let root = ops
        .assign_task(&team.id, &ids[0], "root", vec![])
        .await
        .unwrap();
    assert!(root.auto_started);
    settle().await;

    let left = ops
        .assign_task(&team.id, &ids[1], "left", vec![root.task.id.clone()])
        .await
        .unwrap();
    let right = ops
        .assign_task(&team.id, &ids[2], "right", vec![root.task.id.clone()])
        .await
        .unwrap();
    assert!(!left.auto_started);
    assert!(!right.auto_started);

    let report = ops
        .complete_task(&team.id, &root.task.id, Some("R".into()))
        .await
        .unwrap();
    let mut unblocked = report.unblocked.clone();
    unblocked.sort();
    let mut expected = vec![left.task.id.clone(), right.task.id.clone()];
    expected.sort();
    assert_eq!(unblocked, expected);
    assert_eq!(report.started.len(), 2);
    settle().await;

    let reloaded = harness.store.get_team(&team.id).unwrap();
    assert_eq!(
        reloaded.tasks[&root.task.id].status,
        TaskStatus::Completed
    );
    assert_eq!(
        reloaded.tasks[&root.task.id].result.as_deref(),
        Some("R")
    );
    for id in [&left.task.id, &right.task.id] {
        assert_eq!(reloaded.tasks[id].status, TaskStatus::InProgress);
    }
}

#[tokio::test]
async fn test_failed_kick_reverts_task_to_pending() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team("t", vec![AgentConfig::new("dev")])
        .unwrap();
    let agent = sorted_agent_ids(&harness, &team.id).remove(0);
    harness.mock.fail("assigned task", MockFailure::Remote("rejected".into()));

    let report = ops
        .assign_task(&team.id, &agent, "doomed work", vec![])
        .await
        .unwrap();
    assert!(report.auto_started);
    settle().await;

    let reloaded = harness.store.get_team(&team.id).unwrap();
    assert_eq!(reloaded.tasks[&report.task.id].status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_complete_task_defaults_result_to_assignee_output() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team("t", vec![AgentConfig::new("dev")])
        .unwrap();
    let agent = sorted_agent_ids(&harness, &team.id).remove(0);

    harness.mock.respond("work", "produced artifact X");
    let report = ops
        .assign_task(&team.id, &agent, "work on it", vec![])
        .await
        .unwrap();
    settle().await;

    ops.complete_task(&team.id, &report.task.id, None).await.unwrap();
    let reloaded = harness.store.get_team(&team.id).unwrap();
    assert_eq!(
        reloaded.tasks[&report.task.id].result.as_deref(),
        Some("produced artifact X")
    );
}

#[tokio::test]
async fn test_get_output_and_team_report() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team("report", vec![AgentConfig::new("dev")])
        .unwrap();
    let agent = sorted_agent_ids(&harness, &team.id).remove(0);

    assert!(matches!(
        ops.get_output(&team.id, &agent),
        Err(SquadronError::NotFound(_))
    ));

    harness.adapter.send(&team.id, &agent, "say hi").await.unwrap();
    assert_eq!(ops.get_output(&team.id, &agent).unwrap(), "OK");

    let report = ops.get_team_report(&team.id).unwrap();
    assert_eq!(report["team"]["name"], "report");
    assert_eq!(report["agents"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dissolve_team_purges_bus_and_tokens() {
    let harness = Harness::new();
    let ops = operations(&harness);
    let team = harness
        .store
        .create_team("gone", vec![AgentConfig::new("a"), AgentConfig::new("b")])
        .unwrap();
    let ids = sorted_agent_ids(&harness, &team.id);

    harness.bus.group_post(&team.id, &ids[0], "a", "hello");
    harness.bus.dm_send(&ids[0], &ids[1], "a", "psst");
    let token = harness.tokens.issue(&ids[0]);

    ops.dissolve_team(&team.id).unwrap();

    assert!(harness.store.get_team(&team.id).is_err());
    assert!(harness.bus.group_snapshot(&team.id).is_empty());
    assert_eq!(harness.bus.dm_peek(&ids[1]), 0);
    assert!(!harness.tokens.verify(&ids[0], &token));
}
