//! Mission engine: phase walk, verification retry, fix dispatch, partial
//! failure, snapshot retention.

mod fixtures;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fixtures::Harness;
use squadron::config::MissionConfig;
use squadron::error::SquadronError;
use squadron::mission::{MissionEngine, MissionPhase, MissionRegistry};
use squadron::state::AgentConfig;

fn engine_with(harness: &Harness, config: MissionConfig) -> Arc<MissionEngine> {
    MissionEngine::new(
        Arc::clone(&harness.store),
        Arc::clone(&harness.bus),
        Arc::clone(&harness.tokens),
        Arc::clone(&harness.adapter),
        Arc::new(MissionRegistry::new()),
        config,
    )
}

fn engine(harness: &Harness) -> Arc<MissionEngine> {
    engine_with(
        harness,
        MissionConfig {
            retention_secs: 30 * 60,
            verify_timeout_secs: 60,
            await_poll_ms: 20,
            await_timeout_ms: 30_000,
            max_fix_retries: 2,
        },
    )
}

fn lead_and_worker() -> Vec<AgentConfig> {
    vec![AgentConfig::lead("lead"), AgentConfig::new("dev")]
}

async fn poll_until_terminal(engine: &MissionEngine, mission_id: &str) -> MissionPhase {
    for _ in 0..500 {
        let view = engine.status(mission_id).unwrap();
        if view.phase == MissionPhase::Completed || view.phase == MissionPhase::Error {
            return view.phase;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("mission never reached a terminal phase");
}

#[tokio::test]
async fn test_launch_requires_exactly_one_lead() {
    let harness = Harness::new();
    let engine = engine(&harness);

    let none = engine.launch(
        "obj",
        &PathBuf::from("/tmp"),
        "m",
        vec![AgentConfig::new("a"), AgentConfig::new("b")],
        None,
        None,
    );
    assert!(matches!(none, Err(SquadronError::InvalidArgument(_))));

    let two = engine.launch(
        "obj",
        &PathBuf::from("/tmp"),
        "m",
        vec![AgentConfig::lead("a"), AgentConfig::lead("b")],
        None,
        None,
    );
    assert!(matches!(two, Err(SquadronError::InvalidArgument(_))));
}

/// One lead and no workers is a valid mission shape.
#[tokio::test]
async fn test_lead_only_mission_runs_to_completion() {
    let harness = Harness::new();
    let engine = engine(&harness);

    let mission_id = engine
        .launch(
            "solo objective",
            &PathBuf::from("/tmp"),
            "solo",
            vec![AgentConfig::lead("lead")],
            None,
            None,
        )
        .unwrap();

    let phase = poll_until_terminal(&engine, &mission_id).await;
    assert_eq!(phase, MissionPhase::Completed);

    let view = engine.status(&mission_id).unwrap();
    assert!(view.worker_ids.is_empty());
    assert!(view.workers.is_empty());
    assert!(view.final_report.is_some());
    assert!(view.error.is_none());
}

/// Verification passes first try: executing -> verifying -> reviewing ->
/// completed with exactly one logged attempt.
#[tokio::test]
async fn test_mission_with_passing_verification() {
    let harness = Harness::new();
    let engine = engine(&harness);
    harness.mock.respond("Compile the final report", "All slices landed.");

    let mission_id = engine
        .launch(
            "build the thing",
            &PathBuf::from("/tmp"),
            "mission-team",
            lead_and_worker(),
            Some("echo pass".into()),
            Some(2),
        )
        .unwrap();

    let phase = poll_until_terminal(&engine, &mission_id).await;
    assert_eq!(phase, MissionPhase::Completed);

    let view = engine.status(&mission_id).unwrap();
    assert_eq!(view.attempts.len(), 1);
    assert!(view.attempts[0].passed);
    assert_eq!(view.attempts[0].output, "pass");
    assert_eq!(view.final_report.as_deref(), Some("All slices landed."));
    assert!(view.error.is_none());
    assert_eq!(view.workers.len(), 1);
    assert!(view.workers[0].ok);

    // Terminal snapshot is retrievable; the team itself is gone.
    engine.mission_comms(&mission_id).unwrap();
    assert!(harness.store.resolve_team_id("mission-team").is_err());
}

/// Verification fails twice with a retry budget of one: two logged
/// attempts, one fix round dispatched from the lead's JSON, terminal
/// completed with a report.
#[tokio::test]
async fn test_mission_with_failing_verification_and_fix_round() {
    let harness = Harness::new();
    let engine = engine(&harness);

    let mission_id = engine
        .launch(
            "doomed objective",
            &PathBuf::from("/tmp"),
            "fixer-team",
            lead_and_worker(),
            Some("echo nope; exit 1".into()),
            Some(1),
        )
        .unwrap();

    // The run has not progressed yet on this runtime; wire the lead's fix
    // answer to the real worker id now.
    let view = engine.status(&mission_id).unwrap();
    let worker_id = view.worker_ids[0].clone();
    let fix_json = format!(
        r#"Assignments: [{{"agentId": "{}", "task": "fix: adjust the tests"}}, {{"agentId": "ghost-000", "task": "should be dropped"}}]"#,
        worker_id
    );
    harness.mock.respond_with("JSON array", move |_| fix_json.clone());

    let phase = poll_until_terminal(&engine, &mission_id).await;
    assert_eq!(phase, MissionPhase::Completed);

    let view = engine.status(&mission_id).unwrap();
    assert_eq!(view.attempts.len(), 2);
    assert!(view.attempts.iter().all(|a| !a.passed));
    assert!(view.attempts[0].output.contains("nope"));
    assert!(view.final_report.is_some());

    let prompts = harness.mock.prompts();
    assert!(prompts.iter().any(|p| p == "fix: adjust the tests"));
    assert!(!prompts.iter().any(|p| p.contains("should be dropped")));

    // The fix outcome overwrote the worker's record.
    assert!(view.workers.iter().any(|w| w.agent_id == worker_id && w.ok));
}

#[tokio::test]
async fn test_worker_failure_never_aborts_the_mission() {
    let harness = Harness::new();
    let engine = engine(&harness);
    harness.mock.fail(
        "Execute your slice",
        fixtures::MockFailure::Remote("worker exploded".into()),
    );

    let mission_id = engine
        .launch(
            "fragile objective",
            &PathBuf::from("/tmp"),
            "fragile",
            lead_and_worker(),
            None,
            None,
        )
        .unwrap();

    let phase = poll_until_terminal(&engine, &mission_id).await;
    assert_eq!(phase, MissionPhase::Completed);

    let view = engine.status(&mission_id).unwrap();
    assert_eq!(view.workers.len(), 1);
    assert!(!view.workers[0].ok);
    assert!(view.workers[0].output.contains("worker exploded"));
    assert!(view.final_report.is_some());
}

#[tokio::test]
async fn test_await_mission_returns_and_deletes_record() {
    let harness = Harness::new();
    let engine = engine(&harness);

    let mission_id = engine
        .launch(
            "quick objective",
            &PathBuf::from("/tmp"),
            "quick",
            lead_and_worker(),
            None,
            None,
        )
        .unwrap();

    let view = engine
        .await_mission(&mission_id, Some(10), Some(30_000))
        .await
        .unwrap();
    assert_eq!(view.phase, MissionPhase::Completed);

    assert!(matches!(
        engine.status(&mission_id),
        Err(SquadronError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_mission_comms_not_ready_before_terminal() {
    let harness = Harness::new();
    let engine = engine(&harness);
    harness.mock.hang("Execute your slice");

    let mission_id = engine
        .launch(
            "long objective",
            &PathBuf::from("/tmp"),
            "longrun",
            lead_and_worker(),
            None,
            None,
        )
        .unwrap();
    let worker_id = engine.status(&mission_id).unwrap().worker_ids[0].clone();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        engine.mission_comms(&mission_id),
        Err(SquadronError::NotReady(_))
    ));

    // Live team comms work while the mission runs; post something first.
    let team_id = harness.store.resolve_team_id("longrun").unwrap();
    harness.bus.group_post(&team_id, &worker_id, "dev", "progress note");
    let live = engine.team_comms("longrun").unwrap();
    assert_eq!(live.group.len(), 1);

    // Release the hanging worker and let the mission finish.
    harness.adapter.cancel(&worker_id);
    let phase = poll_until_terminal(&engine, &mission_id).await;
    assert_eq!(phase, MissionPhase::Completed);

    // The snapshot captured the in-flight chatter.
    let snapshot = engine.mission_comms(&mission_id).unwrap();
    assert_eq!(snapshot.group.len(), 1);
    assert_eq!(snapshot.group[0].text, "progress note");
}

/// The snapshot outlives the team by the retention window, then the record
/// is evicted.
#[tokio::test(start_paused = true)]
async fn test_mission_retention_window() {
    let harness = Harness::new();
    let engine = engine_with(
        &harness,
        MissionConfig {
            retention_secs: 30 * 60,
            verify_timeout_secs: 60,
            await_poll_ms: 20,
            await_timeout_ms: 30_000,
            max_fix_retries: 2,
        },
    );

    let mission_id = engine
        .launch(
            "short objective",
            &PathBuf::from("/tmp"),
            "retained",
            lead_and_worker(),
            None,
            None,
        )
        .unwrap();

    let phase = poll_until_terminal(&engine, &mission_id).await;
    assert_eq!(phase, MissionPhase::Completed);
    engine.mission_comms(&mission_id).unwrap();

    // Just short of the window the record is still there.
    tokio::time::sleep(Duration::from_secs(29 * 60)).await;
    engine.mission_comms(&mission_id).unwrap();

    // Past the window it is evicted.
    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert!(matches!(
        engine.mission_comms(&mission_id),
        Err(SquadronError::NotFound(_))
    ));
    assert!(matches!(
        engine.status(&mission_id),
        Err(SquadronError::NotFound(_))
    ));
}
