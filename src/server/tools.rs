//! Schema-validated operator tools: thin wrappers that deserialize
//! arguments, call the relevant component, and serialize the outcome.

use std::path::PathBuf;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use super::OperatorContext;
use crate::dispatch::DispatchSpec;
use crate::error::{Result, SquadronError};
use crate::state::AgentConfig;

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct CreateTeamArgs {
    name: String,
    agents: Vec<AgentConfig>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct TeamArgs {
    team: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct AddAgentArgs {
    team: String,
    agent: AgentConfig,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct AgentRefArgs {
    team: String,
    agent_id: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SendMessageArgs {
    team: String,
    agent_id: String,
    text: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct BroadcastArgs {
    team: String,
    text: String,
    agents: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct RelayArgs {
    team: String,
    from: String,
    to: Option<String>,
    #[serde(default)]
    to_all: bool,
    prefix: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct AssignTaskArgs {
    team: String,
    assignee: String,
    description: String,
    #[serde(default)]
    prerequisites: Vec<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct CompleteTaskArgs {
    team: String,
    task_id: String,
    result: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DispatchTeamArgs {
    team_name: String,
    work_dir: PathBuf,
    agents: Vec<DispatchSpec>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct LaunchMissionArgs {
    objective: String,
    work_dir: PathBuf,
    team_name: Option<String>,
    agents: Vec<AgentConfig>,
    verify_command: Option<String>,
    max_verify_retries: Option<u32>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct MissionArgs {
    mission_id: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct AwaitMissionArgs {
    mission_id: String,
    poll_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SteerTeamArgs {
    team: String,
    directive: String,
    agents: Option<Vec<String>>,
}

fn schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({ "type": "object" }))
}

macro_rules! tool {
    ($name:literal, $desc:literal, $args:ty) => {
        json!({ "name": $name, "description": $desc, "inputSchema": schema::<$args>() })
    };
}

pub fn definitions() -> Vec<Value> {
    vec![
        tool!("create_team", "Create a team of agents", CreateTeamArgs),
        tool!("dissolve_team", "Destroy a team, its agents, tasks, and channels", TeamArgs),
        tool!("add_agent", "Add an agent to an existing team", AddAgentArgs),
        tool!("remove_agent", "Remove an idle agent that holds no tasks", AgentRefArgs),
        json!({ "name": "list_agents", "description": "All teams and their rosters",
                "inputSchema": { "type": "object", "properties": {} } }),
        tool!("send_message", "Send one message to an agent and return its reply", SendMessageArgs),
        tool!("broadcast", "Send the same message to several agents concurrently", BroadcastArgs),
        tool!("relay", "Forward one agent's last output to teammates", RelayArgs),
        tool!("assign_task", "Create a task; auto-starts when unblocked and the assignee is idle", AssignTaskArgs),
        tool!("task_status", "All tasks of a team", TeamArgs),
        tool!("complete_task", "Mark a task done and auto-start newly unblocked tasks", CompleteTaskArgs),
        tool!("get_output", "An agent's most recent output", AgentRefArgs),
        tool!("get_team_report", "Roster state plus task table for a team", TeamArgs),
        tool!("dispatch_team", "One-shot parallel fan-out: run tasks, collect results, destroy the team", DispatchTeamArgs),
        tool!("launch_mission", "Start an asynchronous lead+workers mission", LaunchMissionArgs),
        tool!("mission_status", "Phase and per-worker results of a mission", MissionArgs),
        tool!("await_mission", "Block until a mission is terminal; returns and deletes the record", AwaitMissionArgs),
        tool!("get_mission_comms", "Comms snapshot of a finished mission", MissionArgs),
        tool!("get_team_comms", "Live channel contents for an existing team", TeamArgs),
        tool!("steer_team", "Abort in-flight work and redirect a team", SteerTeamArgs),
    ]
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| SquadronError::InvalidArgument(format!("bad arguments: {}", e)))
}

pub async fn dispatch(ctx: &OperatorContext, tool: &str, args: Value) -> Result<Value> {
    match tool {
        "create_team" => {
            let args: CreateTeamArgs = parse(args)?;
            let team = ctx.ops.store().create_team(&args.name, args.agents)?;
            let mut roster: Vec<Value> = team
                .agents
                .values()
                .map(|a| json!({ "id": a.id, "role": a.role, "isLead": a.is_lead }))
                .collect();
            roster.sort_by_key(|v| v["id"].as_str().map(String::from));
            Ok(json!({ "teamId": team.id, "name": team.name, "agents": roster }))
        }
        "dissolve_team" => {
            let args: TeamArgs = parse(args)?;
            let members = ctx.ops.dissolve_team(&args.team)?;
            Ok(json!({ "dissolved": true, "agents": members }))
        }
        "add_agent" => {
            let args: AddAgentArgs = parse(args)?;
            let team_id = ctx.ops.store().resolve_team_id(&args.team)?;
            let agent = ctx.ops.store().add_agent(&team_id, args.agent)?;
            Ok(json!({ "agentId": agent.id, "role": agent.role }))
        }
        "remove_agent" => {
            let args: AgentRefArgs = parse(args)?;
            let team_id = ctx.ops.store().resolve_team_id(&args.team)?;
            ctx.ops.store().remove_agent(&team_id, &args.agent_id)?;
            Ok(json!({ "removed": args.agent_id }))
        }
        "list_agents" => Ok(serde_json::to_value(ctx.ops.list_agents())?),
        "send_message" => {
            let args: SendMessageArgs = parse(args)?;
            let output = ctx
                .ops
                .send_message(&args.team, &args.agent_id, &args.text)
                .await?;
            Ok(Value::String(output))
        }
        "broadcast" => {
            let args: BroadcastArgs = parse(args)?;
            let entries = ctx.ops.broadcast(&args.team, &args.text, args.agents).await?;
            Ok(serde_json::to_value(entries)?)
        }
        "relay" => {
            let args: RelayArgs = parse(args)?;
            let entries = ctx
                .ops
                .relay(&args.team, &args.from, args.to, args.to_all, args.prefix)
                .await?;
            Ok(serde_json::to_value(entries)?)
        }
        "assign_task" => {
            let args: AssignTaskArgs = parse(args)?;
            let report = ctx
                .ops
                .assign_task(&args.team, &args.assignee, &args.description, args.prerequisites)
                .await?;
            Ok(serde_json::to_value(report)?)
        }
        "task_status" => {
            let args: TeamArgs = parse(args)?;
            Ok(serde_json::to_value(ctx.ops.task_status(&args.team)?)?)
        }
        "complete_task" => {
            let args: CompleteTaskArgs = parse(args)?;
            let report = ctx
                .ops
                .complete_task(&args.team, &args.task_id, args.result)
                .await?;
            Ok(serde_json::to_value(report)?)
        }
        "get_output" => {
            let args: AgentRefArgs = parse(args)?;
            Ok(Value::String(ctx.ops.get_output(&args.team, &args.agent_id)?))
        }
        "get_team_report" => {
            let args: TeamArgs = parse(args)?;
            ctx.ops.get_team_report(&args.team)
        }
        "dispatch_team" => {
            let args: DispatchTeamArgs = parse(args)?;
            let report = ctx
                .dispatcher
                .dispatch(&args.team_name, &args.work_dir, args.agents)
                .await?;
            Ok(serde_json::to_value(report)?)
        }
        "launch_mission" => {
            let args: LaunchMissionArgs = parse(args)?;
            let team_name = args
                .team_name
                .unwrap_or_else(|| format!("mission-{}", &uuid::Uuid::new_v4().simple().to_string()[..6]));
            let mission_id = ctx.engine.launch(
                &args.objective,
                &args.work_dir,
                &team_name,
                args.agents,
                args.verify_command,
                args.max_verify_retries,
            )?;
            Ok(json!({ "missionId": mission_id }))
        }
        "mission_status" => {
            let args: MissionArgs = parse(args)?;
            Ok(serde_json::to_value(ctx.engine.status(&args.mission_id)?)?)
        }
        "await_mission" => {
            let args: AwaitMissionArgs = parse(args)?;
            let view = ctx
                .engine
                .await_mission(&args.mission_id, args.poll_ms, args.timeout_ms)
                .await?;
            Ok(serde_json::to_value(view)?)
        }
        "get_mission_comms" => {
            let args: MissionArgs = parse(args)?;
            Ok(serde_json::to_value(ctx.engine.mission_comms(&args.mission_id)?)?)
        }
        "get_team_comms" => {
            let args: TeamArgs = parse(args)?;
            Ok(serde_json::to_value(ctx.engine.team_comms(&args.team)?)?)
        }
        "steer_team" => {
            let args: SteerTeamArgs = parse(args)?;
            let report = ctx
                .steering
                .steer(&args.team, &args.directive, args.agents)
                .await?;
            Ok(serde_json::to_value(report)?)
        }
        other => Err(SquadronError::InvalidArgument(format!(
            "unknown tool '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_cover_operator_surface() {
        let defs = definitions();
        let names: Vec<&str> = defs
            .iter()
            .filter_map(|d| d["name"].as_str())
            .collect();
        for expected in [
            "create_team",
            "dissolve_team",
            "add_agent",
            "remove_agent",
            "list_agents",
            "send_message",
            "broadcast",
            "relay",
            "assign_task",
            "task_status",
            "complete_task",
            "get_output",
            "get_team_report",
            "dispatch_team",
            "launch_mission",
            "mission_status",
            "await_mission",
            "get_mission_comms",
            "get_team_comms",
            "steer_team",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn test_schemas_are_objects() {
        for def in definitions() {
            assert!(def["inputSchema"].is_object(), "{} schema", def["name"]);
        }
    }
}
