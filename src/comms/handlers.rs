//! Tool implementations behind the comms service, each implicitly pinned to
//! the session's bound agent id.

use serde::Deserialize;
use serde_json::{json, Value};

use super::CommsState;
use crate::error::{Result, SquadronError};
use crate::state::{Agent, AgentSummary};

/// Tool catalog returned by `tools/list`. Schemas are hand-rolled: the
/// argument shapes are tiny and stable.
pub fn agent_tool_definitions() -> Value {
    let text_arg = |desc: &str| {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string", "description": desc } },
            "required": ["text"],
        })
    };
    let no_args = json!({ "type": "object", "properties": {} });

    json!([
        { "name": "group_post", "description": "Post to your team's group chat", "inputSchema": text_arg("message text") },
        { "name": "group_read", "description": "Read unread group-chat messages (excludes your own)", "inputSchema": no_args },
        { "name": "group_peek", "description": "Count unread group-chat messages without consuming them", "inputSchema": no_args },
        { "name": "dm_send", "description": "Send a direct message to a teammate (or another lead, if you lead)", "inputSchema": {
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "recipient agent id" },
                "text": { "type": "string" },
            },
            "required": ["to", "text"],
        } },
        { "name": "dm_read", "description": "Read unread DMs, optionally from one sender only", "inputSchema": {
            "type": "object",
            "properties": { "from": { "type": "string", "description": "filter to this sender" } },
        } },
        { "name": "dm_peek", "description": "Count unread DMs", "inputSchema": no_args },
        { "name": "lead_post", "description": "Post to the cross-team lead channel (leads only)", "inputSchema": text_arg("message text") },
        { "name": "lead_read", "description": "Read unread lead-channel messages (leads only)", "inputSchema": no_args },
        { "name": "lead_peek", "description": "Count unread lead-channel messages (leads only)", "inputSchema": no_args },
        { "name": "share", "description": "Append an artifact (file path, summary) to the team log", "inputSchema": text_arg("artifact payload") },
        { "name": "get_shared", "description": "Read the team's full artifact log", "inputSchema": no_args },
        { "name": "get_team_context", "description": "Your team roster and the other teams' public rosters", "inputSchema": no_args },
        { "name": "wait", "description": "Block until a message arrives for you, your team dissolves, or the timeout elapses", "inputSchema": {
            "type": "object",
            "properties": { "timeoutMs": { "type": "integer", "minimum": 1000, "maximum": 60000 } },
        } },
    ])
}

#[derive(Deserialize)]
struct TextArgs {
    text: String,
}

#[derive(Deserialize)]
struct DmSendArgs {
    to: String,
    text: String,
}

#[derive(Deserialize)]
struct DmReadArgs {
    from: Option<String>,
}

#[derive(Deserialize)]
struct WaitArgs {
    #[serde(rename = "timeoutMs")]
    timeout_ms: Option<u64>,
}

/// Looks up the caller; a missing team means it was dissolved under them.
fn caller(state: &CommsState, agent_id: &str) -> Result<(String, Agent)> {
    state.store.team_of_agent(agent_id).ok_or_else(|| {
        SquadronError::NotFound(format!("agent '{}' has no team (dissolved?)", agent_id))
    })
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| SquadronError::InvalidArgument(format!("bad arguments: {}", e)))
}

fn check_len(text: &str, max: usize, what: &str) -> Result<()> {
    if text.chars().count() > max {
        return Err(SquadronError::InvalidArgument(format!(
            "{} exceeds {} characters",
            what, max
        )));
    }
    Ok(())
}

pub async fn dispatch(
    state: &CommsState,
    agent_id: &str,
    tool: &str,
    args: Value,
) -> Result<Value> {
    match tool {
        "group_post" => {
            let args: TextArgs = parse(args)?;
            check_len(&args.text, state.config.max_chat_chars, "message")?;
            let (team_id, agent) = caller(state, agent_id)?;
            state.bus.group_post(&team_id, agent_id, &agent.role, &args.text);
            Ok(json!({ "posted": true }))
        }
        "group_read" => {
            let (team_id, _) = caller(state, agent_id)?;
            Ok(serde_json::to_value(state.bus.group_read(&team_id, agent_id))?)
        }
        "group_peek" => {
            let (team_id, _) = caller(state, agent_id)?;
            Ok(json!({ "unread": state.bus.group_peek(&team_id, agent_id) }))
        }
        "dm_send" => {
            let args: DmSendArgs = parse(args)?;
            check_len(&args.text, state.config.max_chat_chars, "message")?;
            let (team_id, agent) = caller(state, agent_id)?;
            authorize_dm(state, &team_id, &agent, &args.to)?;
            state.bus.dm_send(agent_id, &args.to, &agent.role, &args.text);
            Ok(json!({ "sent": true }))
        }
        "dm_read" => {
            let args: DmReadArgs = parse(args)?;
            caller(state, agent_id)?;
            Ok(serde_json::to_value(
                state.bus.dm_read(agent_id, args.from.as_deref()),
            )?)
        }
        "dm_peek" => {
            caller(state, agent_id)?;
            Ok(json!({ "unread": state.bus.dm_peek(agent_id) }))
        }
        "lead_post" => {
            let args: TextArgs = parse(args)?;
            check_len(&args.text, state.config.max_chat_chars, "message")?;
            let (team_id, agent) = caller(state, agent_id)?;
            require_lead(&agent)?;
            let team = state.store.get_team(&team_id)?;
            state.bus.lead_post(agent_id, &agent.role, &team.name, &args.text);
            Ok(json!({ "posted": true }))
        }
        "lead_read" => {
            let (_, agent) = caller(state, agent_id)?;
            require_lead(&agent)?;
            Ok(serde_json::to_value(state.bus.lead_read(agent_id))?)
        }
        "lead_peek" => {
            let (_, agent) = caller(state, agent_id)?;
            require_lead(&agent)?;
            Ok(json!({ "unread": state.bus.lead_peek(agent_id) }))
        }
        "share" => {
            let args: TextArgs = parse(args)?;
            check_len(&args.text, state.config.max_share_chars, "artifact")?;
            let (team_id, _) = caller(state, agent_id)?;
            state.bus.share(&team_id, agent_id, &args.text);
            Ok(json!({ "shared": true }))
        }
        "get_shared" => {
            let (team_id, _) = caller(state, agent_id)?;
            Ok(serde_json::to_value(state.bus.get_shared(&team_id))?)
        }
        "get_team_context" => {
            let (team_id, agent) = caller(state, agent_id)?;
            team_context(state, &team_id, &agent)
        }
        "wait" => {
            let args: WaitArgs = parse(args)?;
            let (team_id, agent) = caller(state, agent_id)?;
            let timeout = args
                .timeout_ms
                .unwrap_or(state.config.wait_default_ms)
                .clamp(state.config.wait_min_ms, state.config.wait_max_ms);
            let outcome = state
                .bus
                .wait(&team_id, agent_id, agent.is_lead, Some(timeout))
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }
        other => Err(SquadronError::InvalidArgument(format!(
            "unknown tool '{}'",
            other
        ))),
    }
}

fn require_lead(agent: &Agent) -> Result<()> {
    if agent.is_lead {
        Ok(())
    } else {
        Err(SquadronError::Unauthorized(
            "the lead channel is restricted to team leads".into(),
        ))
    }
}

/// Same-team DMs always; cross-team only between two leads.
fn authorize_dm(state: &CommsState, sender_team: &str, sender: &Agent, to: &str) -> Result<()> {
    let (recipient_team, recipient) = state.store.team_of_agent(to).ok_or_else(|| {
        SquadronError::NotFound(format!("DM recipient '{}' does not exist", to))
    })?;

    if recipient_team == sender_team {
        return Ok(());
    }
    if sender.is_lead && recipient.is_lead {
        return Ok(());
    }
    Err(SquadronError::Unauthorized(
        "cross-team DMs are only permitted between two leads".into(),
    ))
}

fn team_context(state: &CommsState, team_id: &str, agent: &Agent) -> Result<Value> {
    let team = state.store.get_team(team_id)?;

    let mut teammates: Vec<&Agent> = team
        .agents
        .values()
        .filter(|a| a.id != agent.id)
        .collect();
    teammates.sort_by(|a, b| a.id.cmp(&b.id));
    let teammates: Vec<Value> = teammates
        .into_iter()
        .map(|member| {
            json!({
                "id": member.id,
                "role": member.role,
                "specialization": member.specialization,
                "isLead": member.is_lead,
                "status": member.status.to_string(),
                "tasks": member.task_ids,
            })
        })
        .collect();

    let other_teams: Vec<Value> = state
        .store
        .other_team_summaries(team_id)
        .into_iter()
        .map(|summary| {
            let members: Vec<Value> = summary
                .agents
                .iter()
                .map(|a: &AgentSummary| {
                    json!({
                        "id": a.id,
                        "role": a.role,
                        "specialization": a.specialization,
                        "isLead": a.is_lead,
                        "status": a.status.to_string(),
                    })
                })
                .collect();
            json!({ "name": summary.name, "members": members })
        })
        .collect();

    Ok(json!({
        "team": {
            "name": team.name,
            "you": {
                "id": agent.id,
                "role": agent.role,
                "isLead": agent.is_lead,
            },
            "teammates": teammates,
        },
        "otherTeams": other_teams,
        "hint": "To reach another team, DM its lead (leads only) or have your lead use the lead channel.",
    }))
}
