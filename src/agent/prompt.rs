//! Composes the per-agent system prompt from the team shape.
//!
//! Pure: equal inputs render the same string, which keeps downstream
//! threads reproducible and the composer testable.

use crate::state::{Agent, Team, TeamSummary};

/// Tool surface available to agents over the comms service, enumerated in
/// the prompt so agents know what they can call.
const AGENT_OPERATIONS: &str = "\
- group_post / group_read / group_peek: your team's shared channel
- dm_send / dm_read / dm_peek: direct messages to teammates
- share / get_shared: append deliverables to the team artifact log
- get_team_context: rosters for your team and the other teams
- wait: block until a teammate writes to you (prefer this over polling)";

const LEAD_OPERATIONS: &str = "\
- lead_post / lead_read / lead_peek: the cross-team lead channel (leads only)
- dm_send also reaches the leads of other teams";

const POLICY: &str = "\
Coordinate through the channels above instead of assuming teammate state.
Post progress to group chat when you finish a work item, share file paths
for anything you produce, and use wait rather than repeated reads when you
expect a reply. Stay within your role; hand work that belongs to a teammate
back through a message.";

/// Builds the full instruction string for one agent.
///
/// When the agent's team is gone from state, only the bare addendum is
/// returned; the caller decides whether that is an error.
pub fn compose(agent: &Agent, team: Option<&Team>, other_teams: &[TeamSummary]) -> String {
    let Some(team) = team else {
        return agent.instructions.clone();
    };

    let mut sections = Vec::new();

    let specialization = agent
        .specialization
        .as_deref()
        .map(|s| format!(" specializing in {}", s))
        .unwrap_or_default();
    sections.push(format!(
        "You are agent `{}` on team \"{}\", working as a {}{}.",
        agent.id, team.name, agent.role, specialization
    ));

    let mut teammates: Vec<&Agent> = team.agents.values().collect();
    teammates.sort_by(|a, b| a.id.cmp(&b.id));
    let roster = teammates
        .iter()
        .map(|member| {
            let mut tags = Vec::new();
            if member.id == agent.id {
                tags.push("you");
            }
            if member.is_lead {
                tags.push("lead");
            }
            let tag_str = if tags.is_empty() {
                String::new()
            } else {
                format!(" ({})", tags.join(", "))
            };
            let spec = member
                .specialization
                .as_deref()
                .map(|s| format!(" — {}", s))
                .unwrap_or_default();
            format!("- `{}`: {}{}{}", member.id, member.role, tag_str, spec)
        })
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("## Your team\n{}", roster));

    if agent.is_lead && !other_teams.is_empty() {
        let mut others: Vec<&TeamSummary> = other_teams.iter().collect();
        others.sort_by(|a, b| a.name.cmp(&b.name));
        let listing = others
            .iter()
            .map(|t| {
                let members = t
                    .agents
                    .iter()
                    .map(|a| format!("`{}` ({})", a.id, a.role))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- \"{}\": {}", t.name, members)
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "## Other teams\nYou lead your team; reach other leads over the lead channel or by DM.\n{}",
            listing
        ));
    }

    let operations = if agent.is_lead {
        format!("{}\n{}", AGENT_OPERATIONS, LEAD_OPERATIONS)
    } else {
        AGENT_OPERATIONS.to_string()
    };
    sections.push(format!("## Available operations\n{}", operations));

    sections.push(format!("## Working agreement\n{}", POLICY));

    if !agent.instructions.is_empty() {
        sections.push(agent.instructions.clone());
    }

    sections.join("\n\n")
}
