//! Inter-agent message bus: group chat, DMs, the cross-team lead channel,
//! shared artifacts, and the blocking wait primitive.

mod channels;
mod message;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Result;

use channels::Channel;
pub use channels::DmKey;
pub use message::{Artifact, ChatMessage, WaitOutcome};

/// Wait timeout bounds in milliseconds.
pub const WAIT_MIN_MS: u64 = 1_000;
pub const WAIT_MAX_MS: u64 = 60_000;
pub const WAIT_DEFAULT_MS: u64 = 30_000;

enum WakeReason {
    Delivery,
    Dissolved,
}

struct Waiter {
    id: u64,
    team: String,
    agent: String,
    is_lead: bool,
    tx: oneshot::Sender<WakeReason>,
}

#[derive(Default)]
struct BusInner {
    groups: HashMap<String, Channel>,
    dms: HashMap<DmKey, Channel>,
    lead: Channel,
    artifacts: HashMap<String, Vec<Artifact>>,
    waiters: Vec<Waiter>,
}

impl BusInner {
    fn unread_counts(&self, team: &str, agent: &str, is_lead: bool) -> (usize, usize, usize) {
        let group = self
            .groups
            .get(team)
            .map(|c| c.unread_for(agent))
            .unwrap_or(0);
        let dms = self
            .dms
            .iter()
            .filter(|(key, _)| key.contains(agent))
            .map(|(_, c)| c.unread_for(agent))
            .sum();
        let lead = if is_lead { self.lead.unread_for(agent) } else { 0 };
        (group, dms, lead)
    }

    /// Removes and fires every waiter the predicate selects.
    fn wake_where(&mut self, reason_for: impl Fn(&Waiter) -> Option<WakeReason>) {
        let mut kept = Vec::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            match reason_for(&waiter) {
                Some(reason) => {
                    let _ = waiter.tx.send(reason);
                }
                None => kept.push(waiter),
            }
        }
        self.waiters = kept;
    }
}

/// All channels live behind one lock; appends and observer registration are
/// atomic with respect to each other, so a waiter can never miss the post
/// that should wake it.
pub struct MessageBus {
    inner: Mutex<BusInner>,
    waiter_seq: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
            waiter_seq: AtomicU64::new(0),
        }
    }

    // Group chat.

    pub fn group_post(&self, team: &str, from: &str, role: &str, text: &str) {
        let mut inner = self.inner.lock();
        inner
            .groups
            .entry(team.to_string())
            .or_default()
            .append(ChatMessage::new(from, role, text));
        let team = team.to_string();
        let from = from.to_string();
        inner.wake_where(|w| {
            (w.team == team && w.agent != from).then_some(WakeReason::Delivery)
        });
    }

    /// Unread messages for the caller, own posts excluded; advances the
    /// caller's cursor to the end of the channel.
    pub fn group_read(&self, team: &str, from: &str) -> Vec<ChatMessage> {
        let mut inner = self.inner.lock();
        inner
            .groups
            .get_mut(team)
            .map(|c| c.drain_for(from))
            .unwrap_or_default()
    }

    pub fn group_peek(&self, team: &str, from: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .groups
            .get(team)
            .map(|c| c.unread_for(from))
            .unwrap_or(0)
    }

    // Direct messages. The channel key is the unordered pair of ids, so both
    // directions land in the same channel.

    pub fn dm_send(&self, from: &str, to: &str, role: &str, text: &str) {
        let mut inner = self.inner.lock();
        inner
            .dms
            .entry(DmKey::new(from, to))
            .or_default()
            .append(ChatMessage::new(from, role, text));
        let to = to.to_string();
        inner.wake_where(|w| (w.agent == to).then_some(WakeReason::Delivery));
    }

    /// With a sender filter: unread from that channel only, advancing only
    /// that cursor. Without: unread across every channel the receiver
    /// participates in, merged by timestamp (stable within a channel), all
    /// cursors advanced.
    pub fn dm_read(&self, receiver: &str, from: Option<&str>) -> Vec<ChatMessage> {
        let mut inner = self.inner.lock();
        match from {
            Some(sender) => inner
                .dms
                .get_mut(&DmKey::new(receiver, sender))
                .map(|c| c.drain_for(receiver))
                .unwrap_or_default(),
            None => {
                let mut merged = Vec::new();
                for (key, channel) in inner.dms.iter_mut() {
                    if key.contains(receiver) {
                        merged.extend(channel.drain_for(receiver));
                    }
                }
                merged.sort_by_key(|m| m.at);
                merged
            }
        }
    }

    pub fn dm_peek(&self, receiver: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .dms
            .iter()
            .filter(|(key, _)| key.contains(receiver))
            .map(|(_, c)| c.unread_for(receiver))
            .sum()
    }

    // Cross-team lead channel (process-wide singleton).

    pub fn lead_post(&self, from: &str, role: &str, team_name: &str, text: &str) {
        let mut inner = self.inner.lock();
        let prefixed = format!("[{}] {}", team_name, text);
        inner.lead.append(ChatMessage::new(from, role, prefixed));
        let from = from.to_string();
        inner.wake_where(|w| (w.is_lead && w.agent != from).then_some(WakeReason::Delivery));
    }

    pub fn lead_read(&self, from: &str) -> Vec<ChatMessage> {
        self.inner.lock().lead.drain_for(from)
    }

    pub fn lead_peek(&self, from: &str) -> usize {
        self.inner.lock().lead.unread_for(from)
    }

    // Shared artifacts: append-only, read returns the full log.

    pub fn share(&self, team: &str, from: &str, text: &str) {
        let mut inner = self.inner.lock();
        inner
            .artifacts
            .entry(team.to_string())
            .or_default()
            .push(Artifact::new(from, text));
    }

    pub fn get_shared(&self, team: &str) -> Vec<Artifact> {
        self.inner
            .lock()
            .artifacts
            .get(team)
            .cloned()
            .unwrap_or_default()
    }

    // Wait primitive.

    /// Returns immediately when the caller already has unread messages;
    /// otherwise blocks until a relevant delivery, team dissolution, or
    /// timeout. The timeout is clamped to [1s, 60s].
    pub async fn wait(
        &self,
        team: &str,
        agent: &str,
        is_lead: bool,
        timeout_ms: Option<u64>,
    ) -> Result<WaitOutcome> {
        let timeout = Duration::from_millis(
            timeout_ms.unwrap_or(WAIT_DEFAULT_MS).clamp(WAIT_MIN_MS, WAIT_MAX_MS),
        );

        let waiter_id = self.waiter_seq.fetch_add(1, Ordering::Relaxed);
        let rx = {
            let mut inner = self.inner.lock();
            let (group, dms, lead) = inner.unread_counts(team, agent, is_lead);
            if group + dms + lead > 0 {
                return Ok(WaitOutcome::delivered(group, dms, lead));
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.push(Waiter {
                id: waiter_id,
                team: team.to_string(),
                agent: agent.to_string(),
                is_lead,
                tx,
            });
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(WakeReason::Delivery)) => {
                let inner = self.inner.lock();
                let (group, dms, lead) = inner.unread_counts(team, agent, is_lead);
                Ok(WaitOutcome::delivered(group, dms, lead))
            }
            Ok(Ok(WakeReason::Dissolved)) | Ok(Err(_)) => Ok(WaitOutcome::dissolved()),
            Err(_) => {
                let mut inner = self.inner.lock();
                let was_pending = {
                    let before = inner.waiters.len();
                    inner.waiters.retain(|w| w.id != waiter_id);
                    inner.waiters.len() < before
                };
                if was_pending {
                    Ok(WaitOutcome::timed_out())
                } else {
                    // A wake raced the timeout; report whatever arrived.
                    let (group, dms, lead) = inner.unread_counts(team, agent, is_lead);
                    Ok(WaitOutcome::delivered(group, dms, lead))
                }
            }
        }
    }

    // Teardown.

    /// Removes the team's group channel and artifacts, every DM channel with
    /// an endpoint among `agent_ids`, and those agents' lead cursors, then
    /// wakes any waiter pinned to the team or its members.
    pub fn dissolve_team(&self, team: &str, agent_ids: &[String]) {
        let mut inner = self.inner.lock();
        inner.groups.remove(team);
        inner.artifacts.remove(team);
        inner
            .dms
            .retain(|key, _| !agent_ids.iter().any(|id| key.contains(id)));
        for id in agent_ids {
            inner.lead.forget_reader(id);
        }

        let team = team.to_string();
        inner.wake_where(|w| {
            (w.team == team || agent_ids.contains(&w.agent)).then_some(WakeReason::Dissolved)
        });
        debug!(team = %team, members = agent_ids.len(), "Bus channels dissolved");
    }

    // Snapshot accessors for operator visibility and mission post-mortems.
    // These bypass cursors: they return full logs without consuming anything.

    pub fn group_snapshot(&self, team: &str) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .groups
            .get(team)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Full DM logs for channels whose both endpoints are in `agent_ids`,
    /// labeled by the canonical pair.
    pub fn dm_snapshot(&self, agent_ids: &[String]) -> HashMap<String, Vec<ChatMessage>> {
        let inner = self.inner.lock();
        inner
            .dms
            .iter()
            .filter(|(key, _)| {
                agent_ids.iter().any(|id| key.contains(id))
            })
            .map(|(key, c)| (key.label(), c.snapshot()))
            .collect()
    }

    /// Lead-channel posts authored by the given agents.
    pub fn lead_snapshot_by(&self, agent_ids: &[String]) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .lead
            .snapshot()
            .into_iter()
            .filter(|m| agent_ids.contains(&m.from))
            .collect()
    }
}
