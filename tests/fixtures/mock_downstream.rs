//! Scripted downstream session for tests: responds by prompt pattern,
//! records every call in arrival order, and can fail, hang, or delay on
//! demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use squadron::agent::{AgentReply, Downstream, StartParams};
use squadron::error::{Result, SquadronError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Start,
    Reply,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub prompt: String,
    pub continuation: Option<String>,
}

#[derive(Clone)]
pub enum MockFailure {
    Remote(String),
    Transport(String),
}

impl MockFailure {
    fn to_error(&self) -> SquadronError {
        match self {
            Self::Remote(msg) => SquadronError::Remote(msg.clone()),
            Self::Transport(msg) => SquadronError::Transport(msg.clone()),
        }
    }
}

enum Behavior {
    Respond(String),
    RespondWith(Arc<dyn Fn(&str) -> String + Send + Sync>),
    Fail(MockFailure),
    Hang,
}

struct Rule {
    pattern: String,
    behavior: Behavior,
    remaining: Option<usize>,
}

pub struct MockDownstream {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    connected: AtomicBool,
    reconnects: AtomicUsize,
    continuation_seq: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    default_response: Mutex<String>,
}

impl Default for MockDownstream {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDownstream {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
            continuation_seq: AtomicUsize::new(0),
            delay: Mutex::new(None),
            default_response: Mutex::new("OK".to_string()),
        }
    }

    /// First matching rule wins; prompts without a match get the default.
    pub fn respond(&self, pattern: &str, response: impl Into<String>) {
        self.push_rule(pattern, Behavior::Respond(response.into()), None);
    }

    pub fn respond_with(
        &self,
        pattern: &str,
        f: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.push_rule(pattern, Behavior::RespondWith(Arc::new(f)), None);
    }

    pub fn fail(&self, pattern: &str, failure: MockFailure) {
        self.push_rule(pattern, Behavior::Fail(failure), None);
    }

    pub fn fail_times(&self, pattern: &str, failure: MockFailure, times: usize) {
        self.push_rule(pattern, Behavior::Fail(failure), Some(times));
    }

    pub fn hang(&self, pattern: &str) {
        self.push_rule(pattern, Behavior::Hang, None);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    fn push_rule(&self, pattern: &str, behavior: Behavior, remaining: Option<usize>) {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            behavior,
            remaining,
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.prompt.clone()).collect()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let action = {
            let mut rules = self.rules.lock();
            let mut found = None;
            for rule in rules.iter_mut() {
                if !prompt.contains(&rule.pattern) {
                    continue;
                }
                if let Some(remaining) = rule.remaining.as_mut() {
                    if *remaining == 0 {
                        continue;
                    }
                    *remaining -= 1;
                }
                found = Some(match &rule.behavior {
                    Behavior::Respond(text) => Action::Text(text.clone()),
                    Behavior::RespondWith(f) => Action::Text(f(prompt)),
                    Behavior::Fail(failure) => Action::Fail(failure.clone()),
                    Behavior::Hang => Action::Hang,
                });
                break;
            }
            found
        };

        match action {
            Some(Action::Text(text)) => Ok(text),
            Some(Action::Fail(failure)) => Err(failure.to_error()),
            Some(Action::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(self.default_response.lock().clone()),
        }
    }
}

enum Action {
    Text(String),
    Fail(MockFailure),
    Hang,
}

#[async_trait]
impl Downstream for MockDownstream {
    async fn start(&self, params: StartParams) -> Result<AgentReply> {
        self.calls.lock().push(RecordedCall {
            kind: CallKind::Start,
            prompt: params.prompt.clone(),
            continuation: None,
        });
        let content = self.answer(&params.prompt).await?;
        let n = self.continuation_seq.fetch_add(1, Ordering::SeqCst);
        Ok(AgentReply {
            continuation: Some(format!("cont-{}", n)),
            content,
        })
    }

    async fn reply(&self, continuation: &str, prompt: &str) -> Result<AgentReply> {
        self.calls.lock().push(RecordedCall {
            kind: CallKind::Reply,
            prompt: prompt.to_string(),
            continuation: Some(continuation.to_string()),
        });
        let content = self.answer(prompt).await?;
        Ok(AgentReply {
            continuation: Some(continuation.to_string()),
            content,
        })
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
