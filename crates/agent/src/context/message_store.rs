//! Per-swarm chat log.
//!
//! Every swarm has one ordered log. Messages tagged with a routine run id
//! belong to that run; untagged messages are swarm-wide and are visible to
//! every run.

use std::collections::HashMap;
use std::sync::RwLock;
use swarmclaw_core::message::Message;
use swarmclaw_core::swarm::SwarmId;

use super::token;

#[derive(Default)]
pub struct MessageStore {
    logs: RwLock<HashMap<SwarmId, Vec<Message>>>,
}

/// A history window cut to fit a token budget.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    /// Oldest first.
    pub messages: Vec<Message>,
    pub tokens: usize,
    /// Older messages left out because the budget ran out.
    pub dropped: usize,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, swarm_id: &SwarmId, message: Message) {
        self.logs
            .write()
            .unwrap()
            .entry(swarm_id.clone())
            .or_default()
            .push(message);
    }

    /// The full log of a swarm, oldest first.
    pub fn history(&self, swarm_id: &SwarmId) -> Vec<Message> {
        self.logs
            .read()
            .unwrap()
            .get(swarm_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages of one routine run plus swarm-wide messages.
    pub fn for_run(&self, swarm_id: &SwarmId, run_id: &str) -> Vec<Message> {
        self.history(swarm_id)
            .into_iter()
            .filter(|m| m.run_id.as_deref().is_none_or(|r| r == run_id))
            .collect()
    }

    /// The most recent messages that fit in `max_tokens`. With a run id,
    /// only messages visible to that run are considered.
    pub fn recent(&self, swarm_id: &SwarmId, run_id: Option<&str>, max_tokens: usize) -> HistoryWindow {
        let candidates = match run_id {
            Some(run) => self.for_run(swarm_id, run),
            None => self.history(swarm_id),
        };

        let mut window = HistoryWindow::default();
        let mut kept = Vec::new();
        for (i, message) in candidates.iter().enumerate().rev() {
            let cost = token::estimate_message_tokens(message);
            if window.tokens + cost > max_tokens {
                window.dropped = i + 1;
                break;
            }
            window.tokens += cost;
            kept.push(message.clone());
        }
        kept.reverse();
        window.messages = kept;
        window
    }

    pub fn len(&self, swarm_id: &SwarmId) -> usize {
        self.logs
            .read()
            .unwrap()
            .get(swarm_id)
            .map_or(0, Vec::len)
    }

    /// Drop a swarm's log. Returns how many messages were removed.
    pub fn clear(&self, swarm_id: &SwarmId) -> usize {
        self.logs
            .write()
            .unwrap()
            .remove(swarm_id)
            .map_or(0, |log| log.len())
    }
}
