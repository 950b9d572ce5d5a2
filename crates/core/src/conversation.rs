//! Per-session conversation memory with fixed upper bounds on both the
//! number of remembered turns and the number of live sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl Conversation {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, turn: ChatTurn) {
        if self.max_turns == 0 {
            return;
        }
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Oldest first.
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

struct Session {
    conversation: Conversation,
    last_used: u64,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, Session>,
    clock: u64,
}

pub struct SessionStore {
    inner: Mutex<Sessions>,
    max_turns: usize,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Sessions::default()),
            max_turns,
            max_sessions: max_sessions.max(1),
        }
    }

    /// History for `session_id`, empty for unknown sessions.
    pub async fn history(&self, session_id: &str) -> Vec<ChatTurn> {
        let mut sessions = self.inner.lock().await;
        sessions.clock += 1;
        let now = sessions.clock;
        match sessions.by_id.get_mut(session_id) {
            Some(session) => {
                session.last_used = now;
                session.conversation.turns()
            }
            None => Vec::new(),
        }
    }

    pub async fn record(&self, session_id: &str, turn: ChatTurn) {
        let mut sessions = self.inner.lock().await;
        sessions.clock += 1;
        let now = sessions.clock;

        if !sessions.by_id.contains_key(session_id) && sessions.by_id.len() >= self.max_sessions {
            let oldest = sessions
                .by_id
                .iter()
                .min_by_key(|(_, session)| session.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                sessions.by_id.remove(&oldest);
            }
        }

        let max_turns = self.max_turns;
        let session = sessions
            .by_id
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                conversation: Conversation::new(max_turns),
                last_used: now,
            });
        session.last_used = now;
        session.conversation.push(turn);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_keeps_only_recent_turns() {
        let mut conversation = Conversation::new(2);
        conversation.push(ChatTurn::new("q1", "a1"));
        conversation.push(ChatTurn::new("q2", "a2"));
        conversation.push(ChatTurn::new("q3", "a3"));

        let questions: Vec<String> = conversation
            .turns()
            .into_iter()
            .map(|turn| turn.question)
            .collect();
        assert_eq!(questions, vec!["q2", "q3"]);
    }

    #[test]
    fn zero_capacity_remembers_nothing() {
        let mut conversation = Conversation::new(0);
        conversation.push(ChatTurn::new("q", "a"));
        assert!(conversation.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new(5, 10);
        store.record("a", ChatTurn::new("wall?", "concrete")).await;

        assert_eq!(store.history("a").await.len(), 1);
        assert!(store.history("b").await.is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_session_is_evicted() {
        let store = SessionStore::new(5, 2);
        store.record("a", ChatTurn::new("q", "a")).await;
        store.record("b", ChatTurn::new("q", "a")).await;
        store.history("a").await;
        store.record("c", ChatTurn::new("q", "a")).await;

        assert_eq!(store.len().await, 2);
        assert_eq!(store.history("a").await.len(), 1);
        assert!(store.history("b").await.is_empty());
        assert_eq!(store.history("c").await.len(), 1);
    }
}
