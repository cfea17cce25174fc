//! Conversation sessions with bounded history
//!
//! Each session keeps the most recent N messages plus free-form metadata.
//! The store hands out `Arc<Session>` so sessions are never deleted implicitly.

use crate::models::Message;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Identity of the user behind a session
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
    pub platform: String,
}

struct SessionState {
    messages: VecDeque<Message>,
    updated_at: DateTime<Utc>,
    user: UserInfo,
    metadata: HashMap<String, Value>,
}

/// A conversation session with bounded message history.
///
/// History capacity is fixed at creation; appending past capacity drops the
/// oldest messages first.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    max_messages: usize,
    state: RwLock<SessionState>,
    // Serializes whole chat turns on this session
    turn_lock: Mutex<()>,
}

impl Session {
    pub fn new(id: impl Into<String>, max_messages: usize) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            max_messages,
            state: RwLock::new(SessionState {
                messages: VecDeque::new(),
                updated_at: Utc::now(),
                user: UserInfo::default(),
                metadata: HashMap::new(),
            }),
            turn_lock: Mutex::new(()),
        }
    }

    /// Acquire the exclusive turn lock. Held by `Agent::chat` for the whole
    /// turn so concurrent calls on one session queue instead of interleaving.
    pub async fn lock_turn(&self) -> MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }

    /// Append a message, dropping the oldest if over capacity.
    pub async fn add_message(&self, msg: Message) {
        let mut state = self.state.write().await;
        state.messages.push_back(msg);
        while state.messages.len() > self.max_messages {
            state.messages.pop_front();
        }
        state.updated_at = Utc::now();
    }

    /// Returns an independent copy of the history, never the live sequence.
    pub async fn messages(&self) -> Vec<Message> {
        let state = self.state.read().await;
        state.messages.iter().cloned().collect()
    }

    /// Returns the N most recent messages in insertion order.
    pub async fn recent_messages(&self, n: usize) -> Vec<Message> {
        let state = self.state.read().await;
        let skip = state.messages.len().saturating_sub(n);
        state.messages.iter().skip(skip).cloned().collect()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.messages.clear();
        state.updated_at = Utc::now();
    }

    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().await.updated_at
    }

    pub async fn set_user_info(&self, user_id: &str, user_name: &str, platform: &str) {
        let mut state = self.state.write().await;
        state.user = UserInfo {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            platform: platform.to_string(),
        };
        state.updated_at = Utc::now();
    }

    pub async fn user_info(&self) -> UserInfo {
        self.state.read().await.user.clone()
    }

    pub async fn set_metadata(&self, key: &str, value: Value) {
        let mut state = self.state.write().await;
        state.metadata.insert(key.to_string(), value);
        state.updated_at = Utc::now();
    }

    pub async fn get_metadata(&self, key: &str) -> Option<Value> {
        self.state.read().await.metadata.get(key).cloned()
    }
}

/// Store mapping session id → session. Creation is guarded by the store's
/// own lock; per-session state has its own lock inside `Session`.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_messages: usize,
}

impl SessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages,
        }
    }

    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id, self.max_messages)))
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }
}
