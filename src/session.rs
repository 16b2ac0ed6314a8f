//! In-process conversation memory.
//!
//! Sessions are keyed by caller-chosen ids and created on first use. The
//! map lock is only held to look up or insert a handle; each session has
//! its own async mutex, so questions in one session never wait on another.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use docchat_core::models::{Session, Turn};

/// Shared handle to one session.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Oldest turns are dropped past this count. 0 = unbounded.
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(handle) = self.read_map().get(id) {
            return handle.clone();
        }
        let mut map = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        map.entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::new(id))))
            .clone()
    }

    pub async fn append(&self, id: &str, turn: Turn) {
        let handle = self.get_or_create(id);
        let mut session = handle.lock().await;
        session.push_turn(turn, self.max_turns);
    }

    /// Snapshot of a session's turns in chronological order.
    pub async fn history(&self, id: &str) -> Vec<Turn> {
        let handle = self.read_map().get(id).cloned();
        match handle {
            Some(handle) => handle.lock().await.turns.clone(),
            None => Vec::new(),
        }
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_map().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(50)
    }
}
