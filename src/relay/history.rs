//! Per-(user, chat) conversation history.
//!
//! Each key owns a fixed-size window of recent turns; appending past
//! capacity drops the oldest turn. Windows are created lazily on first
//! lookup and live for the process lifetime.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as WindowMutex;

use crate::openai::Message;

/// Identifies one conversation: a user within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub user_id: i64,
    pub chat_id: i64,
}

/// Bounded, ordered sequence of turns with FIFO eviction.
pub struct HistoryWindow {
    turns: VecDeque<Message>,
    capacity: usize,
}

impl HistoryWindow {
    fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, dropping the oldest one if the window is full.
    pub fn push(&mut self, turn: Message) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Process-wide map of conversation windows.
///
/// The outer lock guards only the map and is never held across an await.
/// Each window has its own async mutex so one key's read-modify-write
/// sequence can span the completion call without blocking other keys.
pub struct HistoryStore {
    windows: Mutex<HashMap<HistoryKey, Arc<WindowMutex<HistoryWindow>>>>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// The window for `key`, created empty on first lookup.
    pub fn get_or_create(&self, key: HistoryKey) -> Arc<WindowMutex<HistoryWindow>> {
        let mut windows = self.windows.lock().expect("history map lock poisoned");
        windows
            .entry(key)
            .or_insert_with(|| Arc::new(WindowMutex::new(HistoryWindow::new(self.capacity))))
            .clone()
    }

    /// Append a turn to the window for `key`.
    pub async fn append(&self, key: HistoryKey, turn: Message) {
        self.get_or_create(key).lock().await.push(turn);
    }

    /// The current contents of the window for `key`, oldest first.
    pub async fn snapshot(&self, key: HistoryKey) -> Vec<Message> {
        self.get_or_create(key).lock().await.snapshot()
    }
}
