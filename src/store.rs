//! Session persistence.
//!
//! [`SessionStore`] is the storage contract; [`MemoryStore`] keeps sessions as
//! JSON text so a snapshot takes the same serde path a durable store would.
//! [`PersistenceWriter`] runs writes on a background task: callers mark the
//! session dirty with the latest snapshot and the writer coalesces bursts
//! behind a debounce timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::PersistenceConfig;
use crate::state::{GameState, GameStatus};

/// Session code alphabet: no `I`, `O`, `0` or `1`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LENGTH: usize = 6;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to encode session: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Storage backend failed: {0}")]
    Backend(String),
}

/// Index record for a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub round: u8,
    pub status: GameStatus,
    pub detective_count: u8,
    pub host_name: String,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>, code: impl Into<String>, host_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            code: code.into(),
            created_at: now,
            updated_at: now,
            round: 0,
            status: GameStatus::Setup,
            detective_count: 0,
            host_name: host_name.into(),
        }
    }

    /// Copy the summary fields from a game snapshot.
    pub fn refresh(&mut self, state: &GameState) {
        self.updated_at = Utc::now();
        self.round = state.current_round;
        self.status = state.status;
        self.detective_count = u8::try_from(state.detective_count()).unwrap_or(u8::MAX);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    meta: SessionMeta,
    state: GameState,
}

/// Storage contract for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session.
    async fn put(&self, meta: &SessionMeta, state: &GameState) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<(SessionMeta, GameState)>, StoreError>;

    async fn get_by_code(&self, code: &str)
        -> Result<Option<(SessionMeta, GameState)>, StoreError>;

    /// Returns whether a session was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionMeta>, StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(text: &str) -> Result<StoredSession, StoreError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put(&self, meta: &SessionMeta, state: &GameState) -> Result<(), StoreError> {
        let text = serde_json::to_string(&StoredSession {
            meta: meta.clone(),
            state: state.clone(),
        })?;
        self.sessions.write().await.insert(meta.id.clone(), text);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<(SessionMeta, GameState)>, StoreError> {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(text) => {
                let stored = Self::decode(text)?;
                Ok(Some((stored.meta, stored.state)))
            }
            None => Ok(None),
        }
    }

    async fn get_by_code(
        &self,
        code: &str,
    ) -> Result<Option<(SessionMeta, GameState)>, StoreError> {
        let sessions = self.sessions.read().await;
        for text in sessions.values() {
            let stored = Self::decode(text)?;
            if stored.meta.code == code {
                return Ok(Some((stored.meta, stored.state)));
            }
        }
        Ok(None)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut metas = sessions
            .values()
            .map(|text| Self::decode(text).map(|s| s.meta))
            .collect::<Result<Vec<_>, _>>()?;
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }
}

/// `sy-<millis>-<6 base36>`
pub fn generate_session_id() -> String {
    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("sy-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Six characters a player can read aloud without confusion.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Default)]
struct Pending {
    generation: u64,
    snapshot: Option<(SessionMeta, GameState)>,
}

/// Background writer that coalesces snapshots behind a debounce timer.
#[derive(Debug)]
pub struct PersistenceWriter {
    tx: watch::Sender<Pending>,
    task: JoinHandle<()>,
}

impl PersistenceWriter {
    pub fn from_config(store: Arc<dyn SessionStore>, config: &PersistenceConfig) -> Self {
        Self::spawn(store, config.debounce())
    }

    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn SessionStore>, debounce: Duration) -> Self {
        let (tx, mut rx) = watch::channel(Pending::default());
        let task = tokio::spawn(async move {
            let mut written = 0u64;
            while rx.changed().await.is_ok() {
                tokio::time::sleep(debounce).await;
                let pending = rx.borrow_and_update().clone();
                written = write(store.as_ref(), pending, written).await;
            }
            let pending = rx.borrow().clone();
            write(store.as_ref(), pending, written).await;
        });
        Self { tx, task }
    }

    /// Record the latest snapshot; replaces any snapshot not yet written.
    pub fn mark_dirty(&self, meta: &SessionMeta, state: &GameState) {
        self.tx.send_modify(|pending| {
            pending.generation += 1;
            pending.snapshot = Some((meta.clone(), state.clone()));
        });
    }

    /// Write anything still pending and stop the task.
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "persistence task ended abnormally");
        }
    }
}

/// Write `pending` unless it was already written; returns the written generation.
async fn write(store: &dyn SessionStore, pending: Pending, written: u64) -> u64 {
    if pending.generation == written {
        return written;
    }
    let Some((meta, state)) = pending.snapshot else {
        return written;
    };
    match store.put(&meta, &state).await {
        Ok(()) => {
            debug!(session = %meta.id, generation = pending.generation, "session persisted");
        }
        Err(e) => {
            warn!(session = %meta.id, error = %e, "failed to persist session");
        }
    }
    pending.generation
}
