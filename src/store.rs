//! Progress persistence and per-learner serialization.
//!
//! `SnapshotStore` is the durable key -> snapshot collaborator (overwrite
//! semantics, read-your-writes). `ProgressBook` owns the live states, runs every
//! transition for a learner under that learner's lock, and saves a full
//! snapshot after each applied transition. Idle, saved learners are dropped
//! from memory once the book holds more than its limit and reloaded on demand.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::ProgressConfig;
use crate::error::{ProgressError, StoreError};
use crate::progress::{ProgressState, Transition};
use crate::util::encode_id;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError>;
    async fn save(&self, snapshot: &ProgressState) -> Result<(), StoreError>;
    fn describe(&self) -> String;
}

/// Process-local store; progress is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, ProgressState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError> {
        Ok(self.snapshots.read().await.get(learner_id).cloned())
    }

    async fn save(&self, snapshot: &ProgressState) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.learner_id.clone(), snapshot.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// One pretty-printed JSON file per learner under `dir`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, learner_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(learner_id)))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self, learner_id: &str) -> Result<Option<ProgressState>, StoreError> {
        let path = self.path_for(learner_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: ProgressState = serde_json::from_slice(&bytes)?;
        if snapshot.learner_id != learner_id {
            return Err(StoreError::Mismatch {
                expected: learner_id.to_string(),
                found: snapshot.learner_id,
            });
        }
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &ProgressState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&snapshot.learner_id);
        let body = serde_json::to_vec_pretty(snapshot)?;

        // Readers see the old file or the new one, never a partial write.
        let tmp = self.dir.join(format!(".{}.{}.tmp", encode_id(&snapshot.learner_id), Uuid::new_v4()));
        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json files in {}", self.dir.display())
    }
}

/// One learner's live state. `unsaved` marks a state whose last save failed;
/// such a slot is never evicted.
#[derive(Default)]
struct Session {
    state: Option<ProgressState>,
    unsaved: bool,
}

type Slot = Arc<Mutex<Session>>;

struct Cached {
    slot: Slot,
    touched: u64,
}

/// Live progress for the learners this process has seen recently.
pub struct ProgressBook {
    catalog: Arc<Catalog>,
    store: Arc<dyn SnapshotStore>,
    slots: StdMutex<HashMap<String, Cached>>,
    clock: AtomicU64,
    limit: usize,
}

impl ProgressBook {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn SnapshotStore>) -> Self {
        Self::with_limit(catalog, store, ProgressConfig::default().max_cached_learners)
    }

    pub fn with_limit(catalog: Arc<Catalog>, store: Arc<dyn SnapshotStore>, limit: usize) -> Self {
        info!(target: "progress", store = %store.describe(), limit, "Progress book ready");
        Self {
            catalog,
            store,
            slots: StdMutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Learners currently held in memory.
    pub fn cached(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn slot(&self, learner_id: &str) -> Slot {
        let touched = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(cached) = slots.get_mut(learner_id) {
            cached.touched = touched;
            return cached.slot.clone();
        }
        if slots.len() >= self.limit {
            self.evict_idle(&mut slots);
        }
        let slot = Slot::default();
        slots.insert(learner_id.to_string(), Cached { slot: slot.clone(), touched });
        slot
    }

    /// Drop least recently used slots that nobody holds and whose state is
    /// saved, until there is room for one more.
    fn evict_idle(&self, slots: &mut HashMap<String, Cached>) {
        let mut idle: Vec<(u64, String)> = slots
            .iter()
            .filter(|(_, c)| Arc::strong_count(&c.slot) == 1)
            .filter(|(_, c)| c.slot.try_lock().map(|s| !s.unsaved).unwrap_or(false))
            .map(|(id, c)| (c.touched, id.clone()))
            .collect();
        idle.sort_unstable();

        let excess = slots.len() + 1 - self.limit;
        let evicted = idle.len().min(excess);
        for (_, id) in idle.into_iter().take(evicted) {
            slots.remove(&id);
        }
        if evicted < excess {
            warn!(target: "progress", cached = slots.len(), limit = self.limit, "Progress cache over its limit; busy or unsaved learners kept");
        } else {
            debug!(target: "progress", evicted, "Idle learners evicted");
        }
    }

    /// Load (or create) the learner's state on first touch, then apply the
    /// passive streak rule. Runs on every entry, so a state kept warm across
    /// a long gap is reset as well. Must be called with the slot locked.
    async fn session<'a>(
        &self,
        learner_id: &str,
        session: &'a mut Session,
        now: DateTime<Utc>,
    ) -> Result<&'a mut ProgressState, ProgressError> {
        let state = match session.state.take() {
            Some(state) => state,
            None => {
                let loaded = self
                    .store
                    .load(learner_id)
                    .await
                    .map_err(|e| ProgressError::Unavailable(e.to_string()))?;
                match loaded {
                    Some(s) => {
                        debug!(target: "progress", %learner_id, total_xp = s.total_xp, "Progress restored");
                        s
                    }
                    None => {
                        info!(target: "progress", %learner_id, "New learner; starting from defaults");
                        ProgressState::initial(learner_id, &self.catalog, now)
                    }
                }
            }
        };
        let state = match state.resume(now) {
            Some(reset) => {
                info!(target: "progress", %learner_id, "Streak lapsed; reset on resume");
                session.unsaved = !self.emit(&reset).await;
                reset
            }
            None => state,
        };
        Ok(session.state.insert(state))
    }

    /// Persist a snapshot. A failed save keeps the in-memory state
    /// authoritative; returns whether the save went through.
    async fn emit(&self, snapshot: &ProgressState) -> bool {
        match self.store.save(snapshot).await {
            Ok(()) => true,
            Err(e) => {
                error!(target: "progress", learner_id = %snapshot.learner_id, error = %e, "Snapshot save failed");
                false
            }
        }
    }

    pub async fn get(&self, learner_id: &str, now: DateTime<Utc>) -> Result<ProgressState, ProgressError> {
        let slot = self.slot(learner_id);
        let mut session = slot.lock().await;
        Ok(self.session(learner_id, &mut session, now).await?.clone())
    }

    /// Credit a task with its catalog XP.
    #[instrument(level = "info", skip(self, now))]
    pub async fn complete_task(
        &self,
        learner_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ProgressState, Transition), ProgressError> {
        let xp = self
            .catalog
            .task(task_id)
            .map(|t| t.xp)
            .ok_or_else(|| ProgressError::UnknownTask(task_id.to_string()))?;

        let slot = self.slot(learner_id);
        let mut session = slot.lock().await;
        let state = self.session(learner_id, &mut session, now).await?;
        let (next, transition) = state.complete_task(&self.catalog, task_id, xp, now)?;
        let saved = self.commit(state, next, &transition).await;
        let state = state.clone();
        if let Some(saved) = saved {
            session.unsaved = !saved;
        }
        Ok((state, transition))
    }

    #[instrument(level = "info", skip(self, now))]
    pub async fn complete_level(
        &self,
        learner_id: &str,
        level_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ProgressState, Transition), ProgressError> {
        let slot = self.slot(learner_id);
        let mut session = slot.lock().await;
        let state = self.session(learner_id, &mut session, now).await?;
        let (next, transition) = state.complete_level(&self.catalog, level_id, now)?;
        let saved = self.commit(state, next, &transition).await;
        let state = state.clone();
        if let Some(saved) = saved {
            session.unsaved = !saved;
        }
        Ok((state, transition))
    }

    /// Apply an accepted transition. Returns whether its snapshot was saved,
    /// or `None` when nothing changed.
    async fn commit(&self, state: &mut ProgressState, next: ProgressState, transition: &Transition) -> Option<bool> {
        match transition {
            Transition::Duplicate => {
                debug!(target: "progress", learner_id = %state.learner_id, "Duplicate completion absorbed");
                None
            }
            Transition::Applied { xp_awarded, levels_completed } => {
                info!(
                    target: "progress",
                    learner_id = %next.learner_id,
                    xp_awarded,
                    total_xp = next.total_xp,
                    streak = next.streak,
                    levels_completed = ?levels_completed,
                    "Progress updated"
                );
                *state = next;
                Some(self.emit(state).await)
            }
        }
    }
}
