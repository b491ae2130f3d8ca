//! Per-task code drafts and the verdict shown against them.
//!
//! Each `(learner, task)` pair has a revision counter. Changing the code bumps
//! it and drops the displayed verdict; a verdict is only stored when it was
//! produced for the revision that is still current. The book holds a bounded
//! number of learners; the least recently active one is forgotten first.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::config::ProgressConfig;
use crate::verdict::Verdict;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub code: String,
    pub revision: u64,
    pub verdict: Option<Verdict>,
}

#[derive(Default)]
struct LearnerDrafts {
    tasks: HashMap<String, Draft>,
    touched: u64,
}

#[derive(Default)]
struct Shelf {
    learners: HashMap<String, LearnerDrafts>,
    clock: u64,
}

impl Shelf {
    fn learner(&mut self, learner_id: &str, limit: usize) -> &mut LearnerDrafts {
        self.clock += 1;
        if !self.learners.contains_key(learner_id) && self.learners.len() >= limit {
            let oldest = self
                .learners
                .iter()
                .min_by_key(|(_, l)| l.touched)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.learners.remove(&oldest);
                debug!(target: "verdict", learner_id = %oldest, "Drafts of idle learner evicted");
            }
        }
        let entry = self.learners.entry(learner_id.to_string()).or_default();
        entry.touched = self.clock;
        entry
    }
}

pub struct DraftBook {
    shelf: Mutex<Shelf>,
    limit: usize,
}

impl Default for DraftBook {
    fn default() -> Self {
        Self::with_capacity(ProgressConfig::default().max_cached_learners)
    }
}

impl DraftBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A book that keeps drafts for at most `learners` learners.
    pub fn with_capacity(learners: usize) -> Self {
        Self {
            shelf: Mutex::new(Shelf::default()),
            limit: learners.max(1),
        }
    }

    /// Learners with drafts in memory.
    pub fn learners(&self) -> usize {
        self.shelf.lock().unwrap_or_else(|p| p.into_inner()).learners.len()
    }

    fn with<R>(&self, learner_id: &str, task_id: &str, f: impl FnOnce(&mut Draft) -> R) -> R {
        let mut shelf = self.shelf.lock().unwrap_or_else(|p| p.into_inner());
        let draft = shelf
            .learner(learner_id, self.limit)
            .tasks
            .entry(task_id.to_string())
            .or_default();
        f(draft)
    }

    /// Record the editor contents. Returns the (possibly new) revision.
    pub fn update(&self, learner_id: &str, task_id: &str, code: &str) -> u64 {
        self.with(learner_id, task_id, |d| {
            if d.code != code || d.revision == 0 {
                d.code = code.to_string();
                d.revision += 1;
                if d.verdict.take().is_some() {
                    debug!(target: "verdict", %learner_id, %task_id, revision = d.revision, "Code changed; verdict invalidated");
                }
            }
            d.revision
        })
    }

    /// A new run supersedes any verdict on display.
    pub fn clear_verdict(&self, learner_id: &str, task_id: &str) {
        let mut shelf = self.shelf.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(d) = shelf.learners.get_mut(learner_id).and_then(|l| l.tasks.get_mut(task_id)) {
            d.verdict = None;
        }
    }

    /// Store `verdict` if `revision` is still current. Returns whether it was kept.
    pub fn record_verdict(&self, learner_id: &str, task_id: &str, revision: u64, verdict: Verdict) -> bool {
        self.with(learner_id, task_id, |d| {
            if d.revision == revision {
                d.verdict = Some(verdict);
                true
            } else {
                debug!(target: "verdict", %learner_id, %task_id, revision, current = d.revision, "Stale verdict dropped");
                false
            }
        })
    }

    pub fn get(&self, learner_id: &str, task_id: &str) -> Option<Draft> {
        let shelf = self.shelf.lock().unwrap_or_else(|p| p.into_inner());
        shelf.learners.get(learner_id)?.tasks.get(task_id).cloned()
    }
}
