//! Learner progress: the single source of truth for XP, streak and position.
//!
//! Every transition is a pure function `(catalog, state, event, now) -> state`.
//! The "next task" pointer is always recomputed from the full completed set;
//! it is never advanced incrementally.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::catalog::Catalog;
use crate::error::ProgressError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub learner_id: String,
    pub current_level_id: String,
    pub current_task_id: String,
    pub completed_task_ids: BTreeSet<String>,
    pub completed_level_ids: BTreeSet<String>,
    pub total_xp: u64,
    pub streak: u32,
    pub last_activity: DateTime<Utc>,
}

/// What a transition did to the state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The event was already reflected in the state; nothing changed.
    Duplicate,
    Applied {
        xp_awarded: u32,
        levels_completed: Vec<String>,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LearnerPhase {
    Onboarding,
    Progressing,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Locked,
    Available,
    Completed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Locked,
    Available,
    Completed,
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Whole days between two instants, rounded up (a partial day counts as one).
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    let elapsed = (later - earlier).num_milliseconds().abs();
    (elapsed + DAY_MS - 1) / DAY_MS
}

/// Activity continues a streak when the previous one is at most a day away.
pub fn continues_streak(last_activity: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    days_between(last_activity, now) <= 1
}

impl ProgressState {
    /// Fresh defaults for a first session.
    pub fn initial(learner_id: impl Into<String>, catalog: &Catalog, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.into(),
            current_level_id: catalog.first_level().id.clone(),
            current_task_id: catalog.first_task().id.clone(),
            completed_task_ids: BTreeSet::new(),
            completed_level_ids: BTreeSet::new(),
            total_xp: 0,
            streak: 0,
            last_activity: now,
        }
    }

    /// Passive streak evaluation on session resume. Returns `None` when nothing changes.
    pub fn resume(&self, now: DateTime<Utc>) -> Option<Self> {
        if self.streak > 0 && !continues_streak(self.last_activity, now) {
            let mut next = self.clone();
            next.streak = 0;
            Some(next)
        } else {
            None
        }
    }

    /// Credit a task. Re-completing a task returns the state unchanged.
    #[instrument(level = "debug", skip(self, catalog), fields(learner = %self.learner_id))]
    pub fn complete_task(
        &self,
        catalog: &Catalog,
        task_id: &str,
        xp_reward: u32,
        now: DateTime<Utc>,
    ) -> Result<(Self, Transition), ProgressError> {
        if catalog.task(task_id).is_none() {
            return Err(ProgressError::UnknownTask(task_id.to_string()));
        }
        if self.completed_task_ids.contains(task_id) {
            debug!(target: "progress", %task_id, "Task already completed; no-op");
            return Ok((self.clone(), Transition::Duplicate));
        }

        let mut next = self.clone();
        next.completed_task_ids.insert(task_id.to_string());
        next.total_xp += u64::from(xp_reward);
        next.streak = if continues_streak(self.last_activity, now) {
            self.streak + 1
        } else {
            1
        };
        next.last_activity = now;
        if let Some(task) = catalog.first_incomplete_task(&next.completed_task_ids) {
            next.current_task_id = task.id.clone();
        }

        // A successor whose tasks were all solved out of order is closed in the
        // same step, so the current level always has work left (or is the last).
        let mut levels_completed = Vec::new();
        loop {
            let current = next.current_level_id.clone();
            if !catalog.is_level_complete(&current, &next.completed_task_ids)
                || next.completed_level_ids.contains(&current)
            {
                break;
            }
            next.completed_level_ids.insert(current.clone());
            levels_completed.push(current.clone());
            match catalog.level_after(&current) {
                Some(after) => next.current_level_id = after.id.clone(),
                None => break,
            }
        }

        debug!(
            target: "progress",
            %task_id,
            xp_reward,
            total_xp = next.total_xp,
            streak = next.streak,
            levels_completed = ?levels_completed,
            "Task completed"
        );
        Ok((
            next,
            Transition::Applied {
                xp_awarded: xp_reward,
                levels_completed,
            },
        ))
    }

    /// Mark a level complete without going through its tasks.
    #[instrument(level = "debug", skip(self, catalog), fields(learner = %self.learner_id))]
    pub fn complete_level(
        &self,
        catalog: &Catalog,
        level_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Self, Transition), ProgressError> {
        if catalog.level(level_id).is_none() {
            return Err(ProgressError::UnknownLevel(level_id.to_string()));
        }
        if self.completed_level_ids.contains(level_id) {
            return Ok((self.clone(), Transition::Duplicate));
        }

        let mut next = self.clone();
        next.completed_level_ids.insert(level_id.to_string());
        if let Some(after) = catalog.level_after(level_id) {
            next.current_level_id = after.id.clone();
        }
        next.last_activity = now;

        Ok((
            next,
            Transition::Applied {
                xp_awarded: 0,
                levels_completed: vec![level_id.to_string()],
            },
        ))
    }

    pub fn phase(&self) -> LearnerPhase {
        if self.completed_task_ids.is_empty() && self.completed_level_ids.is_empty() {
            LearnerPhase::Onboarding
        } else {
            LearnerPhase::Progressing
        }
    }

    pub fn task_status(&self, catalog: &Catalog, task_id: &str) -> Option<TaskStatus> {
        let task = catalog.task(task_id)?;
        if self.completed_task_ids.contains(task_id) {
            return Some(TaskStatus::Completed);
        }
        if task_id == self.current_task_id {
            return Some(TaskStatus::Available);
        }
        let position = catalog.task_position(task_id)?;
        if position == 0 {
            return Some(TaskStatus::Available);
        }
        let level = catalog.level(&task.level_id)?;
        let previous = &level.tasks[position - 1].id;
        Some(if self.completed_task_ids.contains(previous) {
            TaskStatus::Available
        } else {
            TaskStatus::Locked
        })
    }

    pub fn level_status(&self, catalog: &Catalog, level_id: &str) -> Option<LevelStatus> {
        let level = catalog.level(level_id)?;
        if self.completed_level_ids.contains(level_id) {
            return Some(LevelStatus::Completed);
        }
        if level_id == self.current_level_id {
            return Some(LevelStatus::Available);
        }
        let blocked = level
            .prerequisites
            .iter()
            .any(|p| !self.completed_level_ids.contains(p));
        Some(if blocked {
            LevelStatus::Locked
        } else {
            LevelStatus::Available
        })
    }

    /// (completed, total) tasks of a level.
    pub fn level_counts(&self, catalog: &Catalog, level_id: &str) -> Option<(usize, usize)> {
        let level = catalog.level(level_id)?;
        let done = level
            .task_ids()
            .filter(|id| self.completed_task_ids.contains(*id))
            .count();
        Some((done, level.tasks.len()))
    }
}
