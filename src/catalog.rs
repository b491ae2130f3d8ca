//! Validated, ordered view over the curriculum.
//!
//! All "where is the learner" questions are answered here as pure lookups over
//! the catalog and a completed-id set. Nothing in this module caches progress.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, instrument};

use crate::domain::{Level, Task};
use crate::error::CatalogError;

#[derive(Clone, Debug)]
pub struct Catalog {
    levels: Vec<Level>,
    level_index: HashMap<String, usize>,
    // task id -> (level position, task position)
    task_index: HashMap<String, (usize, usize)>,
}

impl Catalog {
    /// Validate and index a set of levels. Levels are sorted by ordinal.
    #[instrument(level = "debug", skip(levels), fields(levels = levels.len()))]
    pub fn from_levels(mut levels: Vec<Level>) -> Result<Self, CatalogError> {
        if levels.is_empty() {
            return Err(CatalogError::Empty);
        }
        levels.sort_by_key(|l| l.order);

        let mut level_index = HashMap::new();
        let mut task_index = HashMap::new();
        let mut by_order: HashMap<u32, String> = HashMap::new();

        for (li, level) in levels.iter_mut().enumerate() {
            if level_index.insert(level.id.clone(), li).is_some() {
                return Err(CatalogError::DuplicateLevel(level.id.clone()));
            }
            if let Some(first) = by_order.insert(level.order, level.id.clone()) {
                return Err(CatalogError::DuplicateOrder {
                    order: level.order,
                    first,
                    second: level.id.clone(),
                });
            }
            if level.tasks.is_empty() {
                return Err(CatalogError::EmptyLevel(level.id.clone()));
            }
            for (ti, task) in level.tasks.iter_mut().enumerate() {
                if task.level_id.is_empty() {
                    task.level_id = level.id.clone();
                } else if task.level_id != level.id {
                    return Err(CatalogError::ParentMismatch {
                        task: task.id.clone(),
                        declared: task.level_id.clone(),
                        actual: level.id.clone(),
                    });
                }
                if task.xp == 0 {
                    return Err(CatalogError::ZeroXp(task.id.clone()));
                }
                if task_index.insert(task.id.clone(), (li, ti)).is_some() {
                    return Err(CatalogError::DuplicateTask(task.id.clone()));
                }
            }
        }

        for level in &levels {
            for prerequisite in &level.prerequisites {
                if !level_index.contains_key(prerequisite) {
                    return Err(CatalogError::UnknownPrerequisite {
                        level: level.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        debug!(target: "progress", levels = levels.len(), tasks = task_index.len(), "Catalog indexed");
        Ok(Self { levels, level_index, task_index })
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, id: &str) -> Option<&Level> {
        self.level_index.get(id).map(|&i| &self.levels[i])
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.task_index
            .get(id)
            .map(|&(li, ti)| &self.levels[li].tasks[ti])
    }

    /// Position of a task inside its level (0-based).
    pub fn task_position(&self, id: &str) -> Option<usize> {
        self.task_index.get(id).map(|&(_, ti)| ti)
    }

    pub fn first_level(&self) -> &Level {
        // from_levels rejects empty catalogs and empty levels
        &self.levels[0]
    }

    pub fn first_task(&self) -> &Task {
        &self.first_level().tasks[0]
    }

    /// First task, in catalog order across all levels, not in `completed`.
    pub fn first_incomplete_task(&self, completed: &BTreeSet<String>) -> Option<&Task> {
        self.levels
            .iter()
            .flat_map(|l| l.tasks.iter())
            .find(|t| !completed.contains(&t.id))
    }

    /// The level whose ordinal is exactly one greater than `level_id`'s.
    pub fn level_after(&self, level_id: &str) -> Option<&Level> {
        let order = self.level(level_id)?.order;
        let next = order.checked_add(1)?;
        self.levels.iter().find(|l| l.order == next)
    }

    pub fn is_level_complete(&self, level_id: &str, completed: &BTreeSet<String>) -> bool {
        self.level(level_id)
            .map(|l| l.tasks.iter().all(|t| completed.contains(&t.id)))
            .unwrap_or(false)
    }

    pub fn task_count(&self) -> usize {
        self.task_index.len()
    }
}
