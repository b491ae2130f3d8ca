//! Catalog entities: levels, tasks and their test cases.
//!
//! These are read-only to the pipeline. The catalog collaborator owns them; we
//! only look things up and derive positions from them.

use serde::{Deserialize, Serialize};

/// How hard a task is meant to be.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Beginner,
  Intermediate,
  Advanced,
}
impl Default for Difficulty {
  fn default() -> Self { Difficulty::Beginner }
}

/// One expected behavior of a task. `input` is fed to stdin when present.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
  #[serde(default)] pub input: Option<String>,
  pub expected_output: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub description_ar: String,
}

/// A single exercise.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  /// Filled from the enclosing level when omitted in config.
  #[serde(default)] pub level_id: String,
  pub title: String,
  #[serde(default)] pub title_ar: String,
  pub description: String,
  #[serde(default)] pub description_ar: String,
  #[serde(default)] pub difficulty: Difficulty,
  pub xp: u32,
  #[serde(default)] pub starter_code: String,
  #[serde(default)] pub expected_output: Option<String>,
  #[serde(default)] pub test_cases: Vec<TestCase>,
  #[serde(default)] pub hints: Vec<String>,
  #[serde(default)] pub hints_ar: Vec<String>,
}

/// An ordered group of tasks. `order` is unique across the catalog.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Level {
  pub id: String,
  pub order: u32,
  pub title: String,
  #[serde(default)] pub title_ar: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub description_ar: String,
  #[serde(default)] pub xp: u32,
  pub tasks: Vec<Task>,
  #[serde(default)] pub prerequisites: Vec<String>,
}

impl Level {
  pub fn task_ids(&self) -> impl Iterator<Item = &str> {
    self.tasks.iter().map(|t| t.id.as_str())
  }
}
