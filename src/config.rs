//! Application configuration: TOML file + environment overrides.
//!
//! The file is optional (`ATHAR_CONFIG_PATH`). Every section has defaults, so an
//! empty file and no file at all behave the same. Environment variables win
//! over the file for the handful of deployment knobs listed in `apply_env`.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Level;
use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub sandbox: SandboxConfig,
  pub reasoning: ReasoningConfig,
  pub prompts: Prompts,
  pub progress: ProgressConfig,
  /// Replaces the built-in curriculum when non-empty.
  pub levels: Vec<Level>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
  pub python_bin: String,
  pub init_timeout_ms: u64,
  pub run_timeout_ms: u64,
  /// Start the interpreter in the background at startup.
  pub warm_on_start: bool,
  /// stdout + stderr bytes kept per run; a run that prints more is stopped.
  pub max_output_bytes: usize,
  /// Largest accepted source, in bytes.
  pub max_code_bytes: usize,
  pub memory_limit_mb: u64,
  pub cpu_limit_secs: u64,
  /// When started as root, run the worker as `unprivileged_uid` instead.
  pub drop_privileges: bool,
  pub unprivileged_uid: u32,
}

impl SandboxConfig {
  pub fn worker_uid(&self) -> Option<u32> {
    self.drop_privileges.then_some(self.unprivileged_uid)
  }
}

impl Default for SandboxConfig {
  fn default() -> Self {
    Self {
      python_bin: "python3".into(),
      init_timeout_ms: 15_000,
      run_timeout_ms: 5_000,
      warm_on_start: true,
      max_output_bytes: 256 * 1024,
      max_code_bytes: 64 * 1024,
      memory_limit_mb: 512,
      cpu_limit_secs: 30,
      drop_privileges: true,
      unprivileged_uid: 65534,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
  /// Read from OPENAI_API_KEY; never put it in the file.
  #[serde(skip)]
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
  pub verdict_temperature: f32,
  pub hint_temperature: f32,
  pub request_timeout_secs: u64,
}

impl Default for ReasoningConfig {
  fn default() -> Self {
    Self {
      api_key: None,
      base_url: "https://api.openai.com/v1".into(),
      model: "gpt-4o-mini".into(),
      verdict_temperature: 0.2,
      hint_temperature: 0.7,
      request_timeout_secs: 20,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
  /// Directory for per-learner JSON snapshots. In-memory only when unset.
  pub data_dir: Option<String>,
  /// Learners kept in memory (progress slots and drafts) before idle ones are evicted.
  pub max_cached_learners: usize,
}

impl Default for ProgressConfig {
  fn default() -> Self {
    Self { data_dir: None, max_cached_learners: 10_000 }
  }
}

/// Prompts sent to the reasoning endpoint. `{placeholders}` are filled per call.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub verdict_system: String,
  pub verdict_user_template: String,
  pub hint_system: String,
  pub hint_user_template: String,
  pub hint_user_template_with_code: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      verdict_system: "You are a fair and encouraging Python code evaluator. Decide whether a student's solution \
solves the given problem.\n\
Judge functional and logical correctness, not exact output strings. Minor formatting differences \
(spacing, punctuation, slightly different wording of printed text) are acceptable.\n\
Mark the solution INCORRECT only if it has syntax or runtime errors, the logic is fundamentally wrong, \
it does not address the problem, or critical functionality is missing.\n\
Respond ONLY with a JSON object of this exact shape:\n\
{\"isCorrect\": boolean, \"feedback\": \"English feedback\", \"feedbackAr\": \"Arabic translation of the feedback\", \
\"suggestions\": [\"English suggestions\"], \"suggestionsAr\": [\"Arabic suggestions\"], \"confidence\": number between 0 and 1}".into(),
      verdict_user_template: "Problem statement: {problem_en}\n\
Problem statement (Arabic): {problem_ar}\n\
{expected_output}{starter_code}\
Student's solution:\n```python\n{code}\n```\n\n\
Does this solution correctly solve the problem? Focus on logic and approach, not exact string matching. \
Respond ONLY with the JSON object.".into(),
      hint_system: "You are a helpful programming tutor. Give one brief hint in English and Arabic without revealing \
the full solution. Respond in JSON: {\"hint\": \"English hint\", \"hintAr\": \"Arabic hint\"}".into(),
      hint_user_template: "Task: {problem_en}\n\nProvide a helpful starting hint for this problem.".into(),
      hint_user_template_with_code: "Task: {problem_en}\n\nCurrent code:\n```python\n{code}\n```\n\n\
Provide a helpful hint to guide the student without giving away the full solution.".into(),
    }
  }
}

impl AppConfig {
  /// Parse a TOML document.
  pub fn from_toml_str(path: &str, s: &str) -> Result<Self, ConfigError> {
    toml::from_str::<AppConfig>(s).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
  }

  pub fn from_file(path: &str) -> Result<Self, ConfigError> {
    let s = std::fs::read_to_string(path)
      .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
    Self::from_toml_str(path, &s)
  }

  /// Load from ATHAR_CONFIG_PATH (if set) and apply env overrides.
  /// A broken file is logged and replaced by defaults.
  pub fn load_from_env() -> Self {
    let mut cfg = match std::env::var("ATHAR_CONFIG_PATH") {
      Ok(path) => match Self::from_file(&path) {
        Ok(cfg) => {
          info!(target: "athar_backend", %path, "Loaded config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "athar_backend", %path, error = %e, "Config unusable; falling back to defaults");
          Self::default()
        }
      },
      Err(_) => Self::default(),
    };
    cfg.apply_env(|k| std::env::var(k).ok());
    cfg
  }

  /// Apply overrides from a variable lookup (injectable for tests).
  pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(bin) = var("PYTHON_BIN") { self.sandbox.python_bin = bin; }
    if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) { self.reasoning.api_key = Some(key); }
    if let Some(url) = var("OPENAI_BASE_URL") { self.reasoning.base_url = url; }
    if let Some(model) = var("OPENAI_MODEL") { self.reasoning.model = model; }
    if let Some(dir) = var("PROGRESS_DIR") { self.progress.data_dir = Some(dir); }
  }
}
