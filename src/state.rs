//! Application state: the pipeline components wired together.
//!
//! This module owns:
//!   - the catalog (built-in seeds or `[[levels]]` from the TOML config)
//!   - the shared sandbox runtime and the code runner in front of it
//!   - the verdict service (with an optional reasoning endpoint)
//!   - per-learner progress and per-task drafts
//!
//! Everything is built once at startup and shared behind an `Arc`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::config::{AppConfig, ProgressConfig, ReasoningConfig, SandboxConfig};
use crate::drafts::DraftBook;
use crate::error::CatalogError;
use crate::openai::ReasoningClient;
use crate::sandbox::{CodeRunner, InterpreterLoader, PythonLoader, SandboxRuntime};
use crate::seeds::seed_levels;
use crate::store::{JsonFileStore, MemoryStore, ProgressBook, SnapshotStore};
use crate::verdict::{VerdictEndpoint, VerdictService};

/// Timeouts and size limits applied around the collaborators.
#[derive(Clone, Debug)]
pub struct Tuning {
    pub run_timeout: Duration,
    pub verdict_timeout: Duration,
    pub max_output_bytes: usize,
    pub max_code_bytes: usize,
    pub max_cached_learners: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self::from_parts(&SandboxConfig::default(), &ReasoningConfig::default(), &ProgressConfig::default())
    }
}

impl Tuning {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::from_parts(&cfg.sandbox, &cfg.reasoning, &cfg.progress)
    }

    fn from_parts(sandbox: &SandboxConfig, reasoning: &ReasoningConfig, progress: &ProgressConfig) -> Self {
        Self {
            run_timeout: Duration::from_millis(sandbox.run_timeout_ms),
            verdict_timeout: Duration::from_secs(reasoning.request_timeout_secs),
            max_output_bytes: sandbox.max_output_bytes,
            max_code_bytes: sandbox.max_code_bytes,
            max_cached_learners: progress.max_cached_learners,
        }
    }
}

pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub runner: CodeRunner,
    pub verdicts: VerdictService,
    pub progress: ProgressBook,
    pub drafts: DraftBook,
    pub max_code_bytes: usize,
    pub started_at: Instant,
}

impl AppState {
    /// Build state from config: catalog, Python loader, optional reasoning client, store.
    #[instrument(level = "info", skip_all)]
    pub fn new(cfg: &AppConfig) -> Result<Self, CatalogError> {
        let levels = if cfg.levels.is_empty() {
            seed_levels()
        } else {
            info!(target: "athar_backend", levels = cfg.levels.len(), "Using curriculum from config");
            cfg.levels.clone()
        };
        let catalog = Catalog::from_levels(levels)?;

        let loader: Arc<dyn InterpreterLoader> = Arc::new(PythonLoader::from_config(&cfg.sandbox));

        let endpoint = ReasoningClient::from_config(&cfg.reasoning, &cfg.prompts)
            .map(|c| Arc::new(c) as Arc<dyn VerdictEndpoint>);
        match &endpoint {
            Some(e) => info!(target: "athar_backend", endpoint = %e.describe(), "Reasoning endpoint enabled."),
            None => warn!(target: "athar_backend", "Reasoning endpoint disabled (no OPENAI_API_KEY). Verdicts use the local fallback."),
        }

        let store: Arc<dyn SnapshotStore> = match &cfg.progress.data_dir {
            Some(dir) => Arc::new(JsonFileStore::new(dir)),
            None => Arc::new(MemoryStore::new()),
        };

        Ok(Self::with_parts(catalog, loader, endpoint, store, Tuning::from_config(cfg)))
    }

    /// Assemble from explicit collaborators (tests inject fakes here).
    pub fn with_parts(
        catalog: Catalog,
        loader: Arc<dyn InterpreterLoader>,
        endpoint: Option<Arc<dyn VerdictEndpoint>>,
        store: Arc<dyn SnapshotStore>,
        tuning: Tuning,
    ) -> Self {
        let catalog = Arc::new(catalog);
        info!(
            target: "athar_backend",
            levels = catalog.levels().len(),
            tasks = catalog.task_count(),
            run_timeout_ms = tuning.run_timeout.as_millis() as u64,
            max_output_bytes = tuning.max_output_bytes,
            max_code_bytes = tuning.max_code_bytes,
            "Catalog loaded"
        );
        let runtime = Arc::new(SandboxRuntime::new(loader));
        Self {
            runner: CodeRunner::new(runtime, tuning.run_timeout).with_output_limit(tuning.max_output_bytes),
            verdicts: VerdictService::new(endpoint, tuning.verdict_timeout),
            progress: ProgressBook::with_limit(catalog.clone(), store, tuning.max_cached_learners),
            drafts: DraftBook::with_capacity(tuning.max_cached_learners),
            max_code_bytes: tuning.max_code_bytes,
            catalog,
            started_at: Instant::now(),
        }
    }

    pub fn runtime(&self) -> &Arc<SandboxRuntime> {
        self.runner.runtime()
    }

    /// Start the interpreter in the background. A run arriving first simply
    /// joins the same initialization.
    pub fn spawn_warmup(self: &Arc<Self>) {
        let runtime = self.runtime().clone();
        tokio::spawn(async move {
            let start = Instant::now();
            match runtime.ensure_ready().await {
                Ok(i) => info!(target: "sandbox", interpreter = %i.describe(), elapsed = ?start.elapsed(), "Interpreter warmed up"),
                Err(e) => warn!(target: "sandbox", error = %e, "Warm-up failed; the next run will retry"),
            }
        });
    }
}
