//! Integration tests for the execution-and-verdict pipeline.
//!
//! The sandbox and the reasoning endpoint are replaced by scripted fakes so
//! these run without Python or network access. `python_worker` drives the
//! real interpreter and skips itself when `python3` is not installed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use athar_backend::catalog::Catalog;
use athar_backend::domain::{Level, Task};
use athar_backend::error::{SandboxError, VerdictError};
use athar_backend::sandbox::{Interpreter, InterpreterLoader, OutputChunk, OutputSink, RunJob, Stream};
use athar_backend::state::{AppState, Tuning};
use athar_backend::store::{MemoryStore, SnapshotStore};
use athar_backend::verdict::{HintRequest, VerdictEndpoint, VerdictRequest};

mod api;
mod pipeline;
mod python_worker;

/// Output cap the test apps run with.
pub(crate) const TEST_OUTPUT_LIMIT: usize = 1024;

/// Understands a handful of snippets: `spin` never returns, `fail` raises,
/// `shout` prints until it is stopped, anything else is echoed back on stdout.
pub(crate) struct ScriptInterpreter;

async fn emit(sink: &OutputSink, text: &str) -> bool {
    sink.send(OutputChunk { stream: Stream::Stdout, text: text.to_string() }).await.is_ok()
}

#[async_trait]
impl Interpreter for ScriptInterpreter {
    async fn run(&self, job: RunJob<'_>, sink: OutputSink) -> Result<Option<String>, SandboxError> {
        match job.code {
            "spin" => loop {
                emit(&sink, ".").await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            "shout" => {
                while emit(&sink, &"!".repeat(100)).await {}
                Ok(None)
            }
            "fail" => {
                emit(&sink, "partial\n").await;
                Ok(Some("NameError: name 'x' is not defined".into()))
            }
            code => {
                emit(&sink, &format!("{code}\n")).await;
                Ok(None)
            }
        }
    }

    async fn terminate(&self) {}

    fn interruptible(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "script".into()
    }
}

pub(crate) struct ScriptLoader {
    pub loads: AtomicUsize,
    pub delay: Duration,
}

impl ScriptLoader {
    pub(crate) fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { loads: AtomicUsize::new(0), delay })
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterpreterLoader for ScriptLoader {
    async fn load(&self) -> Result<Arc<dyn Interpreter>, SandboxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Arc::new(ScriptInterpreter))
    }
}

/// Reasoning endpoint that always gives the same answer, or none at all.
pub(crate) struct MockEndpoint {
    pub verdict: Option<Value>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl MockEndpoint {
    pub(crate) fn answering(is_correct: bool, confidence: f64) -> Arc<Self> {
        Self::slow(is_correct, confidence, Duration::ZERO)
    }

    pub(crate) fn slow(is_correct: bool, confidence: f64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            verdict: Some(json!({
                "isCorrect": is_correct,
                "feedback": "Looks right",
                "feedbackAr": "يبدو صحيحاً",
                "suggestions": [],
                "suggestionsAr": [],
                "confidence": confidence
            })),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        Arc::new(Self { verdict: None, delay: Duration::ZERO, calls: AtomicUsize::new(0) })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerdictEndpoint for MockEndpoint {
    async fn judge(&self, _request: &VerdictRequest) -> Result<Value, VerdictError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.verdict
            .clone()
            .ok_or_else(|| VerdictError::Transport("connection refused".into()))
    }

    async fn hint(&self, _request: &HintRequest) -> Result<Value, VerdictError> {
        Ok(json!({ "hint": "Start with print()", "hintAr": "ابدأ بـ print()" }))
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

fn task(id: &str, level: &str, xp: u32) -> Task {
    Task {
        id: id.into(),
        level_id: level.into(),
        title: id.into(),
        title_ar: String::new(),
        description: format!("Solve {id}"),
        description_ar: format!("حل {id}"),
        difficulty: Default::default(),
        xp,
        starter_code: String::new(),
        expected_output: None,
        test_cases: vec![],
        hints: vec![],
        hints_ar: vec![],
    }
}

fn level(id: &str, order: u32, tasks: Vec<Task>) -> Level {
    Level {
        id: id.into(),
        order,
        title: id.into(),
        title_ar: String::new(),
        description: String::new(),
        description_ar: String::new(),
        xp: 50,
        tasks,
        prerequisites: vec![],
    }
}

/// level-1: hello(10); level-2: loops(20) sum(30)
pub(crate) fn catalog() -> Catalog {
    Catalog::from_levels(vec![
        level("level-1", 1, vec![task("hello", "level-1", 10)]),
        level("level-2", 2, vec![task("loops", "level-2", 20), task("sum", "level-2", 30)]),
    ])
    .expect("test catalog")
}

pub(crate) fn app_with(
    loader: Arc<ScriptLoader>,
    endpoint: Option<Arc<MockEndpoint>>,
    store: Arc<dyn SnapshotStore>,
) -> Arc<AppState> {
    athar_backend::telemetry::init_for_tests();
    Arc::new(AppState::with_parts(
        catalog(),
        loader,
        endpoint.map(|e| e as Arc<dyn VerdictEndpoint>),
        store,
        Tuning {
            run_timeout: Duration::from_secs(2),
            verdict_timeout: Duration::from_secs(2),
            max_output_bytes: TEST_OUTPUT_LIMIT,
            ..Tuning::default()
        },
    ))
}

pub(crate) fn app(endpoint: Option<Arc<MockEndpoint>>) -> Arc<AppState> {
    app_with(ScriptLoader::new(Duration::from_millis(5)), endpoint, Arc::new(MemoryStore::new()))
}
