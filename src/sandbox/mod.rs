//! The embedded interpreter and its lifecycle.
//!
//! `SandboxRuntime` owns at most one live interpreter instance, shared by every
//! run request. Initialization is expensive and lazy: the first caller starts
//! it, concurrent callers await the same in-flight future, and a failure puts
//! the runtime back to cold so a later call can retry.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SandboxError;

pub mod confine;
pub mod python;
pub mod session;

pub use confine::Confinement;
pub use python::PythonLoader;
pub use session::{CodeRunner, ErrorKind, ExecutionOutcome, ExecutionRequest};

/// Which redirected stream a chunk of output came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: Stream,
    pub text: String,
}

/// Per-call output channel. Bounded, so a chatty run waits for the reader
/// instead of piling up memory; dropped with the call, so nothing leaks
/// between runs.
pub type OutputSink = mpsc::Sender<OutputChunk>;

/// One unit of learner code handed to the interpreter.
#[derive(Clone, Debug)]
pub struct RunJob<'a> {
    pub code: &'a str,
    pub stdin: Option<&'a str>,
}

/// A live interpreter instance.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Execute learner code, streaming output into `sink` as it is produced.
    ///
    /// `Ok(None)` means the code finished cleanly, `Ok(Some(text))` carries an
    /// error raised (and caught) inside the sandboxed language. `Err` is a fault
    /// of the instance itself.
    async fn run(&self, job: RunJob<'_>, sink: OutputSink) -> Result<Option<String>, SandboxError>;

    /// Stop the instance. Called when it is discarded.
    async fn terminate(&self);

    /// Whether an in-flight `run` can be stopped by terminating the instance.
    fn interruptible(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

/// Produces interpreter instances. This is the costly part.
#[async_trait]
pub trait InterpreterLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Interpreter>, SandboxError>;
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<dyn Interpreter>, SandboxError>>>;

enum Slot {
    Cold,
    Loading { attempt: u64, future: LoadFuture },
    Ready(Arc<dyn Interpreter>),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Cold,
    Loading,
    Ready,
}

pub struct SandboxRuntime {
    loader: Arc<dyn InterpreterLoader>,
    slot: Mutex<Slot>,
    attempts: Mutex<u64>,
}

impl SandboxRuntime {
    pub fn new(loader: Arc<dyn InterpreterLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(Slot::Cold),
            attempts: Mutex::new(0),
        }
    }

    /// Return the live instance, initializing it if needed.
    #[instrument(level = "debug", skip(self))]
    pub async fn ensure_ready(&self) -> Result<Arc<dyn Interpreter>, SandboxError> {
        let (attempt, future) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Slot::Ready(instance) => return Ok(instance.clone()),
                Slot::Loading { attempt, future } => {
                    debug!(target: "sandbox", attempt, "Joining in-flight initialization");
                    (*attempt, future.clone())
                }
                Slot::Cold => {
                    let attempt = self.next_attempt();
                    let loader = self.loader.clone();
                    let future = async move { loader.load().await }.boxed().shared();
                    info!(target: "sandbox", attempt, "Starting interpreter initialization");
                    *slot = Slot::Loading {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the attempt we awaited may settle the slot; a discard or a newer
        // attempt in the meantime wins.
        if matches!(&*slot, Slot::Loading { attempt: a, .. } if *a == attempt) {
            match &result {
                Ok(instance) => {
                    info!(target: "sandbox", attempt, instance = %instance.describe(), "Interpreter ready");
                    *slot = Slot::Ready(instance.clone());
                }
                Err(e) => {
                    error!(target: "sandbox", attempt, error = %e, "Interpreter initialization failed");
                    *slot = Slot::Cold;
                }
            }
        }
        result
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        self.status() == RuntimeStatus::Ready
    }

    pub fn status(&self) -> RuntimeStatus {
        match &*self.slot.lock().unwrap_or_else(PoisonError::into_inner) {
            Slot::Cold => RuntimeStatus::Cold,
            Slot::Loading { .. } => RuntimeStatus::Loading,
            Slot::Ready(_) => RuntimeStatus::Ready,
        }
    }

    /// Number of initialization attempts started so far.
    pub fn attempts(&self) -> u64 {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop `instance` if it is still the live one; the next run re-initializes.
    #[instrument(level = "debug", skip(self, instance))]
    pub async fn discard(&self, instance: &Arc<dyn Interpreter>) {
        let taken = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Slot::Ready(live) if Arc::ptr_eq(live, instance) => {
                    std::mem::replace(&mut *slot, Slot::Cold)
                }
                _ => Slot::Cold,
            }
        };
        if let Slot::Ready(live) = taken {
            warn!(target: "sandbox", instance = %live.describe(), "Discarding interpreter instance");
            live.terminate().await;
        }
    }

    fn next_attempt(&self) -> u64 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        *attempts += 1;
        *attempts
    }
}
