//! Athar · execution-and-verdict backend for an interactive Python course.
//!
//! Learners run code against a shared sandboxed interpreter, submit it for a
//! correctness verdict, and accepted submissions advance their progress.
//!
//! Pipeline (leaf first): `sandbox` (runtime + runs) -> `verdict` (endpoint +
//! fallback) -> `progress` (pure transitions) -> `store` (per-learner
//! serialization and snapshots). `logic` sequences them for the HTTP and
//! WebSocket handlers in `routes`.

pub mod catalog;
pub mod config;
pub mod domain;
pub mod drafts;
pub mod error;
pub mod logic;
pub mod openai;
pub mod progress;
pub mod protocol;
pub mod routes;
pub mod sandbox;
pub mod seeds;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;
pub mod verdict;
