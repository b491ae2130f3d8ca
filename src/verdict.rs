//! Correctness verdicts and hints.
//!
//! The external reasoning endpoint is a capability injected as a
//! `VerdictEndpoint`. Its answer is parsed strictly and gated on confidence; any
//! failure (transport, status, shape, timeout) falls back to a deterministic
//! local heuristic that never marks a submission correct.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::domain::Task;
use crate::error::VerdictError;

/// A "correct" answer below this confidence is downgraded to incorrect.
pub const CONFIDENCE_GATE: f64 = 0.5;

/// Payload sent to the verdict endpoint.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRequest {
    pub code: String,
    pub problem_statement_en: String,
    pub problem_statement_ar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starter_code: Option<String>,
}

impl VerdictRequest {
    pub fn for_task(task: &Task, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            problem_statement_en: task.description.clone(),
            problem_statement_ar: task.description_ar.clone(),
            expected_output: task.expected_output.clone(),
            starter_code: Some(task.starter_code.clone()).filter(|s| !s.trim().is_empty()),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HintRequest {
    pub problem_statement_en: String,
    pub problem_statement_ar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_code: Option<String>,
}

impl HintRequest {
    pub fn for_task(task: &Task, current_code: Option<String>) -> Self {
        Self {
            problem_statement_en: task.description.clone(),
            problem_statement_ar: task.description_ar.clone(),
            current_code: current_code.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Endpoint,
    Fallback,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_correct: bool,
    pub feedback: String,
    pub feedback_ar: String,
    pub suggestions: Vec<String>,
    pub suggestions_ar: Vec<String>,
    pub confidence: f64,
    pub source: VerdictSource,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub hint: String,
    pub hint_ar: String,
    pub source: VerdictSource,
}

/// The external reasoning service. Implementations return the raw JSON object
/// the service produced; shape checks happen here, not in the transport.
#[async_trait]
pub trait VerdictEndpoint: Send + Sync {
    async fn judge(&self, request: &VerdictRequest) -> Result<Value, VerdictError>;
    async fn hint(&self, request: &HintRequest) -> Result<Value, VerdictError>;
    fn describe(&self) -> String;
}

// --- Response parsing ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointVerdict {
    is_correct: bool,
    feedback: String,
    feedback_ar: String,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
    #[serde(default)]
    suggestions_ar: Option<Vec<String>>,
    confidence: f64,
}

/// Strictly parse an endpoint verdict and apply the confidence gate.
pub fn interpret_verdict(value: Value) -> Result<Verdict, VerdictError> {
    let raw: EndpointVerdict =
        serde_json::from_value(value).map_err(|e| VerdictError::Malformed(e.to_string()))?;
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(VerdictError::Malformed(format!("confidence {} outside [0, 1]", raw.confidence)));
    }
    Ok(Verdict {
        is_correct: raw.is_correct && raw.confidence > CONFIDENCE_GATE,
        feedback: raw.feedback,
        feedback_ar: raw.feedback_ar,
        suggestions: raw.suggestions.unwrap_or_default(),
        suggestions_ar: raw.suggestions_ar.unwrap_or_default(),
        confidence: raw.confidence,
        source: VerdictSource::Endpoint,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointHint {
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    hint_ar: Option<String>,
}

const GENERIC_HINT_AR_LINE: &str = "فكر في المشكلة خطوة بخطوة.";

pub fn interpret_hint(value: Value) -> Result<Hint, VerdictError> {
    let raw: EndpointHint =
        serde_json::from_value(value).map_err(|e| VerdictError::Malformed(e.to_string()))?;
    let hint = raw
        .hint
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| VerdictError::Malformed("missing hint text".into()))?;
    let hint_ar = raw
        .hint_ar
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| GENERIC_HINT_AR_LINE.to_string());
    Ok(Hint { hint, hint_ar, source: VerdictSource::Endpoint })
}

// --- Local fallback ---

/// Common beginner mistakes: (pattern, English message, Arabic message).
static SYNTAX_SMELLS: LazyLock<Vec<(Regex, &'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\bprint[ \t]+[^(\s=]").unwrap(),
            "print() requires parentheses",
            "print() يتطلب أقواس",
        ),
        // block headers with nothing after them
        (
            Regex::new(r"(?m)^[ \t]*def\s+\w+\s*\([^)]*\)\s*(->[^:\n]*)?:\s*\z").unwrap(),
            "Function body is empty",
            "جسم الدالة فارغ",
        ),
        (
            Regex::new(r"(?m)^[ \t]*(?:(?:if|elif)\b.*|else\s*):\s*\z").unwrap(),
            "If statement body is empty",
            "جملة if فارغة",
        ),
        (
            Regex::new(r"(?m)^[ \t]*for\b.*:\s*\z").unwrap(),
            "For loop body is empty",
            "حلقة for فارغة",
        ),
        (
            Regex::new(r"(?m)^[ \t]*while\b.*:\s*\z").unwrap(),
            "While loop body is empty",
            "حلقة while فارغة",
        ),
    ]
});

/// Deterministic verdict used whenever the endpoint cannot be trusted.
pub fn fallback_verdict(code: &str) -> Verdict {
    let verdict = |feedback: String, feedback_ar: String, confidence: f64| Verdict {
        is_correct: false,
        feedback,
        feedback_ar,
        suggestions: vec![],
        suggestions_ar: vec![],
        confidence,
        source: VerdictSource::Fallback,
    };

    if code.trim().is_empty() {
        return verdict(
            "Please write some code before submitting.".into(),
            "الرجاء كتابة بعض الكود قبل التقديم".into(),
            1.0,
        );
    }

    for (pattern, message, message_ar) in SYNTAX_SMELLS.iter() {
        if pattern.is_match(code) {
            return verdict(
                format!("Syntax issue: {message}"),
                format!("مشكلة في بناء الجملة: {message_ar}"),
                0.9,
            );
        }
    }

    verdict(
        "The verification service is unavailable right now. Run your code to check that it works, then submit again."
            .into(),
        "خدمة التحقق غير متوفرة حالياً. شغّل الكود للتأكد من أنه يعمل، ثم أعد التقديم.".into(),
        0.5,
    )
}

pub fn fallback_hint() -> Hint {
    Hint {
        hint: "Break down the problem into smaller steps.".into(),
        hint_ar: "قسّم المشكلة إلى خطوات أصغر.".into(),
        source: VerdictSource::Fallback,
    }
}

// --- Service ---

#[derive(Clone)]
pub struct VerdictService {
    endpoint: Option<Arc<dyn VerdictEndpoint>>,
    call_timeout: Duration,
}

impl VerdictService {
    pub fn new(endpoint: Option<Arc<dyn VerdictEndpoint>>, call_timeout: Duration) -> Self {
        Self { endpoint, call_timeout }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Judge a submission. Never fails; the fallback covers every error.
    #[instrument(level = "info", skip(self, request), fields(code_len = request.code.len()))]
    pub async fn judge(&self, request: &VerdictRequest) -> Verdict {
        match self.judge_remote(request).await {
            Ok(v) => {
                info!(target: "verdict", is_correct = v.is_correct, confidence = v.confidence, "Endpoint verdict");
                v
            }
            Err(e) => {
                warn!(target: "verdict", error = %e, "Verdict endpoint unusable; using local fallback");
                fallback_verdict(&request.code)
            }
        }
    }

    async fn judge_remote(&self, request: &VerdictRequest) -> Result<Verdict, VerdictError> {
        let endpoint = self.endpoint.as_ref().ok_or(VerdictError::Disabled)?;
        let value = tokio::time::timeout(self.call_timeout, endpoint.judge(request))
            .await
            .map_err(|_| VerdictError::Timeout(self.call_timeout))??;
        interpret_verdict(value)
    }

    #[instrument(level = "info", skip(self, request), fields(has_code = request.current_code.is_some()))]
    pub async fn hint(&self, request: &HintRequest) -> Hint {
        match self.hint_remote(request).await {
            Ok(h) => h,
            Err(e) => {
                warn!(target: "verdict", error = %e, "Hint endpoint unusable; using generic hint");
                fallback_hint()
            }
        }
    }

    async fn hint_remote(&self, request: &HintRequest) -> Result<Hint, VerdictError> {
        let endpoint = self.endpoint.as_ref().ok_or(VerdictError::Disabled)?;
        let value = tokio::time::timeout(self.call_timeout, endpoint.hint(request))
            .await
            .map_err(|_| VerdictError::Timeout(self.call_timeout))??;
        interpret_hint(value)
    }
}
