//! Runner payloads and report-side value types.
//!
//! The types in this module describe what the test runner hands us (suites,
//! tests, steps and the meta-steps wrapping them) and the handful of values
//! we hand back to the reporting backend (statuses and item types).
//!
//! # Hierarchy
//!
//! ```text
//! Launch
//! └── Suite            (identity: title)
//!     └── Test         (parent resolved by suite title)
//!         ├── Step
//!         └── MetaStep (identity: actor + name + started_at)
//!             ├── Step
//!             └── MetaStep
//!                 └── Step
//! ```
//!
//! Step arguments are kept as an opaque [`serde_json::Value`] and only turned
//! into text when an item title or a log message is built.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A suite announced by the runner.
///
/// Suites are identified by title alone. Two suites with the same title are
/// the same report item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suite {
    pub title: String,
}

impl Suite {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

/// An error attached to a failed test or step.
///
/// Runners report errors in many shapes. Besides the message and stack we
/// keep every other field so the error can be dumped verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorInfo {
    /// Creates an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Sets the stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Text used in failure logs: the stack trace when there is one,
    /// otherwise a JSON dump of the whole error.
    pub fn render(&self) -> String {
        match &self.stack {
            Some(stack) => stack.clone(),
            None => serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self)),
        }
    }
}

/// Value identity of a meta-step occurrence.
///
/// Two meta-steps are the same open report item iff actor, name and start
/// time all match. Wrapper objects may be rebuilt between recording and
/// reporting, so structural identity is never used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaStepKey {
    pub actor: String,
    pub name: String,
    pub started_at: i64,
}

/// A higher-level action grouping one or more steps.
///
/// `outer` points at the meta-step wrapping this one, if any, so a step's
/// wrappers form a chain from innermost to outermost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaStep {
    pub actor: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Start timestamp in milliseconds.
    pub started_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outer: Option<Box<MetaStep>>,
}

impl MetaStep {
    pub fn new(actor: impl Into<String>, name: impl Into<String>, started_at: i64) -> Self {
        Self {
            actor: actor.into(),
            name: name.into(),
            args: None,
            started_at,
            status: None,
            outer: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Wraps this meta-step inside `outer`.
    pub fn within(mut self, outer: MetaStep) -> Self {
        self.outer = Some(Box::new(outer));
        self
    }

    pub fn key(&self) -> MetaStepKey {
        MetaStepKey {
            actor: self.actor.clone(),
            name: self.name.clone(),
            started_at: self.started_at,
        }
    }

    /// This meta-step followed by all of its wrappers, innermost first.
    pub fn chain(&self) -> Vec<&MetaStep> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(outer) = current.outer.as_deref() {
            chain.push(outer);
            current = outer;
        }
        chain
    }

    /// Status reported when the meta-step item is closed.
    pub fn report_status(&self) -> ReportStatus {
        self.status
            .as_deref()
            .map(ReportStatus::from_runner)
            .unwrap_or(ReportStatus::Passed)
    }
}

impl fmt::Display for MetaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.actor, self.name)?;
        match &self.args {
            Some(Value::Array(items)) if items.is_empty() => Ok(()),
            Some(Value::Null) | None => Ok(()),
            Some(args) => write!(f, " {}", args),
        }
    }
}

/// A single action executed inside a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub actor: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Raw status string as reported by the runner (`"success"`, `"failed"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorInfo>,

    /// Innermost meta-step wrapping this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_step: Option<MetaStep>,
}

impl Step {
    pub fn new(actor: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            name: name.into(),
            args: None,
            status: None,
            err: None,
            meta_step: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_error(mut self, err: ErrorInfo) -> Self {
        self.err = Some(err);
        self
    }

    pub fn within(mut self, meta_step: MetaStep) -> Self {
        self.meta_step = Some(meta_step);
        self
    }

    /// Wrapping meta-steps, innermost first. Empty when the step is not wrapped.
    pub fn meta_chain(&self) -> Vec<&MetaStep> {
        self.meta_step
            .as_ref()
            .map(MetaStep::chain)
            .unwrap_or_default()
    }

    /// Report item title: `[STEP] - <actor> <name> <json-args>`.
    pub fn title(&self) -> String {
        let args = match &self.args {
            Some(args) => args.to_string(),
            None => "{}".to_string(),
        };
        format!("[STEP] - {} {} {}", self.actor, self.name, args)
    }

    /// Status reported for the step item; unset means passed.
    pub fn report_status(&self) -> ReportStatus {
        self.status
            .as_deref()
            .map(ReportStatus::from_runner)
            .unwrap_or(ReportStatus::Passed)
    }
}

/// An executed test and the steps it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    /// Runner-assigned unique id; names the screen recording file.
    pub uid: String,

    pub title: String,

    /// Title of the suite this test belongs to.
    pub parent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorInfo>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Test {
    pub fn new(uid: impl Into<String>, title: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            title: title.into(),
            parent: parent.into(),
            err: None,
            steps: Vec::new(),
        }
    }

    pub fn with_error(mut self, err: ErrorInfo) -> Self {
        self.err = Some(err);
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// Tests of a worker-aggregated result, split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTests {
    #[serde(default)]
    pub passed: Vec<Test>,

    #[serde(default)]
    pub failed: Vec<Test>,
}

/// The merged summary produced after a run sharded across worker processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    #[serde(default)]
    pub suites: Vec<Suite>,

    #[serde(default)]
    pub tests: AggregatedTests,
}

/// Status of a report item as understood by the reporting backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    Passed,
    Failed,
    /// Any runner status with no backend equivalent, passed through verbatim.
    Other(String),
}

impl ReportStatus {
    /// Maps a runner status onto a backend status.
    ///
    /// `"success"` becomes [`Passed`](Self::Passed), `"failed"` becomes
    /// [`Failed`](Self::Failed), anything else is passed through unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use treeport::model::ReportStatus;
    ///
    /// assert_eq!(ReportStatus::from_runner("success"), ReportStatus::Passed);
    /// assert_eq!(ReportStatus::from_runner("failed"), ReportStatus::Failed);
    /// assert_eq!(ReportStatus::from_runner("skipped").as_str(), "skipped");
    /// ```
    pub fn from_runner(status: &str) -> Self {
        match status {
            "success" | "PASSED" => ReportStatus::Passed,
            "failed" | "FAILED" => ReportStatus::Failed,
            other => ReportStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReportStatus::Passed => "PASSED",
            ReportStatus::Failed => "FAILED",
            ReportStatus::Other(status) => status,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReportStatus::Failed)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReportStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReportStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ReportStatus::from_runner(&raw))
    }
}

/// Kind of report item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    Suite,
    Test,
    Step,
}

impl ItemType {
    /// Steps do not contribute to the backend's statistics.
    pub fn has_stats(&self) -> bool {
        !matches!(self, ItemType::Step)
    }
}
