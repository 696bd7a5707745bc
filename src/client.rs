//! Reporting backend client abstraction.
//!
//! The reporting pass never talks HTTP itself. Everything it needs from the
//! backend goes through the [`ReportClient`] trait:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ReportClient                           │
//! │                                                               │
//! │  start_launch(opts) ──────────────► launch id                 │
//! │  start_test_item(item, launch, parent) ──► item id            │
//! │  finish_test_item(id, {end_time, status})                     │
//! │  send_log(id, {level, message}, attachment?)                  │
//! │  finish_launch(id, {end_time, status}) ──► permalink          │
//! │  now()                                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Clients
//!
//! | Client | Module | Description |
//! |--------|--------|-------------|
//! | Recording | [`recording`] | Keeps every call in memory; supports failure injection |
//! | Journal | [`journal`] | Appends every call as a JSON line to a file |

pub mod journal;
pub mod recording;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::model::{ItemType, ReportStatus};

pub use journal::JournalClient;
pub use recording::{ClientCall, RecordingClient};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by a reporting backend client.
///
/// The reporting pass treats every one of these the same way: the call site
/// logs it and carries on as if the item did not exist.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The backend refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The referenced item or launch was never started.
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// I/O error talking to the backend or its journal.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode a request.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Handle returned by the backend as soon as an item or launch is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A free-form launch tag. `key` is optional, as in `smoke` vs `env:staging`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

/// Options used to open a launch.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchOptions {
    pub name: String,
    pub description: String,
    pub attributes: Vec<Attribute>,
    pub rerun: bool,
    pub rerun_of: Option<String>,
    pub start_time: i64,
}

/// Describes an item to start under a launch or a parent item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub has_stats: bool,
    pub start_time: i64,
}

impl ItemDescriptor {
    pub fn new(name: impl Into<String>, item_type: ItemType, start_time: i64) -> Self {
        Self {
            name: name.into(),
            item_type,
            has_stats: item_type.has_stats(),
            start_time,
        }
    }
}

/// Closing data for an item.
#[derive(Debug, Clone, Serialize)]
pub struct FinishItem {
    pub end_time: i64,
    pub status: ReportStatus,
}

/// Closing data for a launch.
#[derive(Debug, Clone, Serialize)]
pub struct FinishLaunch {
    pub end_time: i64,
    pub status: ReportStatus,
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Debug,
}

/// A log entry attached to an item.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub time: i64,
}

/// What the backend returns once a launch is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchReceipt {
    /// Permalink to the finished launch.
    pub link: String,
}

/// A client for the external reporting backend.
///
/// Every method is one request. Ids returned by the start methods are usable
/// immediately as parents for further items.
///
/// # Thread Safety
///
/// Clients must be `Send + Sync`; the plugin shares one behind an `Arc`.
#[async_trait]
pub trait ReportClient: Send + Sync {
    /// Opens a launch and returns its id.
    async fn start_launch(&self, options: &LaunchOptions) -> ClientResult<ItemId>;

    /// Starts an item. Top-level items have no `parent`.
    async fn start_test_item(
        &self,
        item: &ItemDescriptor,
        launch: &ItemId,
        parent: Option<&ItemId>,
    ) -> ClientResult<ItemId>;

    /// Finishes a previously started item.
    async fn finish_test_item(&self, item: &ItemId, finish: &FinishItem) -> ClientResult<()>;

    /// Sends a log entry for an item, optionally with a binary attachment.
    async fn send_log(
        &self,
        item: &ItemId,
        entry: &LogEntry,
        attachment: Option<&Attachment>,
    ) -> ClientResult<()>;

    /// Finishes the launch and returns its permalink.
    async fn finish_launch(
        &self,
        launch: &ItemId,
        finish: &FinishLaunch,
    ) -> ClientResult<LaunchReceipt>;

    /// Current time in milliseconds since the epoch.
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Builds the backend's permalink for a launch.
pub fn launch_link(endpoint: &str, project: &str, launch: &ItemId) -> String {
    let base = endpoint
        .trim_end_matches('/')
        .trim_end_matches("/api/v1")
        .trim_end_matches('/');
    format!("{}/ui/#{}/launches/all/{}", base, project, launch)
}
