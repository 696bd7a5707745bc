//! Building the run report hierarchy.
//!
//! A reporting pass turns the collected suites and tests into report items:
//!
//! ```text
//! Launch ─┬─ Suite ─┬─ Test ─┬─ Step
//!         │         │        └─ MetaStep ── MetaStep ── Step
//!         │         └─ Test
//!         └─ Suite
//! ```
//!
//! - [`driver`]: the pass itself ([`run_reporting_pass`])
//! - [`metastep`]: lazily opens the meta-step items wrapping each step
//!
//! Backend failures are local: the affected item is logged and skipped and
//! the pass goes on. Only a launch that cannot be opened aborts the pass.

pub mod driver;
pub mod metastep;

use std::path::PathBuf;

use tracing::error;

use crate::client::{ClientError, FinishItem, ItemDescriptor, ItemId, ReportClient};
use crate::model::{ItemType, ReportStatus, Test};

pub use driver::{ReportingPass, persist_result_link, run_reporting_pass};
pub use metastep::MetaStepRegistry;

/// Environment variable exported by the result link file.
pub const RESULT_LINK_VAR: &str = "REPORT_PORTAL_RESULT_LINK";

/// Result type for reporting passes.
pub type ReportResult<T> = Result<T, ReportError>;

/// A report item that should exist but cannot be found.
///
/// This always points at a broken hierarchy (an ordering bug or a failed
/// parent), so it is surfaced rather than skipped silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// A test names a parent suite that was never discovered.
    #[error("Test '{test}' belongs to suite '{suite}' which was never discovered")]
    UnknownSuite { test: String, suite: String },

    /// The parent exists in the hierarchy but its item was never opened.
    #[error("No open report item for {what}")]
    MissingItem { what: String },
}

/// Errors that end a reporting pass.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The launch could not be opened, so nothing else can be reported.
    #[error("Failed to start launch: {0}")]
    LaunchStart(#[source] ClientError),

    /// At least one item had no resolvable parent. The launch was still
    /// finished before this was returned.
    #[error("Broken report hierarchy: {0}")]
    Lookup(#[from] LookupError),

    /// The result link file could not be written.
    #[error("Failed to write result link to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pass already ran for this run.
    #[error("Results were already reported for this run")]
    AlreadyReported,
}

/// A test queued for reporting with the status it is reported under.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedTest {
    pub test: Test,
    pub status: ReportStatus,
}

impl ReportedTest {
    pub fn new(test: Test, status: ReportStatus) -> Self {
        Self { test, status }
    }
}

/// Everything a reporting pass needs from the aggregator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassInput {
    /// Suite titles in reporting order, without duplicates.
    pub suites: Vec<String>,
    pub tests: Vec<ReportedTest>,
}

/// Counts of what a pass sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub launch: ItemId,
    pub status: ReportStatus,
    pub link: Option<String>,
    pub suites: usize,
    pub tests: usize,
    pub steps: usize,
    pub meta_steps: usize,
    pub logs: usize,
    pub client_failures: usize,
}

impl PassSummary {
    fn new(launch: ItemId) -> Self {
        Self {
            launch,
            status: ReportStatus::Passed,
            link: None,
            suites: 0,
            tests: 0,
            steps: 0,
            meta_steps: 0,
            logs: 0,
            client_failures: 0,
        }
    }
}

/// Starts an item, stamping it with the client's clock.
pub(crate) async fn start_item(
    client: &dyn ReportClient,
    launch: &ItemId,
    name: &str,
    item_type: ItemType,
    parent: Option<&ItemId>,
) -> Result<ItemId, ClientError> {
    let descriptor = ItemDescriptor::new(name, item_type, client.now());
    client.start_test_item(&descriptor, launch, parent).await
}

/// Finishes an item, logging instead of failing. Returns whether the
/// backend accepted the call.
pub(crate) async fn finish_item(
    client: &dyn ReportClient,
    item: &ItemId,
    status: ReportStatus,
) -> bool {
    let finish = FinishItem {
        end_time: client.now(),
        status,
    };
    match client.finish_test_item(item, &finish).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to finish item {}: {}", item, e);
            false
        }
    }
}
