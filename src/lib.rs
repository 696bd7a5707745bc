//! treeport: mirror a test run into a hierarchical run report.
//!
//! A test runner emits lifecycle events (suite entered, step passed, test
//! failed, run finished). treeport collects them and, when the run ends,
//! reports one launch to a reporting backend:
//!
//! ```text
//! Launch → Suite → Test → (MetaStep →)* Step
//! ```
//!
//! # Architecture
//!
//! - **Listener**: the runner-facing callbacks ([`RunListener`])
//! - **Aggregator**: collects suites, tests and steps until the run ends
//! - **Report**: the reporting pass and the meta-step resolver
//! - **Client**: the backend seam ([`ReportClient`]) with journaling and
//!   in-memory implementations
//! - **Attachment**: failure screenshots and screen recordings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use treeport::attachment::AttachmentCollector;
//! use treeport::client::JournalClient;
//! use treeport::{ReportPortalPlugin, RunListener, load_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("treeport.toml"))?;
//!     let client = JournalClient::create("journal.jsonl", &config.reporter.endpoint, &config.reporter.project).await?;
//!     let attachments = AttachmentCollector::new(
//!         config.artifacts.output_path(),
//!         config.artifacts.record_path(),
//!     );
//!     let plugin = ReportPortalPlugin::new(config, Arc::new(client), attachments);
//!     // ... forward runner events ...
//!     plugin.on_run_complete().await;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod attachment;
pub mod client;
pub mod config;
pub mod listener;
pub mod model;
pub mod plugin;
pub mod report;

// Re-export commonly used types
pub use client::{ItemId, ReportClient};
pub use config::{Config, load_config};
pub use listener::{RunListener, RunnerEvent, dispatch};
pub use model::{AggregatedResult, ErrorInfo, MetaStep, ReportStatus, Step, Suite, Test};
pub use plugin::ReportPortalPlugin;
pub use report::{PassSummary, ReportError, run_reporting_pass};
