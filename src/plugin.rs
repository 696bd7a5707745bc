//! The reporting plugin: a [`RunListener`] that reports the run when it ends.
//!
//! While tests run, the plugin only records what it sees (and starts/stops
//! screen recordings when a recorder is available). When the run completes it
//! performs one reporting pass:
//!
//! | Signal | Source of tests |
//! |--------|-----------------|
//! | `on_workers_result` | the merged worker result |
//! | `on_run_complete` | tests observed locally (ignored when running with workers) |
//!
//! Reporting failures are logged and never change the outcome of the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::aggregator::ResultAggregator;
use crate::attachment::AttachmentCollector;
use crate::client::ReportClient;
use crate::config::Config;
use crate::listener::RunListener;
use crate::model::{AggregatedResult, ErrorInfo, Step, Suite, Test};
use crate::report::{PassSummary, ReportError, ReportResult, run_reporting_pass};

/// Reports a test run to the backend behind a [`ReportClient`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use treeport::attachment::AttachmentCollector;
/// use treeport::client::RecordingClient;
/// use treeport::config::load_config;
/// use treeport::listener::RunListener;
/// use treeport::model::Suite;
/// use treeport::plugin::ReportPortalPlugin;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = load_config(std::path::Path::new("treeport.toml"))?;
/// let attachments = AttachmentCollector::new(
///     config.artifacts.output_path(),
///     config.artifacts.record_path(),
/// );
/// let plugin = ReportPortalPlugin::new(config, Arc::new(RecordingClient::new()), attachments);
///
/// plugin.on_suite_discovered(&Suite::new("Auth")).await;
/// // ... test and step events ...
/// plugin.on_run_complete().await;
/// # Ok(())
/// # }
/// ```
pub struct ReportPortalPlugin {
    config: Config,
    client: Arc<dyn ReportClient>,
    attachments: AttachmentCollector,
    aggregator: Mutex<ResultAggregator>,
    reported: AtomicBool,
    summary: StdMutex<Option<PassSummary>>,
}

impl ReportPortalPlugin {
    pub fn new(
        config: Config,
        client: Arc<dyn ReportClient>,
        attachments: AttachmentCollector,
    ) -> Self {
        Self {
            config,
            client,
            attachments,
            aggregator: Mutex::new(ResultAggregator::new()),
            reported: AtomicBool::new(false),
            summary: StdMutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.reporter.enabled
    }

    /// Summary of the completed pass, if one succeeded.
    pub fn summary(&self) -> Option<PassSummary> {
        self.summary.lock().unwrap().clone()
    }

    /// Performs the reporting pass.
    ///
    /// A worker `result`, when given, replaces the locally collected suites
    /// and tests. Only one pass runs per plugin; later calls fail with
    /// [`ReportError::AlreadyReported`].
    pub async fn report(&self, result: Option<&AggregatedResult>) -> ReportResult<PassSummary> {
        if self.reported.swap(true, Ordering::SeqCst) {
            return Err(ReportError::AlreadyReported);
        }

        let input = {
            let mut aggregator = self.aggregator.lock().await;
            if let Some(result) = result {
                aggregator.merge(result);
            }
            debug!(
                "Reporting {} suites, {} tests ({} steps seen)",
                aggregator.suites().len(),
                aggregator.test_count(),
                aggregator.steps().len()
            );
            aggregator.pass_input(self.config.reporter.derive_test_status)
        };

        let summary = run_reporting_pass(
            self.client.as_ref(),
            &self.config,
            &self.attachments,
            input,
        )
        .await?;
        *self.summary.lock().unwrap() = Some(summary.clone());
        Ok(summary)
    }

    async fn report_and_log(&self, result: Option<&AggregatedResult>) {
        match self.report(result).await {
            Ok(summary) => info!(
                "Reported {} suites, {} tests, {} steps",
                summary.suites, summary.tests, summary.steps
            ),
            Err(e) => error!("Reporting failed: {}", e),
        }
    }
}

#[async_trait]
impl RunListener for ReportPortalPlugin {
    async fn on_suite_discovered(&self, suite: &Suite) {
        if self.is_enabled() {
            self.aggregator.lock().await.suite_discovered(suite);
        }
    }

    async fn on_step_passed(&self, step: &Step) {
        if self.is_enabled() {
            self.aggregator.lock().await.step_passed(step);
        }
    }

    async fn on_step_failed(&self, step: &Step) {
        if self.is_enabled() {
            self.aggregator.lock().await.step_failed(step);
        }
    }

    async fn on_test_started(&self, test: &Test) {
        if !self.is_enabled() {
            return;
        }
        debug!("Test started: {}", test.title);
        if let Some(recorder) = self.attachments.recorder()
            && let Err(e) = recorder.start_record().await
        {
            warn!("Failed to start screen recording for '{}': {}", test.title, e);
        }
    }

    async fn on_test_passed(&self, test: &Test) {
        if self.is_enabled() {
            self.aggregator.lock().await.test_passed(test);
        }
    }

    async fn on_test_failed(&self, test: &Test, err: Option<&ErrorInfo>) {
        if self.is_enabled() {
            self.aggregator.lock().await.test_failed(test, err);
        }
    }

    async fn on_test_finished(&self, test: &Test) {
        if !self.is_enabled() {
            return;
        }
        debug!("Test finished: {}", test.title);
        if let Some(recorder) = self.attachments.recorder() {
            let file = self.attachments.record_file(&test.uid);
            if let Err(e) = recorder.stop_record(&file).await {
                warn!("Failed to stop screen recording for '{}': {}", test.title, e);
            }
        }
    }

    async fn on_workers_result(&self, result: &AggregatedResult) {
        if self.is_enabled() {
            self.report_and_log(Some(result)).await;
        }
    }

    async fn on_run_complete(&self) {
        if !self.is_enabled() {
            return;
        }
        if self.config.reporter.runs_with_workers {
            debug!("Running with workers; waiting for the worker result");
            return;
        }
        self.report_and_log(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{AttachmentResult, ScreenRecorder};
    use crate::client::RecordingClient;
    use crate::model::ReportStatus;
    use std::path::{Path, PathBuf};

    fn enabled_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.reporter.enabled = true;
        config.artifacts.result_link_file = dir.join("env.sh");
        config.artifacts.output_dir = dir.to_path_buf();
        config.artifacts.record_dir = dir.to_path_buf();
        config
    }

    struct FakeRecorder {
        stopped: StdMutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ScreenRecorder for FakeRecorder {
        async fn start_record(&self) -> AttachmentResult<()> {
            Ok(())
        }

        async fn stop_record(&self, file_name: &Path) -> AttachmentResult<()> {
            tokio::fs::write(file_name, b"mp4").await.unwrap();
            self.stopped.lock().unwrap().push(file_name.to_path_buf());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_disabled_plugin_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = enabled_config(dir.path());
        config.reporter.enabled = false;
        let client = Arc::new(RecordingClient::new());
        let plugin = ReportPortalPlugin::new(
            config,
            client.clone(),
            AttachmentCollector::new(dir.path(), dir.path()),
        );

        plugin.on_suite_discovered(&Suite::new("S")).await;
        plugin.on_run_complete().await;

        assert!(client.calls().is_empty());
        assert!(plugin.summary().is_none());
    }

    #[tokio::test]
    async fn test_single_process_run_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::new());
        let plugin = ReportPortalPlugin::new(
            enabled_config(dir.path()),
            client.clone(),
            AttachmentCollector::new(dir.path(), dir.path()),
        );

        plugin.on_suite_discovered(&Suite::new("S")).await;
        plugin.on_test_passed(&Test::new("1", "T", "S")).await;
        plugin.on_run_complete().await;

        let test = client.item_named("T").unwrap();
        assert_eq!(client.finished_status(&test), Some(ReportStatus::Failed));
        assert_eq!(plugin.summary().unwrap().tests, 1);
        assert!(matches!(
            plugin.report(None).await,
            Err(ReportError::AlreadyReported)
        ));
    }

    #[tokio::test]
    async fn test_runs_with_workers_ignores_single_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = enabled_config(dir.path());
        config.reporter.runs_with_workers = true;
        let client = Arc::new(RecordingClient::new());
        let plugin = ReportPortalPlugin::new(
            config,
            client.clone(),
            AttachmentCollector::new(dir.path(), dir.path()),
        );

        plugin.on_suite_discovered(&Suite::new("S")).await;
        plugin.on_run_complete().await;

        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recording_is_attached_to_test() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(FakeRecorder {
            stopped: StdMutex::new(Vec::new()),
        });
        let attachments =
            AttachmentCollector::new(dir.path(), dir.path()).with_recorder(recorder.clone());
        let client = Arc::new(RecordingClient::new());
        let plugin = ReportPortalPlugin::new(enabled_config(dir.path()), client.clone(), attachments);

        let test = Test::new("42", "T", "S");
        plugin.on_suite_discovered(&Suite::new("S")).await;
        plugin.on_test_started(&test).await;
        plugin.on_test_failed(&test, None).await;
        plugin.on_test_finished(&test).await;
        plugin.on_run_complete().await;

        let record = dir.path().join("record-test-42.mp4");
        assert_eq!(*recorder.stopped.lock().unwrap(), vec![record.clone()]);
        assert!(!record.exists());

        let item = client.item_named("T").unwrap();
        let logs = client.logs_for(&item);
        assert_eq!(logs.len(), 1);
        assert!(matches!(
            &logs[0],
            crate::client::ClientCall::SendLog { attachment: Some(name), .. }
                if name == "record-test-42.mp4"
        ));
    }
}
