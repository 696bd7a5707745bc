//! The reporting pass.
//!
//! One pass reports one run, start to finish:
//!
//! 1. Open the launch.
//! 2. Start and finish one SUITE item per suite title.
//! 3. Start one TEST item per test under its suite, attach its screen
//!    recording, finish it.
//! 4. Walk each test's steps: open wrapping meta-steps, report the STEP item,
//!    log failures with a screenshot, then close the meta-steps.
//! 5. Finish the launch and persist its permalink.
//!
//! With `strict_nesting` enabled, suites and tests stay open until all of
//! their children are finished.
//!
//! Every backend call is awaited before the next one is made: a child needs
//! its parent's id.

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::{
    LookupError, MetaStepRegistry, PassInput, PassSummary, RESULT_LINK_VAR, ReportError,
    ReportResult, ReportedTest, finish_item, start_item,
};
use crate::attachment::{Attachment, AttachmentCollector};
use crate::client::{FinishLaunch, ItemId, LaunchOptions, LogEntry, LogLevel, ReportClient};
use crate::config::Config;
use crate::model::{ErrorInfo, ItemType, ReportStatus};

const UNNAMED_LAUNCH: &str = "Unnamed launch";

/// Runs a complete reporting pass against `client`.
///
/// Backend failures on individual items are logged and the pass continues.
/// The launch is always finished once it was opened; lookup failures are
/// returned afterwards as [`ReportError::Lookup`].
///
/// # Example
///
/// ```no_run
/// use treeport::attachment::AttachmentCollector;
/// use treeport::client::RecordingClient;
/// use treeport::config::Config;
/// use treeport::report::{PassInput, run_reporting_pass};
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = RecordingClient::new();
/// let config = Config::default();
/// let attachments = AttachmentCollector::new("output", "output");
///
/// let summary = run_reporting_pass(&client, &config, &attachments, PassInput::default()).await?;
/// println!("Reported {} tests: {:?}", summary.tests, summary.link);
/// # Ok(())
/// # }
/// ```
pub async fn run_reporting_pass(
    client: &dyn ReportClient,
    config: &Config,
    attachments: &AttachmentCollector,
    input: PassInput,
) -> ReportResult<PassSummary> {
    ReportingPass::open(client, config, attachments, &input)
        .await?
        .run(input)
        .await
}

/// State of one reporting pass.
///
/// Owns the suite id map and the per-test meta-step registry; both are
/// dropped with the pass.
pub struct ReportingPass<'a> {
    client: &'a dyn ReportClient,
    config: &'a Config,
    attachments: &'a AttachmentCollector,
    launch: ItemId,
    suites: Vec<(String, Option<ItemId>)>,
    meta_steps: MetaStepRegistry,
    lookup_failures: Vec<LookupError>,
    summary: PassSummary,
}

impl<'a> ReportingPass<'a> {
    /// Opens the launch. Failing here aborts the pass.
    pub async fn open(
        client: &'a dyn ReportClient,
        config: &'a Config,
        attachments: &'a AttachmentCollector,
        input: &PassInput,
    ) -> ReportResult<ReportingPass<'a>> {
        let name = config
            .launch
            .name
            .clone()
            .or_else(|| input.suites.first().cloned())
            .unwrap_or_else(|| UNNAMED_LAUNCH.to_string());

        let options = LaunchOptions {
            name,
            description: config.launch.description.clone(),
            attributes: config.launch.attributes.clone(),
            rerun: config.launch.rerun,
            rerun_of: config.launch.rerun_of.clone(),
            start_time: client.now(),
        };

        let launch = client
            .start_launch(&options)
            .await
            .map_err(ReportError::LaunchStart)?;
        info!("Started launch '{}' ({})", options.name, launch);

        Ok(Self {
            client,
            config,
            attachments,
            launch: launch.clone(),
            suites: Vec::new(),
            meta_steps: MetaStepRegistry::new(),
            lookup_failures: Vec::new(),
            summary: PassSummary::new(launch),
        })
    }

    /// Reports every suite and test, then seals the launch.
    pub async fn run(mut self, input: PassInput) -> ReportResult<PassSummary> {
        let strict = self.config.reporter.strict_nesting;

        for title in &input.suites {
            self.report_suite(title, !strict).await;
        }

        let mut reported = Vec::new();
        for test in &input.tests {
            if test.status.is_failed() {
                self.summary.status = ReportStatus::Failed;
            }
            if let Some(item) = self.report_test(test, strict).await {
                reported.push((item, test));
            }
        }

        if strict {
            self.finish_suites().await;
        } else {
            for (item, test) in reported {
                self.report_steps(&item, test).await;
            }
        }

        self.summary.meta_steps = self.meta_steps.started();
        self.summary.client_failures += self.meta_steps.client_failures();
        self.finish_launch().await?;

        let mut failures = std::mem::take(&mut self.lookup_failures).into_iter();
        match failures.next() {
            Some(first) => {
                let others = failures.len();
                if others > 0 {
                    error!("{} more broken parent lookups in this pass", others);
                }
                Err(ReportError::Lookup(first))
            }
            None => Ok(self.summary),
        }
    }

    async fn report_suite(&mut self, title: &str, finish_now: bool) {
        match start_item(self.client, &self.launch, title, ItemType::Suite, None).await {
            Ok(item) => {
                debug!("{}: suite '{}' started", item, title);
                self.summary.suites += 1;
                if finish_now {
                    self.finish(&item, ReportStatus::Passed).await;
                }
                self.suites.push((title.to_string(), Some(item)));
            }
            Err(e) => {
                error!("Failed to start suite '{}': {}", title, e);
                self.summary.client_failures += 1;
                self.suites.push((title.to_string(), None));
            }
        }
    }

    async fn finish_suites(&mut self) {
        let items: Vec<ItemId> = self
            .suites
            .iter()
            .filter_map(|(_, item)| item.clone())
            .collect();
        for item in items {
            self.finish(&item, ReportStatus::Passed).await;
        }
    }

    /// Id of the suite a test declares as its parent.
    fn suite_item(&self, test: &ReportedTest) -> Result<ItemId, LookupError> {
        let suite = &test.test.parent;
        let (_, item) = self
            .suites
            .iter()
            .find(|(title, _)| title == suite)
            .ok_or_else(|| LookupError::UnknownSuite {
                test: test.test.title.clone(),
                suite: suite.clone(),
            })?;
        item.clone().ok_or_else(|| LookupError::MissingItem {
            what: format!("suite '{}'", suite),
        })
    }

    /// Starts a test item. In strict mode its steps are reported before the
    /// test is finished; otherwise the caller reports them later.
    async fn report_test(&mut self, test: &ReportedTest, strict: bool) -> Option<ItemId> {
        let parent = match self.suite_item(test) {
            Ok(parent) => parent,
            Err(e) => {
                self.lookup_failed(e);
                return None;
            }
        };

        let item = match start_item(
            self.client,
            &self.launch,
            &test.test.title,
            ItemType::Test,
            Some(&parent),
        )
        .await
        {
            Ok(item) => item,
            Err(e) => {
                error!("Failed to start test '{}': {}", test.test.title, e);
                self.summary.client_failures += 1;
                if !test.test.steps.is_empty() {
                    self.lookup_failed(LookupError::MissingItem {
                        what: format!("test '{}'", test.test.title),
                    });
                }
                return None;
            }
        };
        debug!("{}: test '{}' started ({})", item, test.test.title, test.status);
        self.summary.tests += 1;

        let record_file = self.attachments.record_file(&test.test.uid);
        if tokio::fs::try_exists(&record_file).await.unwrap_or(false)
            && let Some(record) = self.attachments.screen_record(&record_file).await
        {
            self.send_log(&item, LogLevel::Debug, "Screen record".to_string(), Some(&record))
                .await;
            debug!("Sent screen record {}", record_file.display());
        }

        if strict {
            self.report_steps(&item, test).await;
        }
        self.finish(&item, test.status.clone()).await;
        Some(item)
    }

    async fn report_steps(&mut self, test_item: &ItemId, test: &ReportedTest) {
        for step in &test.test.steps {
            let parent = match self
                .meta_steps
                .ensure_open(self.client, &self.launch, step, test_item)
                .await
            {
                Ok(Some(meta)) => meta,
                Ok(None) => test_item.clone(),
                Err(e) => {
                    self.lookup_failed(e);
                    continue;
                }
            };

            let title = step.title();
            let item = match start_item(
                self.client,
                &self.launch,
                &title,
                ItemType::Step,
                Some(&parent),
            )
            .await
            {
                Ok(item) => item,
                Err(e) => {
                    error!("Failed to start step '{}': {}", title, e);
                    self.summary.client_failures += 1;
                    continue;
                }
            };
            self.summary.steps += 1;

            let status = step.report_status();
            self.finish(&item, status.clone()).await;

            if status.is_failed() {
                // Fall back to the test's error.
                let err = step.err.as_ref().or(test.test.err.as_ref());
                if let Some(err) = err {
                    self.log_failure(&item, err, &test.test.title).await;
                }
            }
        }

        self.meta_steps.close_all(self.client).await;
    }

    async fn log_failure(&mut self, item: &ItemId, err: &ErrorInfo, test_title: &str) {
        self.send_log(
            item,
            LogLevel::Error,
            format!("[FAILED STEP] - {}", err.render()),
            None,
        )
        .await;

        let file_name = AttachmentCollector::failure_screenshot_name(test_title);
        let screenshot = self
            .attachments
            .screenshot(Some(&file_name), self.client.now())
            .await;
        self.send_log(
            item,
            LogLevel::Debug,
            "Last seen screenshot".to_string(),
            screenshot.as_ref(),
        )
        .await;
    }

    async fn send_log(
        &mut self,
        item: &ItemId,
        level: LogLevel,
        message: String,
        attachment: Option<&Attachment>,
    ) {
        let entry = LogEntry {
            level,
            message,
            time: self.client.now(),
        };
        match self.client.send_log(item, &entry, attachment).await {
            Ok(()) => self.summary.logs += 1,
            Err(e) => {
                error!("Failed to send log for {}: {}", item, e);
                self.summary.client_failures += 1;
            }
        }
    }

    async fn finish(&mut self, item: &ItemId, status: ReportStatus) {
        if !finish_item(self.client, item, status).await {
            self.summary.client_failures += 1;
        }
    }

    fn lookup_failed(&mut self, e: LookupError) {
        error!("{}", e);
        self.lookup_failures.push(e);
    }

    async fn finish_launch(&mut self) -> ReportResult<()> {
        let finish = FinishLaunch {
            end_time: self.client.now(),
            status: self.summary.status.clone(),
        };
        debug!("{}: finishing launch ({})", self.launch, finish.status);

        let receipt = match self.client.finish_launch(&self.launch, &finish).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Failed to finish launch {}: {}", self.launch, e);
                self.summary.client_failures += 1;
                return Ok(());
            }
        };
        info!("Launch finished: {}", receipt.link);

        let path = self.config.artifacts.result_link_path();
        persist_result_link(&path, &receipt.link).await?;
        self.summary.link = Some(receipt.link);
        Ok(())
    }
}

/// Writes a shell-sourceable file exporting the launch permalink.
pub async fn persist_result_link(path: &Path, link: &str) -> ReportResult<()> {
    let persist_err = |source| ReportError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !tokio::fs::try_exists(parent).await.unwrap_or(false)
    {
        warn!("Creating directory for result link: {}", parent.display());
        tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
    }

    let content = format!("export {}=\"{}\"\n", RESULT_LINK_VAR, link);
    tokio::fs::write(path, content).await.map_err(persist_err)?;
    debug!("Result link written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientCall, RecordingClient};
    use crate::model::{MetaStep, Step, Test};

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.artifacts.result_link_file = dir.join("result_env.sh");
        config.artifacts.output_dir = dir.to_path_buf();
        config.artifacts.record_dir = dir.to_path_buf();
        config
    }

    fn input(suites: &[&str], tests: Vec<ReportedTest>) -> PassInput {
        PassInput {
            suites: suites.iter().map(|s| s.to_string()).collect(),
            tests,
        }
    }

    #[tokio::test]
    async fn test_zero_step_test_is_finished() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        let summary = run_reporting_pass(
            &client,
            &config,
            &attachments,
            input(
                &["S1"],
                vec![ReportedTest::new(Test::new("1", "T1", "S1"), ReportStatus::Passed)],
            ),
        )
        .await
        .unwrap();

        let test = client.item_named("T1").unwrap();
        assert_eq!(client.finished_status(&test), Some(ReportStatus::Passed));
        assert_eq!(summary.steps, 0);
        assert_eq!(summary.tests, 1);
    }

    #[tokio::test]
    async fn test_link_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        let summary = run_reporting_pass(&client, &config, &attachments, input(&["S1"], vec![]))
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("result_env.sh")).unwrap();
        let link = summary.link.unwrap();
        assert_eq!(
            content,
            format!("export REPORT_PORTAL_RESULT_LINK=\"{}\"\n", link)
        );
    }

    #[tokio::test]
    async fn test_launch_name_falls_back_to_first_suite() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        run_reporting_pass(&client, &config, &attachments, input(&["Checkout", "Auth"], vec![]))
            .await
            .unwrap();

        assert!(matches!(
            &client.calls()[0],
            ClientCall::StartLaunch { name, .. } if name == "Checkout"
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_aborts_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new().fail_launch();

        let result = run_reporting_pass(&client, &config, &attachments, input(&["S1"], vec![])).await;

        assert!(matches!(result, Err(ReportError::LaunchStart(_))));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_test_error_logged_on_failed_step_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        let test = Test::new("1", "T1", "S1")
            .with_error(ErrorInfo::new("expected title").with_stack("AssertionError: expected title"))
            .with_step(Step::new("I", "see").with_status("failed"));
        run_reporting_pass(
            &client,
            &config,
            &attachments,
            input(&["S1"], vec![ReportedTest::new(test, ReportStatus::Failed)]),
        )
        .await
        .unwrap();

        let step = client.item_named("[STEP] - I see {}").unwrap();
        let logs = client.logs_for(&step);
        assert_eq!(logs.len(), 2);
        assert!(matches!(
            &logs[0],
            ClientCall::SendLog { level: LogLevel::Error, message, .. }
                if message == "[FAILED STEP] - AssertionError: expected title"
        ));
    }

    #[tokio::test]
    async fn test_meta_steps_closed_after_each_test() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        // Same wrapper occurrence in two tests: one item per test.
        let wrapper = MetaStep::new("loginPage", "login", 7);
        let t1 = Test::new("1", "T1", "S1").with_step(Step::new("I", "click").within(wrapper.clone()));
        let t2 = Test::new("2", "T2", "S1").with_step(Step::new("I", "click").within(wrapper));
        let summary = run_reporting_pass(
            &client,
            &config,
            &attachments,
            input(
                &["S1"],
                vec![
                    ReportedTest::new(t1, ReportStatus::Passed),
                    ReportedTest::new(t2, ReportStatus::Passed),
                ],
            ),
        )
        .await
        .unwrap();

        assert_eq!(client.start_count("loginPage login"), 2);
        assert_eq!(summary.meta_steps, 2);
    }

    #[tokio::test]
    async fn test_strict_nesting_finishes_children_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.reporter.strict_nesting = true;
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        let test = Test::new("1", "T1", "S1").with_step(Step::new("I", "click"));
        run_reporting_pass(
            &client,
            &config,
            &attachments,
            input(&["S1"], vec![ReportedTest::new(test, ReportStatus::Passed)]),
        )
        .await
        .unwrap();

        let suite = client.item_named("S1").unwrap();
        let test = client.item_named("T1").unwrap();
        let step = client.item_named("[STEP] - I click {}").unwrap();
        let finishes: Vec<ItemId> = client
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ClientCall::FinishItem { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(finishes, vec![step, test, suite]);
    }

    #[tokio::test]
    async fn test_launch_status_failed_when_any_test_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let attachments = AttachmentCollector::new(dir.path(), dir.path());
        let client = RecordingClient::new();

        let summary = run_reporting_pass(
            &client,
            &config,
            &attachments,
            input(
                &["S1"],
                vec![
                    ReportedTest::new(Test::new("1", "T1", "S1"), ReportStatus::Passed),
                    ReportedTest::new(Test::new("2", "T2", "S1"), ReportStatus::Failed),
                ],
            ),
        )
        .await
        .unwrap();

        assert_eq!(summary.status, ReportStatus::Failed);
        assert!(matches!(
            client.calls().last(),
            Some(ClientCall::FinishLaunch { status: ReportStatus::Failed, .. })
        ));
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let target = dir.path().join("taken");
        std::fs::create_dir(&target).unwrap();

        let result = persist_result_link(&target, "memory://x").await;
        assert!(matches!(result, Err(ReportError::Persist { .. })));
    }
}
