//! Collecting suites, tests and steps while a run is in progress.
//!
//! The aggregator has two sources of truth:
//!
//! - **Local events**: suites and tests observed one by one in this process.
//! - **Worker result**: when tests are sharded across worker processes, this
//!   process never sees individual test events, only the merged summary.
//!   That summary replaces the locally collected tests.

use std::collections::HashSet;

use crate::model::{AggregatedResult, ErrorInfo, ReportStatus, Step, Suite, Test};
use crate::report::{PassInput, ReportedTest};

/// How a collected test was reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
}

/// A test together with the event that delivered it.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedTest {
    pub test: Test,
    pub outcome: TestOutcome,
}

/// Where the tests of the next pass come from.
#[derive(Debug, Clone, PartialEq)]
enum TestSource {
    Local(Vec<CollectedTest>),
    Workers { passed: Vec<Test>, failed: Vec<Test> },
}

/// Accumulates runner events until the run completes.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    suites: Vec<String>,
    known: HashSet<String>,
    steps: Vec<Step>,
    tests: TestSource,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            suites: Vec::new(),
            known: HashSet::new(),
            steps: Vec::new(),
            tests: TestSource::Local(Vec::new()),
        }
    }

    /// Records a suite title. Titles already known are ignored.
    pub fn suite_discovered(&mut self, suite: &Suite) {
        if self.known.insert(suite.title.clone()) {
            self.suites.push(suite.title.clone());
        }
    }

    pub fn step_passed(&mut self, step: &Step) {
        self.steps.push(step.clone());
    }

    pub fn step_failed(&mut self, step: &Step) {
        self.steps.push(step.clone());
    }

    pub fn test_passed(&mut self, test: &Test) {
        self.collect(test.clone(), TestOutcome::Passed);
    }

    /// Records a failed test. `err` is kept when the test carries none.
    pub fn test_failed(&mut self, test: &Test, err: Option<&ErrorInfo>) {
        let mut test = test.clone();
        if test.err.is_none() {
            test.err = err.cloned();
        }
        self.collect(test, TestOutcome::Failed);
    }

    /// Takes the merged result of a sharded run as the authority on tests.
    ///
    /// The result's suites and its passed and failed groups replace whatever
    /// was collected locally.
    pub fn merge(&mut self, result: &AggregatedResult) {
        self.suites.clear();
        self.known.clear();
        for suite in &result.suites {
            self.suite_discovered(suite);
        }
        self.tests = TestSource::Workers {
            passed: result.tests.passed.clone(),
            failed: result.tests.failed.clone(),
        };
    }

    /// Suite titles in discovery order.
    pub fn suites(&self) -> &[String] {
        &self.suites
    }

    /// Every step seen, in order. Only used for diagnostics.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of tests the next pass would report.
    pub fn test_count(&self) -> usize {
        match &self.tests {
            TestSource::Local(tests) => tests.len(),
            TestSource::Workers { passed, failed } => passed.len() + failed.len(),
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self.tests, TestSource::Workers { .. })
    }

    /// Builds the input of a reporting pass.
    ///
    /// Worker results report passed tests first, then failed ones. Locally
    /// collected tests are all reported as failed, because a single-process
    /// run cannot tell reliably which test a failing step belonged to,
    /// unless `derive_status` asks to trust the delivering event instead.
    pub fn pass_input(&self, derive_status: bool) -> PassInput {
        let tests = match &self.tests {
            TestSource::Workers { passed, failed } => passed
                .iter()
                .map(|t| ReportedTest::new(t.clone(), ReportStatus::Passed))
                .chain(
                    failed
                        .iter()
                        .map(|t| ReportedTest::new(t.clone(), ReportStatus::Failed)),
                )
                .collect(),
            TestSource::Local(tests) => tests
                .iter()
                .map(|collected| {
                    let status = match (derive_status, collected.outcome) {
                        (true, TestOutcome::Passed) => ReportStatus::Passed,
                        _ => ReportStatus::Failed,
                    };
                    ReportedTest::new(collected.test.clone(), status)
                })
                .collect(),
        };

        PassInput {
            suites: self.suites.clone(),
            tests,
        }
    }

    fn collect(&mut self, test: Test, outcome: TestOutcome) {
        match &mut self.tests {
            TestSource::Local(tests) => tests.push(CollectedTest { test, outcome }),
            // The worker result is authoritative once merged.
            TestSource::Workers { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AggregatedTests;

    #[test]
    fn test_duplicate_suites_collapse() {
        let mut aggregator = ResultAggregator::new();
        aggregator.suite_discovered(&Suite::new("Auth"));
        aggregator.suite_discovered(&Suite::new("Cart"));
        aggregator.suite_discovered(&Suite::new("Auth"));

        assert_eq!(aggregator.suites(), ["Auth", "Cart"]);
    }

    #[test]
    fn test_local_tests_are_conservatively_failed() {
        let mut aggregator = ResultAggregator::new();
        aggregator.test_passed(&Test::new("1", "T1", "S"));
        aggregator.test_failed(&Test::new("2", "T2", "S"), Some(&ErrorInfo::new("boom")));

        let input = aggregator.pass_input(false);
        assert_eq!(input.tests.len(), 2);
        assert!(input.tests.iter().all(|t| t.status == ReportStatus::Failed));
        assert_eq!(input.tests[1].test.err, Some(ErrorInfo::new("boom")));
    }

    #[test]
    fn test_derived_status_follows_events() {
        let mut aggregator = ResultAggregator::new();
        aggregator.test_passed(&Test::new("1", "T1", "S"));
        aggregator.test_failed(&Test::new("2", "T2", "S"), None);

        let input = aggregator.pass_input(true);
        assert_eq!(input.tests[0].status, ReportStatus::Passed);
        assert_eq!(input.tests[1].status, ReportStatus::Failed);
    }

    #[test]
    fn test_test_error_is_not_overwritten() {
        let mut aggregator = ResultAggregator::new();
        let test = Test::new("1", "T1", "S").with_error(ErrorInfo::new("original"));
        aggregator.test_failed(&test, Some(&ErrorInfo::new("event")));

        let input = aggregator.pass_input(false);
        assert_eq!(input.tests[0].test.err, Some(ErrorInfo::new("original")));
    }

    #[test]
    fn test_merge_replaces_local_tests() {
        let mut aggregator = ResultAggregator::new();
        aggregator.suite_discovered(&Suite::new("Local"));
        aggregator.test_passed(&Test::new("0", "local only", "Local"));

        aggregator.merge(&AggregatedResult {
            suites: vec![Suite::new("S1"), Suite::new("Local")],
            tests: AggregatedTests {
                passed: vec![Test::new("1", "T1", "S1")],
                failed: vec![Test::new("2", "T2", "S1")],
            },
        });
        aggregator.test_passed(&Test::new("3", "late", "S1"));

        let input = aggregator.pass_input(false);
        assert!(aggregator.is_sharded());
        assert_eq!(input.suites, vec!["S1", "Local"]);
        assert_eq!(
            input
                .tests
                .iter()
                .map(|t| (t.test.title.as_str(), t.status.clone()))
                .collect::<Vec<_>>(),
            vec![("T1", ReportStatus::Passed), ("T2", ReportStatus::Failed)]
        );
    }

    #[test]
    fn test_steps_logged_in_order() {
        let mut aggregator = ResultAggregator::new();
        aggregator.step_passed(&Step::new("I", "amOnPage"));
        aggregator.step_failed(&Step::new("I", "see"));

        let names: Vec<_> = aggregator.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["amOnPage", "see"]);
    }
}
