//! Runner lifecycle events and the listeners receiving them.
//!
//! The host test runner drives a [`RunListener`] with one callback per event.
//! Events can also be replayed from data: [`RunnerEvent`] is the serialized
//! form of a callback and [`dispatch`] routes it to the matching method.
//!
//! ```text
//! {"event":"suite_discovered","suite":{"title":"Auth"}}
//! {"event":"test_started","test":{"uid":"1","title":"logs in","parent":"Auth"}}
//! {"event":"step_passed","step":{"actor":"I","name":"amOnPage","args":["/login"]}}
//! {"event":"test_passed","test":{...}}
//! {"event":"run_completed_single"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{AggregatedResult, ErrorInfo, Step, Suite, Test};

/// A listener receives events during a test run.
#[async_trait]
pub trait RunListener: Send + Sync {
    /// Called when the runner enters a suite.
    async fn on_suite_discovered(&self, suite: &Suite);

    /// Called when a step passes.
    async fn on_step_passed(&self, step: &Step);

    /// Called when a step fails.
    async fn on_step_failed(&self, step: &Step);

    /// Called when a test starts running.
    async fn on_test_started(&self, test: &Test);

    /// Called when a test passes.
    async fn on_test_passed(&self, test: &Test);

    /// Called when a test fails.
    async fn on_test_failed(&self, test: &Test, err: Option<&ErrorInfo>);

    /// Called when a test has finished, whatever its outcome.
    async fn on_test_finished(&self, test: &Test);

    /// Called once with the merged result of a run sharded across workers.
    async fn on_workers_result(&self, result: &AggregatedResult);

    /// Called when a run has completed.
    async fn on_run_complete(&self);
}

/// A runner event as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    SuiteDiscovered {
        suite: Suite,
    },
    StepPassed {
        step: Step,
    },
    StepFailed {
        step: Step,
    },
    TestStarted {
        test: Test,
    },
    TestPassed {
        test: Test,
    },
    TestFailed {
        test: Test,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<ErrorInfo>,
    },
    TestFinished {
        test: Test,
    },
    RunCompletedWorkers {
        result: AggregatedResult,
    },
    RunCompletedSingle,
}

/// Routes an event to the matching listener callback.
pub async fn dispatch(listener: &dyn RunListener, event: &RunnerEvent) {
    match event {
        RunnerEvent::SuiteDiscovered { suite } => listener.on_suite_discovered(suite).await,
        RunnerEvent::StepPassed { step } => listener.on_step_passed(step).await,
        RunnerEvent::StepFailed { step } => listener.on_step_failed(step).await,
        RunnerEvent::TestStarted { test } => listener.on_test_started(test).await,
        RunnerEvent::TestPassed { test } => listener.on_test_passed(test).await,
        RunnerEvent::TestFailed { test, err } => {
            listener.on_test_failed(test, err.as_ref()).await
        }
        RunnerEvent::TestFinished { test } => listener.on_test_finished(test).await,
        RunnerEvent::RunCompletedWorkers { result } => listener.on_workers_result(result).await,
        RunnerEvent::RunCompletedSingle => listener.on_run_complete().await,
    }
}
