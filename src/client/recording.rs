//! In-memory client that records every call.
//!
//! Used to exercise the reporting pass without a backend. Calls are kept in
//! order so tests can check nesting and start/finish pairing, and individual
//! item names can be made to fail to simulate backend errors.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ClientError, ClientResult, FinishItem, FinishLaunch, ItemDescriptor, ItemId, LaunchOptions,
    LaunchReceipt, LogEntry, LogLevel, ReportClient,
};
use crate::attachment::Attachment;
use crate::model::{ItemType, ReportStatus};

/// One recorded client call.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    StartLaunch {
        id: ItemId,
        name: String,
    },
    StartItem {
        id: ItemId,
        name: String,
        item_type: ItemType,
        parent: Option<ItemId>,
    },
    FinishItem {
        id: ItemId,
        status: ReportStatus,
    },
    SendLog {
        item: ItemId,
        level: LogLevel,
        message: String,
        attachment: Option<String>,
    },
    FinishLaunch {
        id: ItemId,
        status: ReportStatus,
    },
}

#[derive(Default)]
struct State {
    calls: Vec<ClientCall>,
    started: HashSet<ItemId>,
    next_id: usize,
    clock: i64,
}

/// Client keeping every call in memory.
#[derive(Default)]
pub struct RecordingClient {
    state: Mutex<State>,
    failing_names: Vec<String>,
    fail_launch: bool,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `start_test_item` fail for items whose name contains `needle`.
    pub fn fail_on_start(mut self, needle: impl Into<String>) -> Self {
        self.failing_names.push(needle.into());
        self
    }

    /// Makes `start_launch` fail.
    pub fn fail_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// All calls in the order they were made.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Id of the first started item with exactly this name.
    pub fn item_named(&self, name: &str) -> Option<ItemId> {
        self.calls().into_iter().find_map(|call| match call {
            ClientCall::StartItem { id, name: n, .. } if n == name => Some(id),
            _ => None,
        })
    }

    /// Number of `start_test_item` calls whose name equals `name`.
    pub fn start_count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ClientCall::StartItem { name: n, .. } if n == name))
            .count()
    }

    /// Parent of a started item.
    pub fn parent_of(&self, item: &ItemId) -> Option<ItemId> {
        self.calls().into_iter().find_map(|call| match call {
            ClientCall::StartItem { id, parent, .. } if &id == item => parent,
            _ => None,
        })
    }

    /// Status the item was finished with, if it was finished.
    pub fn finished_status(&self, item: &ItemId) -> Option<ReportStatus> {
        self.calls().into_iter().find_map(|call| match call {
            ClientCall::FinishItem { id, status } if &id == item => Some(status),
            _ => None,
        })
    }

    /// Log calls made for an item, in order.
    pub fn logs_for(&self, item: &ItemId) -> Vec<ClientCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ClientCall::SendLog { item: i, .. } if i == item))
            .collect()
    }

    fn next_id(state: &mut State, prefix: &str) -> ItemId {
        state.next_id += 1;
        ItemId::new(format!("{}-{}", prefix, state.next_id))
    }
}

#[async_trait]
impl ReportClient for RecordingClient {
    async fn start_launch(&self, options: &LaunchOptions) -> ClientResult<ItemId> {
        if self.fail_launch {
            return Err(ClientError::Rejected("launch refused".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state, "launch");
        state.started.insert(id.clone());
        state.calls.push(ClientCall::StartLaunch {
            id: id.clone(),
            name: options.name.clone(),
        });
        Ok(id)
    }

    async fn start_test_item(
        &self,
        item: &ItemDescriptor,
        launch: &ItemId,
        parent: Option<&ItemId>,
    ) -> ClientResult<ItemId> {
        if self.failing_names.iter().any(|n| item.name.contains(n.as_str())) {
            return Err(ClientError::Rejected(format!("cannot start '{}'", item.name)));
        }

        let mut state = self.state.lock().unwrap();
        if !state.started.contains(launch) {
            return Err(ClientError::UnknownItem(launch.to_string()));
        }
        if let Some(parent) = parent
            && !state.started.contains(parent)
        {
            return Err(ClientError::UnknownItem(parent.to_string()));
        }

        let id = Self::next_id(&mut state, "item");
        state.started.insert(id.clone());
        state.calls.push(ClientCall::StartItem {
            id: id.clone(),
            name: item.name.clone(),
            item_type: item.item_type,
            parent: parent.cloned(),
        });
        Ok(id)
    }

    async fn finish_test_item(&self, item: &ItemId, finish: &FinishItem) -> ClientResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.started.contains(item) {
            return Err(ClientError::UnknownItem(item.to_string()));
        }
        state.calls.push(ClientCall::FinishItem {
            id: item.clone(),
            status: finish.status.clone(),
        });
        Ok(())
    }

    async fn send_log(
        &self,
        item: &ItemId,
        entry: &LogEntry,
        attachment: Option<&Attachment>,
    ) -> ClientResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.started.contains(item) {
            return Err(ClientError::UnknownItem(item.to_string()));
        }
        state.calls.push(ClientCall::SendLog {
            item: item.clone(),
            level: entry.level,
            message: entry.message.clone(),
            attachment: attachment.map(|a| a.name.clone()),
        });
        Ok(())
    }

    async fn finish_launch(
        &self,
        launch: &ItemId,
        finish: &FinishLaunch,
    ) -> ClientResult<LaunchReceipt> {
        let mut state = self.state.lock().unwrap();
        if !state.started.contains(launch) {
            return Err(ClientError::UnknownItem(launch.to_string()));
        }
        state.calls.push(ClientCall::FinishLaunch {
            id: launch.clone(),
            status: finish.status.clone(),
        });
        Ok(LaunchReceipt {
            link: format!("memory://launches/{}", launch),
        })
    }

    /// Monotonic fake clock so recorded runs are deterministic.
    fn now(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        state.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_options() -> LaunchOptions {
        LaunchOptions {
            name: "run".to_string(),
            description: String::new(),
            attributes: Vec::new(),
            rerun: false,
            rerun_of: None,
            start_time: 0,
        }
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let client = RecordingClient::new();
        let launch = client.start_launch(&launch_options()).await.unwrap();
        let suite = client
            .start_test_item(&ItemDescriptor::new("S1", ItemType::Suite, 1), &launch, None)
            .await
            .unwrap();
        client
            .finish_test_item(
                &suite,
                &FinishItem {
                    end_time: 2,
                    status: ReportStatus::Passed,
                },
            )
            .await
            .unwrap();

        assert_eq!(client.calls().len(), 3);
        assert_eq!(client.item_named("S1"), Some(suite.clone()));
        assert_eq!(client.finished_status(&suite), Some(ReportStatus::Passed));
    }

    #[tokio::test]
    async fn test_fail_on_start_rejects_matching_names() {
        let client = RecordingClient::new().fail_on_start("broken");
        let launch = client.start_launch(&launch_options()).await.unwrap();
        let result = client
            .start_test_item(
                &ItemDescriptor::new("a broken suite", ItemType::Suite, 1),
                &launch,
                None,
            )
            .await;

        assert!(matches!(result, Err(ClientError::Rejected(_))));
        assert_eq!(client.start_count("a broken suite"), 0);
    }

    #[tokio::test]
    async fn test_unknown_parent_is_rejected() {
        let client = RecordingClient::new();
        let launch = client.start_launch(&launch_options()).await.unwrap();
        let ghost = ItemId::new("ghost");
        let result = client
            .start_test_item(
                &ItemDescriptor::new("T", ItemType::Test, 1),
                &launch,
                Some(&ghost),
            )
            .await;

        assert!(matches!(result, Err(ClientError::UnknownItem(_))));
    }

    #[test]
    fn test_clock_is_monotonic() {
        let client = RecordingClient::new();
        let first = client.now();
        assert!(client.now() > first);
    }
}
