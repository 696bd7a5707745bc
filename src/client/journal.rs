//! Client that journals every backend call to a JSON-lines file.
//!
//! Each call becomes one line such as:
//!
//! ```text
//! {"op":"start_item","id":"5b0c…","launch":"9a1e…","parent":null,"item":{"name":"Auth","type":"SUITE",…}}
//! {"op":"finish_item","id":"5b0c…","finish":{"end_time":1718000000000,"status":"PASSED"}}
//! ```
//!
//! Attachments are journaled by name, MIME type and size only.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ClientResult, FinishItem, FinishLaunch, ItemDescriptor, ItemId, LaunchOptions, LaunchReceipt,
    LogEntry, ReportClient, launch_link,
};
use crate::attachment::Attachment;

/// Appends every call to a journal file and hands out UUID ids.
pub struct JournalClient {
    path: PathBuf,
    file: Mutex<File>,
    endpoint: String,
    project: String,
}

impl JournalClient {
    /// Opens (or creates) the journal at `path` in append mode.
    ///
    /// `endpoint` and `project` are only used to build launch permalinks.
    pub async fn create(
        path: impl Into<PathBuf>,
        endpoint: impl Into<String>,
        project: impl Into<String>,
    ) -> ClientResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            endpoint: endpoint.into(),
            project: project.into(),
        })
    }

    async fn append(&self, record: Value) -> ClientResult<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn new_id() -> ItemId {
        ItemId::new(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl ReportClient for JournalClient {
    async fn start_launch(&self, options: &LaunchOptions) -> ClientResult<ItemId> {
        let id = Self::new_id();
        self.append(json!({ "op": "start_launch", "id": id, "launch": options }))
            .await?;
        debug!("Journaled launch {} to {}", id, self.path.display());
        Ok(id)
    }

    async fn start_test_item(
        &self,
        item: &ItemDescriptor,
        launch: &ItemId,
        parent: Option<&ItemId>,
    ) -> ClientResult<ItemId> {
        let id = Self::new_id();
        self.append(json!({
            "op": "start_item",
            "id": id,
            "launch": launch,
            "parent": parent,
            "item": item,
        }))
        .await?;
        Ok(id)
    }

    async fn finish_test_item(&self, item: &ItemId, finish: &FinishItem) -> ClientResult<()> {
        self.append(json!({ "op": "finish_item", "id": item, "finish": finish }))
            .await
    }

    async fn send_log(
        &self,
        item: &ItemId,
        entry: &LogEntry,
        attachment: Option<&Attachment>,
    ) -> ClientResult<()> {
        let attachment = attachment.map(|a| {
            json!({ "name": a.name, "type": a.mime_type, "size": a.content.len() })
        });
        self.append(json!({
            "op": "send_log",
            "id": item,
            "log": entry,
            "attachment": attachment,
        }))
        .await
    }

    async fn finish_launch(
        &self,
        launch: &ItemId,
        finish: &FinishLaunch,
    ) -> ClientResult<LaunchReceipt> {
        let link = launch_link(&self.endpoint, &self.project, launch);
        self.append(json!({
            "op": "finish_launch",
            "id": launch,
            "finish": finish,
            "link": link,
        }))
        .await?;
        Ok(LaunchReceipt { link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LogLevel;
    use crate::model::{ItemType, ReportStatus};

    #[tokio::test]
    async fn test_journal_writes_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal/calls.jsonl");
        let client = JournalClient::create(&path, "https://rp.example.com/api/v1", "web")
            .await
            .unwrap();

        let launch = client
            .start_launch(&LaunchOptions {
                name: "nightly".to_string(),
                description: String::new(),
                attributes: Vec::new(),
                rerun: false,
                rerun_of: None,
                start_time: 1,
            })
            .await
            .unwrap();
        let suite = client
            .start_test_item(&ItemDescriptor::new("Auth", ItemType::Suite, 2), &launch, None)
            .await
            .unwrap();
        client
            .send_log(
                &suite,
                &LogEntry {
                    level: LogLevel::Debug,
                    message: "hello".to_string(),
                    time: 3,
                },
                Some(&Attachment::new("shot.png", "image/png", vec![1, 2, 3])),
            )
            .await
            .unwrap();
        let receipt = client
            .finish_launch(
                &launch,
                &FinishLaunch {
                    end_time: 4,
                    status: ReportStatus::Passed,
                },
            )
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1]["item"]["type"], "SUITE");
        assert_eq!(lines[2]["attachment"]["size"], 3);
        assert_eq!(lines[3]["finish"]["status"], "PASSED");
        assert!(receipt.link.ends_with(launch.as_str()));
    }
}
