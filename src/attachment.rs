//! Failure artifacts: screenshots and screen recordings.
//!
//! The collector reads artifacts from disk and packages them as named
//! binary blobs ready for [`ReportClient::send_log`](crate::client::ReportClient::send_log).
//! Capturing them is up to the UI driver in use, exposed through two
//! optional capabilities:
//!
//! - [`ScreenshotCapability`]: browser and app drivers that can save a screenshot
//! - [`ScreenRecorder`]: mobile drivers that can record the screen
//!
//! A missing capability or an unreadable file never fails the reporting
//! pass; the collector logs the problem and returns `None`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{error, warn};

/// Result type for artifact capture.
pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// Errors raised while capturing or reading an artifact.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    /// The artifact file is missing or unreadable.
    #[error("Attachment unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The driver failed to produce the artifact.
    #[error("Capture failed: {0}")]
    Capture(String),
}

/// A binary blob attached to a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content,
        }
    }
}

/// A UI driver able to save screenshots into the output directory.
#[async_trait]
pub trait ScreenshotCapability: Send + Sync {
    /// Saves a screenshot as `file_name` inside the output directory.
    async fn save_screenshot(&self, file_name: &str) -> AttachmentResult<()>;
}

/// A mobile driver able to record the screen while a test runs.
#[async_trait]
pub trait ScreenRecorder: Send + Sync {
    async fn start_record(&self) -> AttachmentResult<()>;

    /// Stops the current recording and writes it to `file_name`.
    async fn stop_record(&self, file_name: &Path) -> AttachmentResult<()>;
}

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[ /\\:|]"#).expect("static regex is valid")
});

/// Turns a test title into something usable as a file name.
///
/// ```
/// use treeport::attachment::clear_string;
///
/// assert_eq!(clear_string("user: logs in / out"), "user__logs_in___out");
/// assert_eq!(clear_string(r#"shows "<b>" ?"#), "shows_'(b)'_.");
/// ```
pub fn clear_string(value: &str) -> String {
    UNSAFE_CHARS
        .replace_all(value, "_")
        .replace('"', "'")
        .replace('<', "(")
        .replace('>', ")")
        .replace('?', ".")
        .replace('*', "^")
}

/// Packages screenshots and recordings for upload.
#[derive(Clone)]
pub struct AttachmentCollector {
    output_dir: PathBuf,
    record_dir: PathBuf,
    screenshots: Option<Arc<dyn ScreenshotCapability>>,
    recorder: Option<Arc<dyn ScreenRecorder>>,
}

impl AttachmentCollector {
    /// Creates a collector with no capabilities.
    pub fn new(output_dir: impl Into<PathBuf>, record_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            record_dir: record_dir.into(),
            screenshots: None,
            recorder: None,
        }
    }

    pub fn with_screenshots(mut self, capability: Arc<dyn ScreenshotCapability>) -> Self {
        self.screenshots = Some(capability);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ScreenRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&Arc<dyn ScreenRecorder>> {
        self.recorder.as_ref()
    }

    /// Path of the screen recording for a test.
    pub fn record_file(&self, test_uid: &str) -> PathBuf {
        self.record_dir.join(format!("record-test-{}.mp4", test_uid))
    }

    /// File name of the screenshot taken when a test failed.
    pub fn failure_screenshot_name(test_title: &str) -> String {
        format!("{}.failed.png", clear_string(test_title))
    }

    /// Reads and removes a finished screen recording.
    ///
    /// Returns `None` when no recorder is configured or the file cannot be
    /// read.
    pub async fn screen_record(&self, path: &Path) -> Option<Attachment> {
        self.recorder.as_ref()?;

        match read_and_remove(path).await {
            Ok(content) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Some(Attachment::new(clear_string(&name), "video/mp4", content))
            }
            Err(e) => {
                error!("Couldn't find screen record: {}", e);
                None
            }
        }
    }

    /// Returns a screenshot for a failure.
    ///
    /// With a `file_name`, the screenshot already saved by the runner is read
    /// from the output directory. Without one, a fresh screenshot is taken,
    /// read, and removed. Returns `None` when screenshots are not supported or
    /// the file is unavailable.
    pub async fn screenshot(&self, file_name: Option<&str>, now: i64) -> Option<Attachment> {
        let capability = self.screenshots.as_ref()?;

        let result = match file_name {
            Some(name) => {
                let path = self.output_dir.join(name);
                read(&path)
                    .await
                    .map(|content| Attachment::new(name, "image/png", content))
            }
            None => {
                let name = format!("{}_failed.png", now);
                self.capture(capability.as_ref(), &name).await
            }
        };

        match result {
            Ok(attachment) => Some(attachment),
            Err(e) => {
                warn!("Couldn't attach screenshot: {}", e);
                None
            }
        }
    }

    async fn capture(
        &self,
        capability: &dyn ScreenshotCapability,
        name: &str,
    ) -> AttachmentResult<Attachment> {
        capability.save_screenshot(name).await?;
        let content = read_and_remove(&self.output_dir.join(name)).await?;
        Ok(Attachment::new(name, "image/png", content))
    }
}

async fn read(path: &Path) -> AttachmentResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|source| AttachmentError::Unavailable {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_and_remove(path: &Path) -> AttachmentResult<Vec<u8>> {
    let content = read(path).await?;
    tokio::fs::remove_file(path)
        .await
        .map_err(|source| AttachmentError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FileScreenshots {
        dir: PathBuf,
    }

    #[async_trait]
    impl ScreenshotCapability for FileScreenshots {
        async fn save_screenshot(&self, file_name: &str) -> AttachmentResult<()> {
            tokio::fs::write(self.dir.join(file_name), b"png")
                .await
                .map_err(|e| AttachmentError::Capture(e.to_string()))
        }
    }

    struct NoopRecorder;

    #[async_trait]
    impl ScreenRecorder for NoopRecorder {
        async fn start_record(&self) -> AttachmentResult<()> {
            Ok(())
        }

        async fn stop_record(&self, _file_name: &Path) -> AttachmentResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_clear_string() {
        assert_eq!(clear_string("a b/c:d"), "a_b_c_d");
        assert_eq!(clear_string("plain"), "plain");
    }

    #[test]
    fn test_record_file_path() {
        let collector = AttachmentCollector::new("out", "rec");
        assert_eq!(
            collector.record_file("42"),
            PathBuf::from("rec").join("record-test-42.mp4")
        );
    }

    #[tokio::test]
    async fn test_screenshot_without_capability_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.failed.png"), b"png").unwrap();
        let collector = AttachmentCollector::new(dir.path(), dir.path());

        assert!(collector.screenshot(Some("t.failed.png"), 0).await.is_none());
    }

    #[tokio::test]
    async fn test_named_screenshot_is_read_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.failed.png"), b"png").unwrap();
        let collector = AttachmentCollector::new(dir.path(), dir.path()).with_screenshots(
            Arc::new(FileScreenshots {
                dir: dir.path().to_path_buf(),
            }),
        );

        let shot = collector.screenshot(Some("t.failed.png"), 0).await.unwrap();
        assert_eq!(shot.mime_type, "image/png");
        assert_eq!(shot.content, b"png");
        assert!(dir.path().join("t.failed.png").exists());
    }

    #[tokio::test]
    async fn test_fresh_screenshot_is_captured_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let collector = AttachmentCollector::new(dir.path(), dir.path()).with_screenshots(
            Arc::new(FileScreenshots {
                dir: dir.path().to_path_buf(),
            }),
        );

        let shot = collector.screenshot(None, 1234).await.unwrap();
        assert_eq!(shot.name, "1234_failed.png");
        assert!(!dir.path().join("1234_failed.png").exists());
    }

    #[tokio::test]
    async fn test_missing_screenshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let collector = AttachmentCollector::new(dir.path(), dir.path()).with_screenshots(
            Arc::new(FileScreenshots {
                dir: dir.path().to_path_buf(),
            }),
        );

        assert!(collector.screenshot(Some("missing.png"), 0).await.is_none());
    }

    #[tokio::test]
    async fn test_screen_record_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let collector =
            AttachmentCollector::new(dir.path(), dir.path()).with_recorder(Arc::new(NoopRecorder));
        let path = collector.record_file("7");
        std::fs::write(&path, b"mp4").unwrap();

        let record = collector.screen_record(&path).await.unwrap();
        assert_eq!(record.name, "record-test-7.mp4");
        assert_eq!(record.mime_type, "video/mp4");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_screen_record_without_recorder_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let collector = AttachmentCollector::new(dir.path(), dir.path());
        let path = collector.record_file("7");
        std::fs::write(&path, b"mp4").unwrap();

        assert!(collector.screen_record(&path).await.is_none());
        assert!(path.exists());
    }
}
