//! Configuration schema definitions for treeport.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section and field has a default, so an
//! empty file is a valid (disabled) configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ReporterConfig   - Backend connection and reporting behaviour
//! ├── LaunchConfig     - Name, description and tags of the launch
//! └── ArtifactsConfig  - Where screenshots, recordings and the result link live
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::client::Attribute;

/// Root configuration structure for treeport.
///
/// # TOML Structure
///
/// ```toml
/// [reporter]
/// enabled = true
/// endpoint = "https://reports.example.com/api/v1"
/// token = "00000000-0000-0000-0000-000000000000"
/// project = "web"
///
/// [launch]
/// name = "nightly"
/// attributes = [{ key = "env", value = "staging" }, { value = "smoke" }]
///
/// [artifacts]
/// output_dir = "./output"
/// ```
///
/// # Example
///
/// ```
/// use treeport::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [reporter]
///     enabled = true
///     endpoint = "https://reports.example.com/api/v1"
///     token = "secret"
///     project = "web"
/// "#).unwrap();
///
/// assert!(config.reporter.enabled);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Backend connection and reporting behaviour.
    #[serde(default)]
    pub reporter: ReporterConfig,

    /// Launch metadata.
    #[serde(default)]
    pub launch: LaunchConfig,

    /// Artifact locations.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

impl Config {
    /// Checks that an enabled reporter knows where to report.
    ///
    /// A disabled reporter is always valid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.reporter.enabled {
            return Ok(());
        }

        let missing: Vec<&str> = [
            ("endpoint", &self.reporter.endpoint),
            ("token", &self.reporter.token),
            ("project", &self.reporter.project),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "Reporter is enabled but [reporter] is missing: {}",
                missing.join(", ")
            );
        }
        Ok(())
    }
}

/// Reporting backend settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `enabled` | false |
/// | `debug` | false |
/// | `derive_test_status` | false |
/// | `strict_nesting` | false |
/// | `runs_with_workers` | false |
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReporterConfig {
    /// Master switch. A disabled reporter ignores every runner event.
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the reporting backend API.
    #[serde(default)]
    pub endpoint: String,

    /// API token.
    #[serde(default)]
    pub token: String,

    /// Project the launch belongs to.
    #[serde(default)]
    pub project: String,

    /// Verbose logging of every backend call.
    #[serde(default)]
    pub debug: bool,

    /// Report tests of a single-process run with the status of the event
    /// that delivered them instead of marking them all failed.
    ///
    /// Default: false
    #[serde(default)]
    pub derive_test_status: bool,

    /// Keep suites and tests open until all of their children are finished.
    ///
    /// Default: false (suites and tests are finished as soon as they are
    /// started; steps are attached afterwards)
    #[serde(default)]
    pub strict_nesting: bool,

    /// Tests run in worker processes. The single-process completion signal
    /// is ignored and only the merged worker result is reported.
    ///
    /// Default: false
    #[serde(default)]
    pub runs_with_workers: bool,
}

/// Launch metadata.
///
/// # Example
///
/// ```toml
/// [launch]
/// name = "nightly"
/// description = "Nightly regression"
/// attributes = [{ key = "browser", value = "chromium" }]
/// rerun = true
/// rerun_of = "5f2c5d1e-3c1c-4d6f-9d7a-8c1c2b7d9e0f"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LaunchConfig {
    /// Launch name. Defaults to the title of the first suite.
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub attributes: Vec<Attribute>,

    /// Report into an existing launch instead of creating a new one.
    #[serde(default)]
    pub rerun: bool,

    /// Id of the launch being rerun.
    pub rerun_of: Option<String>,
}

/// Artifact locations.
///
/// Paths may start with `~`, which expands to the home directory.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `output_dir` | `./output` |
/// | `record_dir` | `./output` |
/// | `result_link_file` | `../test_result_env.sh` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    /// Directory the runner saves failure screenshots into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory screen recordings are written to.
    #[serde(default = "default_output_dir")]
    pub record_dir: PathBuf,

    /// Shell file exporting the launch permalink.
    #[serde(default = "default_result_link_file")]
    pub result_link_file: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            record_dir: default_output_dir(),
            result_link_file: default_result_link_file(),
        }
    }
}

impl ArtifactsConfig {
    pub fn output_path(&self) -> PathBuf {
        expand(&self.output_dir)
    }

    pub fn record_path(&self) -> PathBuf {
        expand(&self.record_dir)
    }

    pub fn result_link_path(&self) -> PathBuf {
        expand(&self.result_link_file)
    }
}

fn expand(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_result_link_file() -> PathBuf {
    PathBuf::from("../test_result_env.sh")
}
