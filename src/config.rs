//! Configuration loading and schema definitions for treeport.
//!
//! This module provides types and functions for loading treeport configuration
//! from TOML files or strings. The configuration schema defines the backend
//! connection, launch metadata and artifact locations.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads treeport configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use treeport::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("treeport.toml"))?;
/// println!("Reporting to: {}", config.reporter.endpoint);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads treeport configuration from a TOML string.
///
/// # Example
///
/// ```
/// use treeport::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [reporter]
///     project = "web"
///
///     [launch]
///     name = "smoke"
/// "#)?;
///
/// assert_eq!(config.reporter.project, "web");
/// assert_eq!(config.launch.name.as_deref(), Some("smoke"));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
