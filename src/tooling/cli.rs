//! CLI Tooling
//!
//! Command-line interface for dropsite. Every command runs against the store
//! of one workspace; tasks a command spawns are drained before it returns.

use crate::config::{ConfigLoader, DropsiteConfig};
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::remote::{LocalDirRemote, RemoteStore};
use crate::resource::{Resource, ServeRequest};
use crate::site::Site;
use crate::store::SledSiteStore;
use crate::sync::ScheduleOutcome;
use crate::task::{QueueConfig, QueueStats, TaskDispatcher, TaskQueue, TaskRunner};
use crate::tree::TreeNode;
use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::presets::{UTF8_BORDERS_ONLY, UTF8_FULL};
use comfy_table::Table;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound for draining the tasks spawned by one command.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

/// Dropsite CLI - mirror a remote file tree and serve resources derived from it
#[derive(Parser)]
#[command(name = "dropsite")]
#[command(about = "Mirror a remote file tree into a local store and derive servable resources")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Remote root directory (overrides remote.root)
    #[arg(long)]
    pub remote: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Apply the logging flags on top of the `[logging]` config section.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if self.verbose {
            config.enabled = true;
            config.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.enabled = true;
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Synchronize the local tree with the remote store
    Sync {
        /// Path to sync when the root is throttled (default: root only)
        #[arg(long)]
        path: Option<String>,
        /// Sync right away, ignoring throttles
        #[arg(long)]
        force: bool,
    },
    /// Re-derive every resource from the cached tree
    Verify,
    /// Print the cached tree
    Tree,
    /// List stored resources
    Resources {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List orphan (fake) nodes
    Orphans,
    /// Show one resource as it would be served
    Show {
        /// Resource url, e.g. /docs/intro
        url: String,
    },
    /// Show the default attributes configured for a path
    Attrs {
        /// Site path; a trailing / marks a directory
        path: String,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Delete every cached node, throttle and resource
    Flush,
}

/// Load the configuration a [`CliContext`] would use.
pub fn load_config(workspace_root: &Path, config_path: Option<&Path>) -> Result<DropsiteConfig, ApiError> {
    let config = match config_path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load(workspace_root)?,
    };
    config.validate()?;
    Ok(config)
}

/// CLI context for executing commands
pub struct CliContext {
    workspace_root: PathBuf,
    config: DropsiteConfig,
    store: Arc<SledSiteStore>,
    queue: Arc<TaskQueue>,
    site: Arc<Site>,
}

impl CliContext {
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        remote_root: Option<PathBuf>,
    ) -> Result<Self, ApiError> {
        let config = load_config(&workspace_root, config_path.as_deref())?;
        Self::with_config(workspace_root, config, remote_root)
    }

    pub fn with_config(
        workspace_root: PathBuf,
        config: DropsiteConfig,
        remote_root: Option<PathBuf>,
    ) -> Result<Self, ApiError> {
        let store_path = config.storage.resolve_store_path(&workspace_root)?;
        std::fs::create_dir_all(&store_path)
            .map_err(|e| ApiError::StorageError(crate::error::StorageError::IoError(e)))?;
        let store = Arc::new(SledSiteStore::open(&store_path)?);

        let remote_root = remote_root
            .or_else(|| config.remote.root.clone())
            .ok_or_else(|| {
                ApiError::ConfigError(
                    "No remote root configured (set remote.root or pass --remote)".to_string(),
                )
            })?;
        let remote_root = if remote_root.is_absolute() {
            remote_root
        } else {
            workspace_root.join(remote_root)
        };
        let remote: Arc<dyn RemoteStore> = Arc::new(LocalDirRemote::new(&remote_root)?);

        let queue = Arc::new(TaskQueue::new(QueueConfig::from(&config.queue)));
        let dispatcher: Arc<dyn TaskDispatcher> = queue.clone();
        let site = Arc::new(Site::new(remote, store.clone(), dispatcher, config.site_settings()));
        let mut config = config;
        config.remote.root = Some(remote_root.clone());

        info!(
            workspace = %workspace_root.display(),
            store = %store_path.display(),
            remote = %remote_root.display(),
            "CLI context initialized"
        );
        Ok(Self {
            workspace_root,
            config,
            store,
            queue,
            site,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn site(&self) -> &Arc<Site> {
        &self.site
    }

    /// Execute a CLI command. Background tasks run on the queue and are
    /// drained before the output is returned.
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let runner: Arc<dyn TaskRunner> = self.site.clone();
        self.queue.start(runner)?;
        let result = self.execute_inner(command).await;
        let drained = self.queue.wait_for_completion(Some(DRAIN_TIMEOUT)).await;
        let stats = self.queue.stats();
        self.queue.stop().await?;
        self.store.flush()?;
        let output = result?;
        drained?;
        Ok(match command {
            Commands::Sync { .. } | Commands::Verify => {
                format!("{}\n{}", output, format_queue_stats(&stats))
            }
            _ => output,
        })
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Sync { path, force: true } => {
                let report = self.site.force_sync(path.as_deref()).await?;
                Ok(format!(
                    "{} visited {}, updated {}, removed {}",
                    "Synced:".green().bold(),
                    report.visited,
                    report.updated,
                    report.removed
                ))
            }
            Commands::Sync { path, force: false } => {
                let outcome = self.site.schedule_sync(path.as_deref(), Utc::now())?;
                Ok(format_schedule_outcome(&outcome))
            }
            Commands::Verify => {
                let report = self.site.verify_all_consistency(Utc::now())?;
                let mut out = format!("{} reconciled {} nodes", "Verified:".green().bold(), report.reconciled);
                if report.reclaimed > 0 {
                    out.push_str(&format!(", {} released urls reclaimed", report.reclaimed));
                }
                for url in &report.orphans_deleted {
                    out.push_str(&format!("\n  deleted orphan resource {}", url));
                }
                Ok(out)
            }
            Commands::Tree => {
                let listing = self.site.tree_listing()?;
                if listing.is_empty() {
                    Ok("Tree is empty. Run 'dropsite sync' first.".to_string())
                } else {
                    Ok(listing)
                }
            }
            Commands::Resources { format } => format_resources(&self.site.resources()?, format),
            Commands::Orphans => Ok(format_orphans(&self.site.orphans()?)),
            Commands::Show { url } => {
                let resource = self
                    .site
                    .get_resource_by_url(url)?
                    .ok_or_else(|| ApiError::ResourceNotFound(url.clone()))?;
                Ok(format_served(&resource, self.site.settings()))
            }
            Commands::Attrs { path } => {
                let attrs = self.site.compute_default_attributes(path)?;
                if attrs.is_empty() {
                    return Ok(format!("No default attributes for {}", path));
                }
                let mut table = Table::new();
                table.load_preset(UTF8_BORDERS_ONLY);
                table.set_header(vec!["Attribute", "Value"]);
                for (key, value) in &attrs {
                    table.add_row(vec![key.as_str(), value.as_str()]);
                }
                Ok(table.to_string())
            }
            Commands::Config => toml::to_string_pretty(&self.config)
                .map_err(|e| ApiError::ConfigError(format!("Failed to serialize config: {}", e))),
            Commands::Flush => {
                self.site.flush_all()?;
                Ok(format!("{} all cached records deleted", "Flushed:".yellow().bold()))
            }
        }
    }
}

/// Format a section heading with bold/underline.
fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn format_schedule_outcome(outcome: &ScheduleOutcome) -> String {
    match outcome {
        ScheduleOutcome::Scheduled { path, next_eligible } => format!(
            "{} {} (next eligible {})",
            "Scheduled:".green().bold(),
            path,
            next_eligible.to_rfc3339()
        ),
        ScheduleOutcome::Throttled { path, until } => format!(
            "{} {} until {}",
            "Throttled:".yellow().bold(),
            path,
            until.to_rfc3339()
        ),
        ScheduleOutcome::NotApplicable { path } => {
            format!("{} {} is an orphan node", "Skipped:".dimmed(), path)
        }
    }
}

fn format_queue_stats(stats: &QueueStats) -> String {
    let mut out = format_section_heading("Tasks");
    out.push_str(&format!(
        "\n  completed {}, retried {}, dropped {}",
        stats.completed, stats.retried, stats.dropped
    ));
    out
}

fn format_resources(resources: &[Resource], format: &str) -> Result<String, ApiError> {
    if format == "json" {
        let arr: Vec<serde_json::Value> = resources
            .iter()
            .map(|r| {
                serde_json::json!({
                    "url": r.url,
                    "class": r.class().as_str(),
                    "owner": r.owner,
                    "revision": r.revision,
                    "bytes": r.content_len()
                })
            })
            .collect();
        return serde_json::to_string_pretty(&arr)
            .map_err(|e| ApiError::ConfigError(format!("Failed to serialize resources: {}", e)));
    }
    if format != "text" {
        return Err(ApiError::ConfigError(format!(
            "Invalid output format: {} (must be 'text' or 'json')",
            format
        )));
    }
    if resources.is_empty() {
        return Ok("No resources stored.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Url", "Class", "Owner", "Revision", "Bytes"]);
    for resource in resources {
        table.add_row(vec![
            resource.url.clone(),
            resource.class().to_string(),
            resource.owner.clone(),
            resource.revision.clone().unwrap_or_else(|| "-".to_string()),
            resource.content_len().to_string(),
        ]);
    }
    Ok(table.to_string())
}

fn format_orphans(nodes: &[TreeNode]) -> String {
    if nodes.is_empty() {
        return "No orphan nodes.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Path", "Revision"]);
    for node in nodes {
        table.add_row(vec![node.path.as_str(), node.revision.as_str()]);
    }
    table.to_string()
}

fn format_served(resource: &Resource, settings: &crate::site::SiteSettings) -> String {
    let response = resource.serve(&ServeRequest::new(resource.url.clone()), &settings.serve);
    let mut out = format!(
        "{}\n  Status: {}\n  Class: {}\n  Owner: {}\n",
        format_section_heading(&resource.url),
        response.status,
        resource.class(),
        resource.owner
    );
    if let Some(content_type) = &response.content_type {
        out.push_str(&format!("  Content-Type: {}\n", content_type));
    }
    for (name, value) in &response.headers {
        out.push_str(&format!("  {}: {}\n", name, value));
    }
    if let Some(template) = &response.template {
        out.push_str(&format!("  Template: {}\n", template));
    }
    for (key, value) in &response.attributes {
        out.push_str(&format!("  @{} = {}\n", key, value));
    }
    out.push('\n');
    out.push_str(&String::from_utf8_lossy(&response.body));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_flags_override_config() {
        let cli = Cli::try_parse_from([
            "dropsite",
            "--log-level",
            "warn",
            "--log-output",
            "stderr",
            "tree",
        ])
        .unwrap();
        let config = cli.logging_config(&LoggingConfig::default());
        assert_eq!(config.level, "warn");
        assert_eq!(config.output, "stderr");
        assert_eq!(config.format, "text");
    }

    #[test]
    fn test_verbose_enables_debug() {
        let cli = Cli::try_parse_from(["dropsite", "--verbose", "verify"]).unwrap();
        let base = LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
        let config = cli.logging_config(&base);
        assert!(config.enabled);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_context_requires_remote_root() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = DropsiteConfig::default();
        config.storage.store_path = temp.path().join("store");
        let result = CliContext::with_config(temp.path().to_path_buf(), config, None);
        assert!(matches!(result, Err(ApiError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_force_sync_then_resources() {
        let workspace = tempfile::tempdir().unwrap();
        let remote = workspace.path().join("site");
        std::fs::create_dir_all(remote.join("docs")).unwrap();
        std::fs::write(remote.join("about.md"), "Title: About\n\nhello").unwrap();
        std::fs::write(remote.join("docs/style.css"), "body {}").unwrap();

        let mut config = DropsiteConfig::default();
        config.storage.store_path = workspace.path().join("store");
        config.queue.retry_delay_ms = 10;
        let context =
            CliContext::with_config(workspace.path().to_path_buf(), config, Some(remote)).unwrap();

        let output = context
            .execute(&Commands::Sync {
                path: None,
                force: true,
            })
            .await
            .unwrap();
        assert!(output.contains("visited"));

        let page = context.site().get_resource_by_url("/about").unwrap().unwrap();
        assert!(page.as_page().and_then(|p| p.body.as_deref()).unwrap().contains("hello"));
        assert!(context.site().get_resource_by_url("/docs/style.css").unwrap().is_some());

        let listing = context
            .execute(&Commands::Resources {
                format: "text".to_string(),
            })
            .await
            .unwrap();
        assert!(listing.contains("/docs/style.css"));

        let json = context
            .execute(&Commands::Resources {
                format: "json".to_string(),
            })
            .await
            .unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert!(rows.iter().any(|r| r["url"] == "/about" && r["class"] == "PageResource"));
    }
}
