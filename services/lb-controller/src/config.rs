//! Controller configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use lbsync_cloud::ApiVersion;

/// Default per-zone instance-group capacity.
pub const DEFAULT_MAX_IG_SIZE: usize = 1000;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/compute/v1/";

/// Controller configuration (env-driven).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Cluster identity used when naming cloud resources.
    pub cluster_uid: String,

    /// Cloud project owning the resources.
    pub project: String,

    /// Region of regional resources such as forwarding rules.
    pub region: String,

    /// Maximum number of instances per zonal instance group.
    pub max_ig_size: usize,

    /// API base URL, always ending in `/`.
    pub api_base: String,

    /// API version label for call metrics.
    pub api_version: ApiVersion,

    /// Interval between periodic membership syncs.
    pub sync_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cluster_uid = lookup("LBSYNC_CLUSTER_UID")
            .filter(|v| !v.trim().is_empty())
            .context("Missing cluster uid. Set LBSYNC_CLUSTER_UID.")?;

        let project = lookup("LBSYNC_PROJECT")
            .filter(|v| !v.trim().is_empty())
            .context("Missing cloud project. Set LBSYNC_PROJECT.")?;

        let region = lookup("LBSYNC_REGION").unwrap_or_else(|| "us-central1".to_string());

        let max_ig_size: usize = lookup("LBSYNC_MAX_IG_SIZE")
            .map(|v| v.parse())
            .transpose()
            .context("LBSYNC_MAX_IG_SIZE must be a positive integer.")?
            .unwrap_or(DEFAULT_MAX_IG_SIZE)
            .max(1);

        let mut api_base = lookup("LBSYNC_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !api_base.ends_with('/') {
            api_base.push('/');
        }

        let api_version: ApiVersion = lookup("LBSYNC_API_VERSION")
            .map(|v| v.parse::<ApiVersion>().map_err(anyhow::Error::msg))
            .transpose()
            .context("LBSYNC_API_VERSION must be one of ga, beta, alpha.")?
            .unwrap_or_default();

        let sync_interval_secs: u64 = lookup("LBSYNC_SYNC_INTERVAL_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("LBSYNC_SYNC_INTERVAL_SECS must be an integer (seconds).")?
            .unwrap_or(30);
        let sync_interval = Duration::from_secs(sync_interval_secs.max(1));

        let log_level = lookup("LBSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            cluster_uid,
            project,
            region,
            max_ig_size,
            api_base,
            api_version,
            sync_interval,
            log_level,
        })
    }

    /// Prefix of instance URLs: `{api_base}projects/{project}/`.
    pub fn project_base_path(&self) -> String {
        format!("{}projects/{}/", self.api_base, self.project)
    }
}
