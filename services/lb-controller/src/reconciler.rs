//! Periodic membership reconciliation loop.
//!
//! The reconciler:
//! - Ticks on the configured interval
//! - Asks the node source for the current candidate nodes
//! - Syncs instance-group membership, retrying failures on the next tick

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lbsync_cloud::CloudResult;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::ControllerResult;
use crate::instancegroups::InstanceGroupManager;

/// Source of the node names that should back the load balancer.
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn candidate_nodes(&self) -> CloudResult<Vec<String>>;
}

/// Reconciliation loop configuration.
pub struct ReconcilerConfig {
    /// Interval between membership syncs.
    pub sync_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
        }
    }
}

/// Keeps instance-group membership converged with the cluster's nodes.
pub struct MembershipReconciler {
    manager: Arc<InstanceGroupManager>,
    nodes: Arc<dyn NodeSource>,
    config: ReconcilerConfig,
}

impl MembershipReconciler {
    pub fn new(
        manager: Arc<InstanceGroupManager>,
        nodes: Arc<dyn NodeSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            manager,
            nodes,
            config,
        }
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sync_interval_secs = self.config.sync_interval.as_secs(),
            "Starting membership reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(error = %e, "Membership reconciliation failed, will retry");
                    }
                }
                // A dropped sender also ends the loop.
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("Membership reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single sync pass.
    pub async fn reconcile_once(&self) -> ControllerResult<()> {
        debug!("Starting membership reconciliation");
        let nodes = self.nodes.candidate_nodes().await?;
        self.manager.sync(&nodes).await
    }
}
