//! Composition root wiring collaborators into the reconcilers.

use std::sync::Arc;

use lbsync_cloud::{
    ApiMetrics, EventRecorder, ForwardingRuleApi, InstanceGroupApi, InstrumentedCloud, ServiceApi,
    ZoneDirectory,
};
use prometheus::Registry;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::ControllerResult;
use crate::forwardingrules::ForwardingRuleEnsurer;
use crate::instancegroups::{InstanceGroupManager, ManagerConfig};
use crate::namer::Namer;
use crate::patch::ServicePatcher;

/// Resource name prefix for cluster-owned resources.
pub const DEFAULT_NAME_PREFIX: &str = "k8s";

/// Shared reconciler state.
pub struct ControllerContext {
    pub config: ControllerConfig,
    pub namer: Namer,
    pub metrics: Arc<ApiMetrics>,
    pub instance_groups: Arc<InstanceGroupManager>,
    pub forwarding_rules: Arc<ForwardingRuleEnsurer>,
    pub services: Arc<ServicePatcher>,
}

impl ControllerContext {
    /// Register call metrics into `registry` and build the reconcilers.
    ///
    /// Every cloud call made through the context is observed. Building a
    /// second context against the same registry fails.
    pub fn new<C>(
        config: ControllerConfig,
        cloud: Arc<C>,
        services: Arc<dyn ServiceApi>,
        zones: Arc<dyn ZoneDirectory>,
        recorder: Arc<dyn EventRecorder>,
        registry: &Registry,
    ) -> ControllerResult<Self>
    where
        C: InstanceGroupApi + ForwardingRuleApi + 'static,
    {
        let metrics = Arc::new(ApiMetrics::register(registry)?);
        let instrumented = Arc::new(InstrumentedCloud::new(
            cloud,
            Arc::clone(&metrics),
            config.api_version,
        ));

        let services: Arc<dyn ServiceApi> = Arc::new(InstrumentedCloud::new(
            services,
            Arc::clone(&metrics),
            config.api_version,
        ));

        let namer = Namer::new(DEFAULT_NAME_PREFIX, config.cluster_uid.clone());

        let instance_groups = InstanceGroupManager::new(ManagerConfig {
            cloud: instrumented.clone() as Arc<dyn InstanceGroupApi>,
            zones,
            recorder,
            namer: namer.clone(),
            base_path: config.project_base_path(),
            max_ig_size: config.max_ig_size,
        });
        let forwarding_rules = ForwardingRuleEnsurer::new(
            instrumented as Arc<dyn ForwardingRuleApi>,
            config.region.clone(),
        );

        info!(
            cluster_uid = %config.cluster_uid,
            project = %config.project,
            region = %config.region,
            max_ig_size = config.max_ig_size,
            api_version = %config.api_version,
            "Controller context initialized"
        );

        Ok(Self {
            config,
            namer,
            metrics,
            instance_groups: Arc::new(instance_groups),
            forwarding_rules: Arc::new(forwarding_rules),
            services: Arc::new(ServicePatcher::new(services)),
        })
    }
}
