//! Capability traits for the external collaborators.
//!
//! The reconcilers hold these as trait objects; production clients and the
//! in-memory fake both implement them.

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::types::{
    ForwardingRule, InstanceFilter, InstanceGroup, InstanceReference, InstanceWithNamedPorts,
    LoadBalancerStatus, NamedPort, ObjectMeta, Service,
};

/// Zonal instance-group operations.
#[async_trait]
pub trait InstanceGroupApi: Send + Sync {
    async fn get_instance_group(&self, name: &str, zone: &str) -> CloudResult<InstanceGroup>;

    async fn create_instance_group(&self, group: &InstanceGroup, zone: &str) -> CloudResult<()>;

    async fn delete_instance_group(&self, name: &str, zone: &str) -> CloudResult<()>;

    async fn list_instance_groups(&self, zone: &str) -> CloudResult<Vec<InstanceGroup>>;

    async fn list_instances_in_group(
        &self,
        name: &str,
        zone: &str,
        filter: InstanceFilter,
    ) -> CloudResult<Vec<InstanceWithNamedPorts>>;

    async fn add_instances_to_group(
        &self,
        name: &str,
        zone: &str,
        instances: &[InstanceReference],
    ) -> CloudResult<()>;

    async fn remove_instances_from_group(
        &self,
        name: &str,
        zone: &str,
        instances: &[InstanceReference],
    ) -> CloudResult<()>;

    /// Replace the group's named ports with `ports`.
    async fn set_named_ports(&self, name: &str, zone: &str, ports: &[NamedPort])
        -> CloudResult<()>;
}

/// Regional forwarding-rule operations.
#[async_trait]
pub trait ForwardingRuleApi: Send + Sync {
    async fn get_forwarding_rule(&self, name: &str, region: &str) -> CloudResult<ForwardingRule>;

    async fn create_forwarding_rule(&self, rule: &ForwardingRule, region: &str)
        -> CloudResult<()>;

    async fn update_forwarding_rule(&self, rule: &ForwardingRule, region: &str)
        -> CloudResult<()>;
}

/// Service metadata and status writes.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn patch_service_metadata(
        &self,
        service: &Service,
        metadata: &ObjectMeta,
    ) -> CloudResult<()>;

    async fn patch_service_status(
        &self,
        service: &Service,
        status: &LoadBalancerStatus,
    ) -> CloudResult<()>;
}

/// Which nodes a zone listing considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeFilter {
    /// Ready, schedulable nodes eligible to back a load balancer.
    CandidateNodes,

    /// Every node known to the cluster.
    AllNodes,
}

/// Resolves zones of cluster nodes.
#[async_trait]
pub trait ZoneDirectory: Send + Sync {
    /// Sorted, deduplicated zones that host nodes matching `filter`.
    async fn list_zones(&self, filter: NodeFilter) -> CloudResult<Vec<String>>;

    /// Zone of `node`; `NotFound` when it cannot be resolved.
    async fn zone_for_node(&self, node: &str) -> CloudResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Fire-and-forget audit sink. Implementations must not block.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event_type: EventType, reason: &str, message: &str);
}

/// Recorder that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _event_type: EventType, _reason: &str, _message: &str) {}
}
