//! Metric-observing decorator for cloud clients.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{ForwardingRuleApi, InstanceGroupApi, ServiceApi};
use crate::error::CloudResult;
use crate::metrics::{ApiMetrics, MetricContext};
use crate::types::{
    ApiVersion, ForwardingRule, InstanceFilter, InstanceGroup, InstanceReference,
    InstanceWithNamedPorts, LoadBalancerStatus, NamedPort, ObjectMeta, Service,
};

const INSTANCE_GROUP: &str = "InstanceGroup";
const FORWARDING_RULE: &str = "ForwardingRule";
const SERVICE: &str = "Service";

/// Wraps a cloud client and records latency and errors for every call.
///
/// Results are returned unchanged: errors are observed, never swallowed or
/// rewritten.
///
/// The version label is the API version this wrapper was built with, not the
/// `version` field of any forwarding rule passing through it.
pub struct InstrumentedCloud<C: ?Sized> {
    inner: Arc<C>,
    metrics: Arc<ApiMetrics>,
    version: ApiVersion,
}

impl<C: ?Sized> InstrumentedCloud<C> {
    pub fn new(inner: Arc<C>, metrics: Arc<ApiMetrics>, version: ApiVersion) -> Self {
        Self {
            inner,
            metrics,
            version,
        }
    }

    fn zonal(&self, resource: &str, request: &str, zone: &str) -> MetricContext<'_> {
        MetricContext::new(&self.metrics, resource, request, None, Some(zone), self.version)
    }

    fn regional(&self, resource: &str, request: &str, region: &str) -> MetricContext<'_> {
        MetricContext::new(&self.metrics, resource, request, Some(region), None, self.version)
    }

    fn unscoped(&self, resource: &str, request: &str) -> MetricContext<'_> {
        MetricContext::new(&self.metrics, resource, request, None, None, self.version)
    }
}

#[async_trait]
impl<C> InstanceGroupApi for InstrumentedCloud<C>
where
    C: InstanceGroupApi + ?Sized,
{
    async fn get_instance_group(&self, name: &str, zone: &str) -> CloudResult<InstanceGroup> {
        self.zonal(INSTANCE_GROUP, "get", zone)
            .observe(self.inner.get_instance_group(name, zone))
            .await
    }

    async fn create_instance_group(&self, group: &InstanceGroup, zone: &str) -> CloudResult<()> {
        self.zonal(INSTANCE_GROUP, "insert", zone)
            .observe(self.inner.create_instance_group(group, zone))
            .await
    }

    async fn delete_instance_group(&self, name: &str, zone: &str) -> CloudResult<()> {
        self.zonal(INSTANCE_GROUP, "delete", zone)
            .observe(self.inner.delete_instance_group(name, zone))
            .await
    }

    async fn list_instance_groups(&self, zone: &str) -> CloudResult<Vec<InstanceGroup>> {
        self.zonal(INSTANCE_GROUP, "list", zone)
            .observe(self.inner.list_instance_groups(zone))
            .await
    }

    async fn list_instances_in_group(
        &self,
        name: &str,
        zone: &str,
        filter: InstanceFilter,
    ) -> CloudResult<Vec<InstanceWithNamedPorts>> {
        self.zonal(INSTANCE_GROUP, "list_instances", zone)
            .observe(self.inner.list_instances_in_group(name, zone, filter))
            .await
    }

    async fn add_instances_to_group(
        &self,
        name: &str,
        zone: &str,
        instances: &[InstanceReference],
    ) -> CloudResult<()> {
        self.zonal(INSTANCE_GROUP, "add_instances", zone)
            .observe(self.inner.add_instances_to_group(name, zone, instances))
            .await
    }

    async fn remove_instances_from_group(
        &self,
        name: &str,
        zone: &str,
        instances: &[InstanceReference],
    ) -> CloudResult<()> {
        self.zonal(INSTANCE_GROUP, "remove_instances", zone)
            .observe(self.inner.remove_instances_from_group(name, zone, instances))
            .await
    }

    async fn set_named_ports(
        &self,
        name: &str,
        zone: &str,
        ports: &[NamedPort],
    ) -> CloudResult<()> {
        self.zonal(INSTANCE_GROUP, "set_named_ports", zone)
            .observe(self.inner.set_named_ports(name, zone, ports))
            .await
    }
}

#[async_trait]
impl<C> ForwardingRuleApi for InstrumentedCloud<C>
where
    C: ForwardingRuleApi + ?Sized,
{
    async fn get_forwarding_rule(&self, name: &str, region: &str) -> CloudResult<ForwardingRule> {
        self.regional(FORWARDING_RULE, "get", region)
            .observe(self.inner.get_forwarding_rule(name, region))
            .await
    }

    async fn create_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        region: &str,
    ) -> CloudResult<()> {
        self.regional(FORWARDING_RULE, "insert", region)
            .observe(self.inner.create_forwarding_rule(rule, region))
            .await
    }

    async fn update_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        region: &str,
    ) -> CloudResult<()> {
        self.regional(FORWARDING_RULE, "patch", region)
            .observe(self.inner.update_forwarding_rule(rule, region))
            .await
    }
}

#[async_trait]
impl<C> ServiceApi for InstrumentedCloud<C>
where
    C: ServiceApi + ?Sized,
{
    async fn patch_service_metadata(
        &self,
        service: &Service,
        metadata: &ObjectMeta,
    ) -> CloudResult<()> {
        self.unscoped(SERVICE, "patch_metadata")
            .observe(self.inner.patch_service_metadata(service, metadata))
            .await
    }

    async fn patch_service_status(
        &self,
        service: &Service,
        status: &LoadBalancerStatus,
    ) -> CloudResult<()> {
        self.unscoped(SERVICE, "patch_status")
            .observe(self.inner.patch_service_status(service, status))
            .await
    }
}
