//! Diff-then-patch of Service annotations and load-balancer status.
//!
//! The `compute_*` functions are pure and decide whether a write is needed.
//! [`ServicePatcher`] issues the write only when they return a patch.

use std::collections::BTreeMap;
use std::sync::Arc;

use lbsync_cloud::{LoadBalancerStatus, ObjectMeta, Service, ServiceApi};
use lbsync_reconcile::{merge_annotations, patch_if_changed};
use tracing::{debug, info, instrument};

use crate::error::{ControllerError, ControllerResult};

pub const BACKEND_SERVICE_KEY: &str = "service.kubernetes.io/backend-service";
pub const FIREWALL_RULE_KEY: &str = "service.kubernetes.io/firewall-rule";
pub const TCP_FORWARDING_RULE_KEY: &str = "service.kubernetes.io/tcp-forwarding-rule";
pub const UDP_FORWARDING_RULE_KEY: &str = "service.kubernetes.io/udp-forwarding-rule";
pub const HEALTHCHECK_KEY: &str = "service.kubernetes.io/healthcheck";
pub const FIREWALL_RULE_FOR_HEALTHCHECK_KEY: &str = "service.kubernetes.io/firewall-rule-for-hc";
pub const TCP_FORWARDING_RULE_IPV6_KEY: &str = "service.kubernetes.io/tcp-forwarding-rule-ipv6";
pub const UDP_FORWARDING_RULE_IPV6_KEY: &str = "service.kubernetes.io/udp-forwarding-rule-ipv6";
pub const FIREWALL_RULE_IPV6_KEY: &str = "service.kubernetes.io/firewall-rule-ipv6";
pub const FIREWALL_RULE_FOR_HEALTHCHECK_IPV6_KEY: &str =
    "service.kubernetes.io/firewall-rule-for-hc-ipv6";

/// Annotations owned by a single-stack L4 load balancer.
pub const L4_RESOURCE_ANNOTATION_KEYS: &[&str] = &[
    BACKEND_SERVICE_KEY,
    TCP_FORWARDING_RULE_KEY,
    UDP_FORWARDING_RULE_KEY,
    HEALTHCHECK_KEY,
    FIREWALL_RULE_KEY,
    FIREWALL_RULE_FOR_HEALTHCHECK_KEY,
];

/// Annotations owned by a dual-stack L4 load balancer.
pub const L4_DUAL_STACK_RESOURCE_ANNOTATION_KEYS: &[&str] = &[
    BACKEND_SERVICE_KEY,
    TCP_FORWARDING_RULE_KEY,
    UDP_FORWARDING_RULE_KEY,
    TCP_FORWARDING_RULE_IPV6_KEY,
    UDP_FORWARDING_RULE_IPV6_KEY,
    HEALTHCHECK_KEY,
    FIREWALL_RULE_KEY,
    FIREWALL_RULE_FOR_HEALTHCHECK_KEY,
    FIREWALL_RULE_IPV6_KEY,
    FIREWALL_RULE_FOR_HEALTHCHECK_IPV6_KEY,
];

/// New metadata for `service`, or `None` when the annotations already match.
///
/// Owned keys in `keys_to_remove` are dropped before `additions` is overlaid,
/// so stale owned annotations disappear while foreign ones are preserved.
pub fn compute_new_annotations_if_needed(
    service: &Service,
    additions: &BTreeMap<String, String>,
    keys_to_remove: &[&str],
) -> Option<ObjectMeta> {
    let current = &service.metadata;
    let annotations = merge_annotations(&current.annotations, additions, keys_to_remove);
    patch_if_changed(&current.annotations, annotations).map(|annotations| ObjectMeta {
        annotations,
        ..current.clone()
    })
}

/// `desired`, or `None` when it equals `current`.
pub fn compute_new_status_if_needed(
    current: &LoadBalancerStatus,
    desired: &LoadBalancerStatus,
) -> Option<LoadBalancerStatus> {
    patch_if_changed(current, desired.clone())
}

/// Writes Service metadata and status only when they changed.
pub struct ServicePatcher {
    services: Arc<dyn ServiceApi>,
}

impl ServicePatcher {
    pub fn new(services: Arc<dyn ServiceApi>) -> Self {
        Self { services }
    }

    /// Merge `additions` into the Service annotations after dropping
    /// `keys_to_remove`. Returns whether a patch was issued.
    #[instrument(skip_all, fields(service = %service.key()))]
    pub async fn reconcile_annotations(
        &self,
        service: &Service,
        additions: &BTreeMap<String, String>,
        keys_to_remove: &[&str],
    ) -> ControllerResult<bool> {
        let Some(metadata) = compute_new_annotations_if_needed(service, additions, keys_to_remove)
        else {
            debug!(service = %service.key(), "Service annotations not changed, skipping patch");
            return Ok(false);
        };

        info!(service = %service.key(), "Patching annotations of service");
        self.services.patch_service_metadata(service, &metadata).await?;
        Ok(true)
    }

    /// Replace the single-stack L4 annotations with `annotations`.
    pub async fn update_l4_resources_annotations(
        &self,
        service: &Service,
        annotations: &BTreeMap<String, String>,
    ) -> ControllerResult<bool> {
        self.reconcile_annotations(service, annotations, L4_RESOURCE_ANNOTATION_KEYS)
            .await
    }

    /// Replace the dual-stack L4 annotations with `annotations`.
    pub async fn update_l4_dual_stack_resources_annotations(
        &self,
        service: &Service,
        annotations: &BTreeMap<String, String>,
    ) -> ControllerResult<bool> {
        self.reconcile_annotations(service, annotations, L4_DUAL_STACK_RESOURCE_ANNOTATION_KEYS)
            .await
    }

    /// Remove one annotation, patching only if it was present.
    pub async fn delete_annotation(&self, service: &Service, key: &str) -> ControllerResult<bool> {
        let current = &service.metadata;
        if !current.annotations.contains_key(key) {
            return Ok(false);
        }

        info!(service = %service.key(), annotation = key, "Removing annotation from service");
        let mut metadata = current.clone();
        metadata.annotations.remove(key);
        self.services.patch_service_metadata(service, &metadata).await?;
        Ok(true)
    }

    /// Publish `desired` as the Service load-balancer status if it changed.
    #[instrument(skip_all, fields(service = %service.key()))]
    pub async fn reconcile_status(
        &self,
        service: &Service,
        desired: &LoadBalancerStatus,
    ) -> ControllerResult<bool> {
        let Some(status) = compute_new_status_if_needed(&service.load_balancer, desired) else {
            debug!(service = %service.key(), "New and old statuses are equal, skipping patch");
            return Ok(false);
        };

        info!(service = %service.key(), status = ?status, "Updating service status");
        self.services.patch_service_status(service, &status).await?;
        Ok(true)
    }
}

/// Turn a user-caused failure into success after logging it.
pub fn skip_user_error(err: ControllerError) -> ControllerResult<()> {
    if err.is_user_error() {
        info!(error = %err, "Sync failed with user-caused error");
        Ok(())
    } else {
        Err(err)
    }
}
