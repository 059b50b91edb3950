//! Forwarding-rule equality and idempotent ensure.

use std::collections::BTreeSet;
use std::sync::Arc;

use lbsync_cloud::{
    parse_resource_url, ApiVersion, CloudResult, ForwardingRule, ForwardingRuleApi, IpProtocol,
    IpVersion, LoadBalancingScheme, NetworkTier, Service, ServiceProtocol,
};
use lbsync_reconcile::ResourceSyncStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{ControllerError, ControllerResult};
use crate::namer::Namer;

/// Above this many ports a rule forwards all ports instead.
pub const MAX_FORWARDED_PORTS: usize = 5;

/// Reverse-lookup payload stored in a rule's description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    #[serde(rename = "networking.gke.io/service-name")]
    pub service_name: String,

    #[serde(
        rename = "networking.gke.io/service-ip",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub service_ip: String,

    #[serde(
        rename = "networking.gke.io/api-version",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub api_version: String,

    #[serde(
        rename = "networking.gke.io/resource-description",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub resource_description: String,
}

impl ResourceDescription {
    pub fn for_service(namespace: &str, name: &str) -> Self {
        Self {
            service_name: format!("{namespace}/{name}"),
            ..Default::default()
        }
    }

    pub fn marshal(&self) -> ControllerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn unmarshal(description: &str) -> ControllerResult<Self> {
        Ok(serde_json::from_str(description)?)
    }
}

/// Compare two rules on the fields that matter to traffic.
///
/// IP address and cloud-populated fields are ignored. Backend links are
/// compared by resource path, so the API host does not matter. Fails only
/// when a backend link cannot be parsed.
pub fn equal_forwarding_rules(a: &ForwardingRule, b: &ForwardingRule) -> CloudResult<bool> {
    if a.ip_protocol != b.ip_protocol {
        return Ok(false);
    }
    if !equal_ports(a, b) {
        return Ok(false);
    }
    if a.load_balancing_scheme != b.load_balancing_scheme
        || a.allow_global_access != b.allow_global_access
        || a.network_tier != b.network_tier
    {
        return Ok(false);
    }
    equal_backend_links(&a.backend_service, &b.backend_service)
}

fn equal_ports(a: &ForwardingRule, b: &ForwardingRule) -> bool {
    if a.all_ports != b.all_ports {
        return false;
    }
    if a.all_ports {
        return true;
    }
    let left: BTreeSet<&str> = a.ports.iter().map(String::as_str).collect();
    let right: BTreeSet<&str> = b.ports.iter().map(String::as_str).collect();
    left == right
}

fn equal_backend_links(a: &str, b: &str) -> CloudResult<bool> {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ok(true),
        (true, false) | (false, true) => Ok(false),
        (false, false) => Ok(parse_resource_url(a)? == parse_resource_url(b)?),
    }
}

/// Caller-chosen settings for an IPv6 internal rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ipv6RuleOptions {
    pub allow_global_access: bool,
    pub network: String,
    pub subnetwork: String,

    /// Defaults to premium.
    pub network_tier: Option<NetworkTier>,
}

/// Build the desired IPv6 internal forwarding rule for `service`.
pub fn desired_ipv6_forwarding_rule(
    namer: &Namer,
    service: &Service,
    backend_service: &str,
    options: &Ipv6RuleOptions,
) -> ControllerResult<ForwardingRule> {
    let meta = &service.metadata;
    let protocol = service_protocol(service)?;

    let ports: BTreeSet<i32> = service.ports.iter().map(|p| p.port).collect();
    let (ports, all_ports) = if ports.len() > MAX_FORWARDED_PORTS {
        (Vec::new(), true)
    } else {
        (ports.iter().map(ToString::to_string).collect(), false)
    };

    Ok(ForwardingRule {
        name: namer.l4_forwarding_rule(&meta.namespace, &meta.name, protocol, true),
        description: ResourceDescription::for_service(&meta.namespace, &meta.name).marshal()?,
        ip_protocol: protocol,
        ports,
        all_ports,
        load_balancing_scheme: LoadBalancingScheme::Internal,
        network_tier: options.network_tier.unwrap_or(NetworkTier::Premium),
        backend_service: backend_service.to_string(),
        allow_global_access: options.allow_global_access,
        ip_version: Some(IpVersion::Ipv6),
        network: options.network.clone(),
        subnetwork: options.subnetwork.clone(),
        version: ApiVersion::Ga,
        ..Default::default()
    })
}

fn service_protocol(service: &Service) -> ControllerResult<IpProtocol> {
    let invalid = |reason: &str| ControllerError::InvalidService {
        service: service.key(),
        reason: reason.to_string(),
    };

    let protocols: BTreeSet<ServiceProtocol> =
        service.ports.iter().map(|p| p.protocol).collect();
    let mut protocols = protocols.into_iter();

    let protocol = match (protocols.next(), protocols.next()) {
        (None, _) => return Err(invalid("service has no ports")),
        (Some(_), Some(_)) => return Err(invalid("mixed protocols are not supported")),
        (Some(protocol), None) => protocol,
    };

    match protocol {
        ServiceProtocol::Tcp => Ok(IpProtocol::Tcp),
        ServiceProtocol::Udp => Ok(IpProtocol::Udp),
        ServiceProtocol::Sctp => Err(invalid("SCTP is not supported")),
    }
}

/// Creates or updates regional forwarding rules only when they differ.
pub struct ForwardingRuleEnsurer {
    cloud: Arc<dyn ForwardingRuleApi>,
    region: String,
}

impl ForwardingRuleEnsurer {
    pub fn new(cloud: Arc<dyn ForwardingRuleApi>, region: impl Into<String>) -> Self {
        Self {
            cloud,
            region: region.into(),
        }
    }

    /// Fetch a rule, mapping `NotFound` to `None`.
    pub async fn get(&self, name: &str) -> ControllerResult<Option<ForwardingRule>> {
        match self.cloud.get_forwarding_rule(name, &self.region).await {
            Ok(rule) => Ok(Some(rule)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Converge the cloud rule to `desired`.
    ///
    /// Returns the rule as stored after the pass and whether a write was
    /// issued. Cloud errors are returned unchanged.
    #[instrument(skip_all, fields(rule = %desired.name, region = %self.region))]
    pub async fn ensure(
        &self,
        mut desired: ForwardingRule,
        existing: Option<&ForwardingRule>,
    ) -> ControllerResult<(ForwardingRule, ResourceSyncStatus)> {
        let Some(existing) = existing else {
            info!(rule = %desired.name, "Creating forwarding rule");
            self.cloud
                .create_forwarding_rule(&desired, &self.region)
                .await?;
            let created = self
                .cloud
                .get_forwarding_rule(&desired.name, &self.region)
                .await?;
            return Ok((created, ResourceSyncStatus::Update));
        };

        if equal_forwarding_rules(existing, &desired)? {
            debug!(rule = %desired.name, "Forwarding rule already up to date");
            return Ok((existing.clone(), ResourceSyncStatus::Resync));
        }

        if desired.ip_address.is_empty() {
            desired.ip_address = existing.ip_address.clone();
        }

        info!(
            rule = %desired.name,
            ports = ?desired.ports,
            all_ports = desired.all_ports,
            "Updating forwarding rule"
        );
        self.cloud
            .update_forwarding_rule(&desired, &self.region)
            .await?;
        let updated = self
            .cloud
            .get_forwarding_rule(&desired.name, &self.region)
            .await?;
        Ok((updated, ResourceSyncStatus::Update))
    }

    /// Build the desired IPv6 rule for `service` and ensure it.
    pub async fn ensure_ipv6_for_service(
        &self,
        namer: &Namer,
        service: &Service,
        backend_service: &str,
        options: &Ipv6RuleOptions,
    ) -> ControllerResult<(ForwardingRule, ResourceSyncStatus)> {
        let desired = desired_ipv6_forwarding_rule(namer, service, backend_service, options)?;
        let existing = self.get(&desired.name).await?;
        self.ensure(desired, existing.as_ref()).await
    }
}
