//! Resource descriptors exchanged with the cloud and cluster APIs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Cloud API version a call is issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    #[default]
    Ga,
    Beta,
    Alpha,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::Ga => "ga",
            ApiVersion::Beta => "beta",
            ApiVersion::Alpha => "alpha",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ga" | "v1" => Ok(ApiVersion::Ga),
            "beta" => Ok(ApiVersion::Beta),
            "alpha" => Ok(ApiVersion::Alpha),
            other => Err(format!("unknown api version '{other}'")),
        }
    }
}

/// A (name, port) pair advertised by an instance group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub port: i64,
}

/// A zonal collection of instances backing a load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroup {
    pub name: String,

    #[serde(default)]
    pub zone: String,

    #[serde(default)]
    pub named_ports: Vec<NamedPort>,

    #[serde(default)]
    pub self_link: String,
}

impl InstanceGroup {
    /// Descriptor used when creating a group: only the name is set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Returns true if the group already advertises `port`.
    pub fn has_port(&self, port: i64) -> bool {
        self.named_ports.iter().any(|np| np.port == port)
    }
}

/// Reference to an instance by its full resource URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceReference {
    pub instance: String,
}

/// A group member as reported by the list-instances call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceWithNamedPorts {
    pub instance: String,

    #[serde(default)]
    pub status: String,
}

/// Instance state filter for listing group members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceFilter {
    All,
    Running,
}

impl InstanceFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceFilter::All => "ALL",
            InstanceFilter::Running => "RUNNING",
        }
    }
}

/// Forwarding rule IP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpProtocol {
    #[default]
    Tcp,
    Udp,
    L3Default,
}

impl IpProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpProtocol::Tcp => "TCP",
            IpProtocol::Udp => "UDP",
            IpProtocol::L3Default => "L3_DEFAULT",
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancingScheme {
    #[default]
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkTier {
    #[default]
    Premium,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpVersion {
    Ipv4,
    Ipv6,
}

/// A regional rule directing matching traffic to a backend service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingRule {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Empty until the cloud allocates an address.
    #[serde(default, rename = "IPAddress")]
    pub ip_address: String,

    #[serde(rename = "IPProtocol")]
    pub ip_protocol: IpProtocol,

    #[serde(default)]
    pub ports: Vec<String>,

    /// The "all ports" marker; distinct from any explicit port list.
    #[serde(default)]
    pub all_ports: bool,

    pub load_balancing_scheme: LoadBalancingScheme,

    pub network_tier: NetworkTier,

    #[serde(default)]
    pub backend_service: String,

    #[serde(default)]
    pub allow_global_access: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<IpVersion>,

    #[serde(default)]
    pub network: String,

    #[serde(default)]
    pub subnetwork: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub self_link: String,

    #[serde(default)]
    pub version: ApiVersion,
}

/// Protocol of a Service port.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceProtocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,

    pub port: i32,

    #[serde(default)]
    pub protocol: ServiceProtocol,
}

/// Object metadata of a cluster object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,

    pub name: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_mode: Option<String>,
}

impl LoadBalancerIngress {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }
}

/// Ingress points published on a Service's load-balancer status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerStatus {
    #[serde(default)]
    pub ingress: Vec<LoadBalancerIngress>,
}

/// The slice of a Service object the reconcilers read and patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub ports: Vec<ServicePort>,

    #[serde(default)]
    pub load_balancer: LoadBalancerStatus,
}

impl Service {
    /// `namespace/name` key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_rule_wire_names() {
        let rule = ForwardingRule {
            name: "fr".to_string(),
            ip_address: "10.0.0.1".to_string(),
            ip_protocol: IpProtocol::L3Default,
            ip_version: Some(IpVersion::Ipv6),
            ..Default::default()
        };
        let value = serde_json::to_value(&rule).unwrap();

        assert_eq!(value["IPAddress"], "10.0.0.1");
        assert_eq!(value["IPProtocol"], "L3_DEFAULT");
        assert_eq!(value["ipVersion"], "IPV6");
        assert_eq!(value["loadBalancingScheme"], "INTERNAL");
        assert_eq!(value["networkTier"], "PREMIUM");
        assert_eq!(value["version"], "ga");
    }

    #[test]
    fn test_ip_version_omitted_when_unset() {
        let value = serde_json::to_value(ForwardingRule::default()).unwrap();
        assert!(value.get("ipVersion").is_none());
    }

    #[test]
    fn test_api_version_parse() {
        assert_eq!("v1".parse::<ApiVersion>().unwrap(), ApiVersion::Ga);
        assert_eq!("BETA".parse::<ApiVersion>().unwrap(), ApiVersion::Beta);
        assert!("v2".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn test_service_key() {
        let svc = Service {
            metadata: ObjectMeta {
                namespace: "ns".to_string(),
                name: "svc".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(svc.key(), "ns/svc");
    }
}
