//! Deterministic names for managed cloud resources.

use lbsync_cloud::IpProtocol;
use sha2::{Digest, Sha256};

/// Separates the cluster uid from the rest of a resource name.
const CLUSTER_NAME_DELIMITER: &str = "--";

/// Cloud resource names are limited to 63 characters.
const MAX_RESOURCE_NAME_LEN: usize = 63;

const L4_PREFIX: &str = "k8s2";
const L4_CLUSTER_UID_LEN: usize = 8;
const L4_HASH_LEN: usize = 8;

/// Names resources owned by one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namer {
    prefix: String,
    cluster_uid: String,
}

impl Namer {
    pub fn new(prefix: impl Into<String>, cluster_uid: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cluster_uid: cluster_uid.into(),
        }
    }

    /// The cluster-wide instance group name, identical in every zone.
    pub fn instance_group(&self) -> String {
        format!(
            "{}-ig{}{}",
            self.prefix, CLUSTER_NAME_DELIMITER, self.cluster_uid
        )
    }

    /// Named-port name for `port`.
    pub fn named_port(&self, port: i64) -> String {
        format!("port{port}")
    }

    /// Returns true if `name` was produced by this namer's cluster.
    pub fn name_belongs_to_cluster(&self, name: &str) -> bool {
        if !name.starts_with(&format!("{}-", self.prefix)) {
            return false;
        }
        match name.rsplit_once(CLUSTER_NAME_DELIMITER) {
            Some((_, uid)) => uid == self.cluster_uid,
            None => false,
        }
    }

    /// Name of the L4 forwarding rule for a Service.
    ///
    /// `k8s2-<proto>-<uid>-<namespace>-<name>-<hash>[-ipv6]`, with namespace
    /// and name truncated so the whole fits in 63 characters. The hash covers
    /// the untruncated inputs, so truncation never causes collisions.
    pub fn l4_forwarding_rule(
        &self,
        namespace: &str,
        name: &str,
        protocol: IpProtocol,
        ipv6: bool,
    ) -> String {
        let uid: String = self.cluster_uid.chars().take(L4_CLUSTER_UID_LEN).collect();
        let proto = match protocol {
            IpProtocol::Tcp => "tcp",
            IpProtocol::Udp => "udp",
            IpProtocol::L3Default => "l3",
        };

        let mut hasher = Sha256::new();
        hasher.update(format!("{uid};{namespace};{name};{proto}").as_bytes());
        let hash = hex::encode(hasher.finalize());

        let head = format!("{L4_PREFIX}-{proto}-{uid}");
        let tail = format!(
            "{}{}",
            &hash[..L4_HASH_LEN],
            if ipv6 { "-ipv6" } else { "" }
        );

        // Three dashes join head, namespace, name and tail.
        let budget = MAX_RESOURCE_NAME_LEN.saturating_sub(head.len() + tail.len() + 3);
        let (ns, svc) = trunc_fields(budget, namespace, name);

        format!("{head}-{ns}-{svc}-{tail}")
    }
}

/// Truncate two fields to share `budget` characters, longest first.
fn trunc_fields(budget: usize, first: &str, second: &str) -> (String, String) {
    let (a, b) = (first.chars().count(), second.chars().count());
    if a + b <= budget {
        return (first.to_string(), second.to_string());
    }

    let half = budget / 2;
    let (keep_a, keep_b) = if a <= half {
        (a, budget - a)
    } else if b <= budget - half {
        (budget - b, b)
    } else {
        (half, budget - half)
    };

    (
        first.chars().take(keep_a).collect(),
        second.chars().take(keep_b).collect(),
    )
}
