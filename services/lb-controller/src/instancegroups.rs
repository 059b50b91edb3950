//! Instance-group membership reconciliation.
//!
//! The manager:
//! - Ensures one instance group per zone with eligible nodes, carrying the
//!   requested named ports
//! - Syncs each zone's group membership to the cluster's nodes
//! - Deletes and lists the groups it owns
//!
//! Group lifecycle during [`InstanceGroupManager::sync`] is owned elsewhere:
//! a group missing at sync time is a no-op, not an error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use lbsync_cloud::{
    key_name, CloudResult, EventRecorder, EventType, InstanceFilter, InstanceGroup,
    InstanceGroupApi, InstanceReference, NamedPort, NodeFilter, ZoneDirectory,
};
use lbsync_reconcile::{truncate_sorted, MembershipDiff, TruncatedList};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ControllerError, ControllerResult, ZoneFailure};
use crate::namer::Namer;

/// Event reason for membership additions.
pub const EVENT_ADD_NODES: &str = "AddNodes";

/// Event reason for membership removals.
pub const EVENT_REMOVE_NODES: &str = "RemoveNodes";

/// Dependencies and settings for [`InstanceGroupManager`].
pub struct ManagerConfig {
    pub cloud: Arc<dyn InstanceGroupApi>,
    pub zones: Arc<dyn ZoneDirectory>,
    pub recorder: Arc<dyn EventRecorder>,
    pub namer: Namer,

    /// Prefix of instance URLs, e.g. `https://.../compute/v1/projects/p/`.
    pub base_path: String,

    /// Maximum members per zonal group.
    pub max_ig_size: usize,
}

/// Reconciles zonal instance groups against cluster nodes.
pub struct InstanceGroupManager {
    cloud: Arc<dyn InstanceGroupApi>,
    zones: Arc<dyn ZoneDirectory>,
    recorder: Arc<dyn EventRecorder>,
    namer: Namer,
    base_path: String,
    max_ig_size: usize,
}

impl InstanceGroupManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            cloud: config.cloud,
            zones: config.zones,
            recorder: config.recorder,
            namer: config.namer,
            base_path: config.base_path,
            max_ig_size: config.max_ig_size.max(1),
        }
    }

    /// Get or create `name` in every zone with candidate nodes and make sure
    /// each group advertises `ports`.
    ///
    /// Named ports already present on any zone's group are carried to every
    /// other zone, so all returned groups expose the same port numbers. Each
    /// group's named ports are returned sorted by port.
    #[instrument(skip_all, fields(group = %name))]
    pub async fn ensure_instance_groups_and_ports(
        &self,
        name: &str,
        ports: &[i64],
    ) -> ControllerResult<Vec<InstanceGroup>> {
        let zones = self.zones.list_zones(NodeFilter::CandidateNodes).await?;
        debug!(group = name, ports = ?ports, zones = zones.len(), "Ensuring instance groups");

        let mut groups = Vec::with_capacity(zones.len());
        for zone in &zones {
            groups.push((zone.as_str(), self.ensure_instance_group(name, zone).await?));
        }

        // First name seen for a port wins, in zone order.
        let mut union: BTreeMap<i64, NamedPort> = BTreeMap::new();
        for (_, group) in &groups {
            for np in &group.named_ports {
                union.entry(np.port).or_insert_with(|| np.clone());
            }
        }
        for &port in ports {
            union.entry(port).or_insert_with(|| NamedPort {
                name: self.namer.named_port(port),
                port,
            });
        }

        let mut ensured = Vec::with_capacity(groups.len());
        for (zone, mut group) in groups {
            let missing: Vec<NamedPort> = union
                .values()
                .filter(|np| !group.has_port(np.port))
                .cloned()
                .collect();

            if missing.is_empty() {
                debug!(zone, group = name, "Instance group already has all named ports");
            } else {
                let added: Vec<i64> = missing.iter().map(|np| np.port).collect();
                info!(zone, group = name, ports = ?added, "Adding named ports to instance group");

                let mut named_ports = group.named_ports.clone();
                named_ports.extend(missing);
                self.cloud.set_named_ports(&group.name, zone, &named_ports).await?;
                group.named_ports = named_ports;
            }

            group.named_ports.sort_by_key(|np| np.port);
            ensured.push(group);
        }
        Ok(ensured)
    }

    async fn ensure_instance_group(
        &self,
        name: &str,
        zone: &str,
    ) -> ControllerResult<InstanceGroup> {
        if let Some(group) = self.get(name, zone).await? {
            debug!(zone, group = name, "Instance group already exists");
            return Ok(group);
        }

        info!(zone, group = name, "Creating instance group");
        match self
            .cloud
            .create_instance_group(&InstanceGroup::named(name), zone)
            .await
        {
            Ok(()) => {}
            // Another controller may have created the same group first.
            Err(e) if e.is_conflict() => {
                warn!(
                    zone,
                    group = name,
                    error = %e,
                    "Instance group creation conflicted, continuing sync"
                );
            }
            Err(e) => {
                error!(zone, group = name, error = %e, "Failed to create instance group");
                return Err(e.into());
            }
        }

        let group = self
            .cloud
            .get_instance_group(name, zone)
            .await
            .inspect_err(|e| {
                error!(
                    zone,
                    group = name,
                    error = %e,
                    "Failed to get instance group after ensuring existence"
                )
            })?;
        Ok(group)
    }

    /// Fetch a group, mapping `NotFound` to `None`.
    pub async fn get(&self, name: &str, zone: &str) -> ControllerResult<Option<InstanceGroup>> {
        match self.cloud.get_instance_group(name, zone).await {
            Ok(group) => Ok(Some(group)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => {
                error!(zone, group = name, error = %e, "Failed to get instance group");
                Err(e.into())
            }
        }
    }

    /// Delete `name` from every zone with nodes.
    ///
    /// Missing and still-in-use groups are skipped; other failures are
    /// collected and returned together after every zone was attempted.
    #[instrument(skip_all, fields(group = %name))]
    pub async fn delete_instance_group(&self, name: &str) -> ControllerResult<()> {
        let zones = self.zones.list_zones(NodeFilter::AllNodes).await?;

        let mut failures = Vec::new();
        for zone in zones {
            match self.cloud.delete_instance_group(name, &zone).await {
                Ok(()) => info!(zone = %zone, group = name, "Deleted instance group"),
                Err(e) if e.is_not_found() => {
                    info!(zone = %zone, group = name, "Instance group did not exist")
                }
                Err(e) if e.is_in_use() => {
                    info!(
                        zone = %zone,
                        group = name,
                        error = %e,
                        "Instance group still in use, not deleting"
                    )
                }
                Err(e) => {
                    warn!(zone = %zone, group = name, error = %e, "Failed to delete instance group");
                    failures.push(ZoneFailure { zone, error: e });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Zones(failures))
        }
    }

    /// Names of this cluster's groups across all zones, each listed once.
    pub async fn list(&self) -> ControllerResult<Vec<String>> {
        let zones = self.zones.list_zones(NodeFilter::AllNodes).await?;

        let mut names = BTreeSet::new();
        for zone in &zones {
            for group in self.cloud.list_instance_groups(zone).await? {
                if self.namer.name_belongs_to_cluster(&group.name) {
                    names.insert(group.name);
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Converge every zone's group membership to `nodes`.
    ///
    /// Zones are processed concurrently and independently. Failed zones are
    /// reported together once every zone has been attempted.
    #[instrument(skip_all, fields(node_count = nodes.len()))]
    pub async fn sync(&self, nodes: &[String]) -> ControllerResult<()> {
        info!(nodes = %TruncatedList(nodes), "Syncing nodes");

        let group_name = self.namer.instance_group();
        let zoned = self.split_nodes_by_zone(nodes).await;

        let results = join_all(zoned.into_iter().map(|(zone, zone_nodes)| {
            let group_name = group_name.as_str();
            async move {
                let result = self.sync_zone(group_name, &zone, zone_nodes).await;
                (zone, result)
            }
        }))
        .await;

        let failures: Vec<ZoneFailure> = results
            .into_iter()
            .filter_map(|(zone, result)| result.err().map(|error| ZoneFailure { zone, error }))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                error!(zone = %failure.zone, error = %failure.error, "Zone membership sync failed");
            }
            Err(ControllerError::Zones(failures))
        }
    }

    /// Group canonical node names by zone. Unresolvable nodes are skipped.
    async fn split_nodes_by_zone(&self, nodes: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut by_zone: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in nodes {
            match self.zones.zone_for_node(node).await {
                Ok(zone) => by_zone
                    .entry(zone)
                    .or_default()
                    .push(canonicalize_instance_name(node).to_string()),
                Err(e) => {
                    error!(node = %node, error = %e, "Failed to get zone for node, skipping");
                }
            }
        }
        by_zone
    }

    async fn sync_zone(&self, group: &str, zone: &str, nodes: Vec<String>) -> CloudResult<()> {
        let total = nodes.len();
        let truncation = truncate_sorted(nodes, self.max_ig_size);
        if truncation.is_truncated() {
            info!(
                zone,
                total,
                max_ig_size = self.max_ig_size,
                truncated = %TruncatedList(&truncation.dropped),
                "Truncating nodes to maximum instance group size"
            );
        }

        let actual = match self.group_members(group, zone).await {
            Ok(members) => members,
            Err(e) if e.is_not_found() => {
                info!(zone, group, "Instance group not found, skipping membership sync");
                return Ok(());
            }
            Err(e) => {
                error!(zone, group, error = %e, "Failed to list instances from instance group");
                return Err(e);
            }
        };

        let diff = MembershipDiff::compute(truncation.kept, actual);
        if diff.is_empty() {
            debug!(zone, group, "Instance group membership already in sync");
            return Ok(());
        }

        info!(
            zone,
            group,
            remove = %TruncatedList(&diff.to_remove),
            add = %TruncatedList(&diff.to_add),
            "Computed instance group membership changes"
        );

        // Shrink before growing so the group never exceeds its capacity.
        if !diff.to_remove.is_empty() {
            let start = Instant::now();
            let result = self.remove(group, &diff.to_remove, zone).await;
            info!(
                zone,
                group,
                ok = result.is_ok(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Remove finished"
            );
            tolerate_missing_group(result, zone, group)?;
        }

        if !diff.to_add.is_empty() {
            let start = Instant::now();
            let result = self.add(group, &diff.to_add, zone).await;
            info!(
                zone,
                group,
                ok = result.is_ok(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Add finished"
            );
            tolerate_missing_group(result, zone, group)?;
        }

        Ok(())
    }

    /// Current member names, derived from the instance URLs.
    async fn group_members(&self, group: &str, zone: &str) -> CloudResult<BTreeSet<String>> {
        let instances = self
            .cloud
            .list_instances_in_group(group, zone, InstanceFilter::All)
            .await?;

        let mut members = BTreeSet::new();
        for instance in instances {
            match key_name(&instance.instance) {
                Ok(name) => {
                    members.insert(name);
                }
                Err(e) => {
                    warn!(
                        zone,
                        group,
                        instance = %instance.instance,
                        error = %e,
                        "Skipping unreadable instance URL"
                    );
                }
            }
        }
        Ok(members)
    }

    fn instance_references(&self, zone: &str, names: &[String]) -> Vec<InstanceReference> {
        names
            .iter()
            .map(|name| InstanceReference {
                instance: format!(
                    "{}zones/{}/instances/{}",
                    self.base_path,
                    zone,
                    canonicalize_instance_name(name)
                ),
            })
            .collect()
    }

    async fn add(&self, group: &str, names: &[String], zone: &str) -> CloudResult<()> {
        self.recorder.record(
            EventType::Normal,
            EVENT_ADD_NODES,
            &format!("Adding {} to InstanceGroup {group:?}", TruncatedList(names)),
        );
        info!(zone, group, node_count = names.len(), "Adding nodes to instance group");

        let refs = self.instance_references(zone, names);
        match self.cloud.add_instances_to_group(group, zone, &refs).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_member_already_exists() => {
                debug!(zone, group, error = %e, "Some nodes were already members");
                Ok(())
            }
            Err(e) => {
                self.recorder.record(
                    EventType::Warning,
                    EVENT_ADD_NODES,
                    &format!(
                        "Error adding {} to InstanceGroup {group:?}: {e}",
                        TruncatedList(names)
                    ),
                );
                Err(e)
            }
        }
    }

    async fn remove(&self, group: &str, names: &[String], zone: &str) -> CloudResult<()> {
        self.recorder.record(
            EventType::Normal,
            EVENT_REMOVE_NODES,
            &format!("Removing {} from InstanceGroup {group:?}", TruncatedList(names)),
        );
        info!(zone, group, node_count = names.len(), "Removing nodes from instance group");

        let refs = self.instance_references(zone, names);
        self.cloud
            .remove_instances_from_group(group, zone, &refs)
            .await
            .inspect_err(|e| {
                self.recorder.record(
                    EventType::Warning,
                    EVENT_REMOVE_NODES,
                    &format!(
                        "Error removing nodes {} from InstanceGroup {group:?}: {e}",
                        TruncatedList(names)
                    ),
                );
            })
    }
}

/// A group deleted mid-pass is someone else's lifecycle decision.
fn tolerate_missing_group(result: CloudResult<()>, zone: &str, group: &str) -> CloudResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            info!(zone, group, error = %e, "Instance group disappeared during sync, ignoring");
            Ok(())
        }
        other => other,
    }
}

/// Reduce a node hostname such as `node-2.c.my-proj.internal` to the
/// instance name `node-2`.
pub fn canonicalize_instance_name(name: &str) -> &str {
    match name.find('.') {
        Some(ix) => &name[..ix],
        None => name,
    }
}
