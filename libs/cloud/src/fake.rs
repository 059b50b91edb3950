//! Deterministic in-memory backend for tests and development.
//!
//! Mirrors the semantics reconcilers depend on:
//! - creating an existing resource fails with `Conflict`
//! - adding an existing member fails with `MemberAlreadyExists` after the
//!   other members are added
//! - removing an absent member is a no-op
//! - forwarding rules created without an address get [`FAKE_FORWARDING_RULE_IP`]
//!
//! Every call is appended to a call log, and errors can be injected per
//! operation (optionally scoped to one zone or region).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{EventRecorder, EventType, ForwardingRuleApi, InstanceGroupApi, NodeFilter};
use crate::api::{ServiceApi, ZoneDirectory};
use crate::error::{CloudError, CloudResult};
use crate::types::{
    ForwardingRule, InstanceFilter, InstanceGroup, InstanceReference, InstanceWithNamedPorts,
    LoadBalancerStatus, NamedPort, ObjectMeta, Service,
};

/// Address assigned to forwarding rules inserted without one.
pub const FAKE_FORWARDING_RULE_IP: &str = "10.0.0.1";

/// Operations recorded in the call log and targetable by injected errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FakeOp {
    GetInstanceGroup,
    CreateInstanceGroup,
    DeleteInstanceGroup,
    ListInstanceGroups,
    ListInstances,
    AddInstances,
    RemoveInstances,
    SetNamedPorts,
    GetForwardingRule,
    CreateForwardingRule,
    UpdateForwardingRule,
    PatchServiceMetadata,
    PatchServiceStatus,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub op: FakeOp,

    /// Zone, region or Service key.
    pub scope: String,

    /// Resource name.
    pub target: String,

    /// Instance URLs or port names carried by the call, if any.
    pub items: Vec<String>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FakeOp,
    scope: Option<String>,
    error: CloudError,
    once: bool,
}

#[derive(Debug, Default)]
struct FakeGroup {
    group: InstanceGroup,
    members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    groups: BTreeMap<(String, String), FakeGroup>,
    rules: BTreeMap<(String, String), ForwardingRule>,
    services: BTreeMap<String, Service>,
    faults: Vec<Fault>,
    calls: Vec<FakeCall>,
}

impl FakeState {
    /// Log the call and return the injected error for it, if any.
    fn enter(
        &mut self,
        op: FakeOp,
        scope: &str,
        target: &str,
        items: Vec<String>,
    ) -> CloudResult<()> {
        self.calls.push(FakeCall {
            op,
            scope: scope.to_string(),
            target: target.to_string(),
            items,
        });

        let position = self
            .faults
            .iter()
            .position(|f| f.op == op && f.scope.as_deref().map_or(true, |s| s == scope));
        match position {
            Some(ix) if self.faults[ix].once => Err(self.faults.remove(ix).error),
            Some(ix) => Err(self.faults[ix].error.clone()),
            None => Ok(()),
        }
    }

    fn group_mut(&mut self, name: &str, zone: &str) -> CloudResult<&mut FakeGroup> {
        self.groups
            .get_mut(&(zone.to_string(), name.to_string()))
            .ok_or_else(|| CloudError::NotFound(format!("instance group {zone}/{name}")))
    }
}

/// In-memory cloud and cluster backend.
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject `error` for every future `op` call, optionally only in `scope`.
    pub async fn inject(&self, op: FakeOp, scope: Option<&str>, error: CloudError) {
        self.state.lock().await.faults.push(Fault {
            op,
            scope: scope.map(str::to_string),
            error,
            once: false,
        });
    }

    /// Inject `error` for the next matching `op` call only.
    pub async fn inject_once(&self, op: FakeOp, scope: Option<&str>, error: CloudError) {
        self.state.lock().await.faults.push(Fault {
            op,
            scope: scope.map(str::to_string),
            error,
            once: true,
        });
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().await.calls.clone()
    }

    /// Calls of a single operation, in order.
    pub async fn calls_for(&self, op: FakeOp) -> Vec<FakeCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Seed an instance group without logging a call.
    pub async fn insert_instance_group(&self, zone: &str, mut group: InstanceGroup) {
        group.zone = zone.to_string();
        let key = (zone.to_string(), group.name.clone());
        self.state.lock().await.groups.insert(
            key,
            FakeGroup {
                group,
                members: BTreeSet::new(),
            },
        );
    }

    /// Seed members (instance URLs) of an existing group.
    pub async fn insert_members<I, S>(&self, zone: &str, name: &str, instances: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        if let Ok(group) = state.group_mut(name, zone) {
            group.members.extend(instances.into_iter().map(Into::into));
        }
    }

    pub async fn instance_group(&self, zone: &str, name: &str) -> Option<InstanceGroup> {
        let state = self.state.lock().await;
        state
            .groups
            .get(&(zone.to_string(), name.to_string()))
            .map(|g| g.group.clone())
    }

    /// Member URLs of a group, sorted.
    pub async fn members(&self, zone: &str, name: &str) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        state
            .groups
            .get(&(zone.to_string(), name.to_string()))
            .map(|g| g.members.iter().cloned().collect())
    }

    pub async fn insert_forwarding_rule(&self, region: &str, rule: ForwardingRule) {
        let key = (region.to_string(), rule.name.clone());
        self.state.lock().await.rules.insert(key, rule);
    }

    pub async fn forwarding_rule(&self, region: &str, name: &str) -> Option<ForwardingRule> {
        let state = self.state.lock().await;
        state
            .rules
            .get(&(region.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn insert_service(&self, service: Service) {
        self.state.lock().await.services.insert(service.key(), service);
    }

    pub async fn service(&self, key: &str) -> Option<Service> {
        self.state.lock().await.services.get(key).cloned()
    }
}

fn urls(instances: &[InstanceReference]) -> Vec<String> {
    instances.iter().map(|r| r.instance.clone()).collect()
}

#[async_trait]
impl InstanceGroupApi for FakeCloud {
    async fn get_instance_group(&self, name: &str, zone: &str) -> CloudResult<InstanceGroup> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::GetInstanceGroup, zone, name, Vec::new())?;
        Ok(state.group_mut(name, zone)?.group.clone())
    }

    async fn create_instance_group(&self, group: &InstanceGroup, zone: &str) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::CreateInstanceGroup, zone, &group.name, Vec::new())?;

        let key = (zone.to_string(), group.name.clone());
        if state.groups.contains_key(&key) {
            return Err(CloudError::Conflict(format!(
                "instance group {zone}/{} already exists",
                group.name
            )));
        }

        let mut group = group.clone();
        group.zone = zone.to_string();
        group.self_link = format!("zones/{zone}/instanceGroups/{}", group.name);
        debug!(zone, group = %group.name, "[FAKE] Created instance group");
        state.groups.insert(
            key,
            FakeGroup {
                group,
                members: BTreeSet::new(),
            },
        );
        Ok(())
    }

    async fn delete_instance_group(&self, name: &str, zone: &str) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::DeleteInstanceGroup, zone, name, Vec::new())?;
        state
            .groups
            .remove(&(zone.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("instance group {zone}/{name}")))
    }

    async fn list_instance_groups(&self, zone: &str) -> CloudResult<Vec<InstanceGroup>> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::ListInstanceGroups, zone, "", Vec::new())?;
        Ok(state
            .groups
            .iter()
            .filter(|((z, _), _)| z == zone)
            .map(|(_, g)| g.group.clone())
            .collect())
    }

    async fn list_instances_in_group(
        &self,
        name: &str,
        zone: &str,
        filter: InstanceFilter,
    ) -> CloudResult<Vec<InstanceWithNamedPorts>> {
        let mut state = self.state.lock().await;
        state.enter(
            FakeOp::ListInstances,
            zone,
            name,
            vec![filter.as_str().to_string()],
        )?;
        Ok(state
            .group_mut(name, zone)?
            .members
            .iter()
            .map(|url| InstanceWithNamedPorts {
                instance: url.clone(),
                status: "RUNNING".to_string(),
            })
            .collect())
    }

    async fn add_instances_to_group(
        &self,
        name: &str,
        zone: &str,
        instances: &[InstanceReference],
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::AddInstances, zone, name, urls(instances))?;

        let group = state.group_mut(name, zone)?;
        let mut existing = Vec::new();
        for url in urls(instances) {
            if !group.members.insert(url.clone()) {
                existing.push(url);
            }
        }

        if existing.is_empty() {
            Ok(())
        } else {
            Err(CloudError::MemberAlreadyExists(existing.join(",")))
        }
    }

    async fn remove_instances_from_group(
        &self,
        name: &str,
        zone: &str,
        instances: &[InstanceReference],
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::RemoveInstances, zone, name, urls(instances))?;

        let group = state.group_mut(name, zone)?;
        for instance in instances {
            group.members.remove(&instance.instance);
        }
        Ok(())
    }

    async fn set_named_ports(
        &self,
        name: &str,
        zone: &str,
        ports: &[NamedPort],
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        let items = ports.iter().map(|p| format!("{}:{}", p.name, p.port)).collect();
        state.enter(FakeOp::SetNamedPorts, zone, name, items)?;

        state.group_mut(name, zone)?.group.named_ports = ports.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ForwardingRuleApi for FakeCloud {
    async fn get_forwarding_rule(&self, name: &str, region: &str) -> CloudResult<ForwardingRule> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::GetForwardingRule, region, name, Vec::new())?;
        state
            .rules
            .get(&(region.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("forwarding rule {region}/{name}")))
    }

    async fn create_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        region: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::CreateForwardingRule, region, &rule.name, rule.ports.clone())?;

        let key = (region.to_string(), rule.name.clone());
        if state.rules.contains_key(&key) {
            return Err(CloudError::Conflict(format!(
                "forwarding rule {region}/{} already exists",
                rule.name
            )));
        }

        let mut rule = rule.clone();
        if rule.ip_address.is_empty() {
            rule.ip_address = FAKE_FORWARDING_RULE_IP.to_string();
        }
        rule.region = region.to_string();
        state.rules.insert(key, rule);
        Ok(())
    }

    async fn update_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        region: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.enter(FakeOp::UpdateForwardingRule, region, &rule.name, rule.ports.clone())?;

        let key = (region.to_string(), rule.name.clone());
        let existing = state
            .rules
            .get(&key)
            .ok_or_else(|| CloudError::NotFound(format!("forwarding rule {region}/{}", rule.name)))?;

        let mut updated = rule.clone();
        if updated.ip_address.is_empty() {
            updated.ip_address = existing.ip_address.clone();
        }
        updated.region = region.to_string();
        state.rules.insert(key, updated);
        Ok(())
    }
}

#[async_trait]
impl ServiceApi for FakeCloud {
    async fn patch_service_metadata(
        &self,
        service: &Service,
        metadata: &ObjectMeta,
    ) -> CloudResult<()> {
        let key = service.key();
        let mut state = self.state.lock().await;
        let items = metadata.annotations.keys().cloned().collect();
        state.enter(FakeOp::PatchServiceMetadata, &key, &service.metadata.name, items)?;

        let stored = state
            .services
            .get_mut(&key)
            .ok_or_else(|| CloudError::NotFound(format!("service {key}")))?;
        stored.metadata = metadata.clone();
        Ok(())
    }

    async fn patch_service_status(
        &self,
        service: &Service,
        status: &LoadBalancerStatus,
    ) -> CloudResult<()> {
        let key = service.key();
        let mut state = self.state.lock().await;
        let items = status
            .ingress
            .iter()
            .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
            .collect();
        state.enter(FakeOp::PatchServiceStatus, &key, &service.metadata.name, items)?;

        let stored = state
            .services
            .get_mut(&key)
            .ok_or_else(|| CloudError::NotFound(format!("service {key}")))?;
        stored.load_balancer = status.clone();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeNode {
    zone: String,
    candidate: bool,
}

/// Zone directory backed by a static node table.
#[derive(Debug, Default)]
pub struct FakeZoneDirectory {
    nodes: BTreeMap<String, FakeNode>,
    list_error: Option<CloudError>,
}

impl FakeZoneDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ready node eligible to back load balancers.
    pub fn with_node(mut self, node: &str, zone: &str) -> Self {
        self.nodes.insert(
            node.to_string(),
            FakeNode {
                zone: zone.to_string(),
                candidate: true,
            },
        );
        self
    }

    /// Add a node that only `NodeFilter::AllNodes` sees.
    pub fn with_unready_node(mut self, node: &str, zone: &str) -> Self {
        self.nodes.insert(
            node.to_string(),
            FakeNode {
                zone: zone.to_string(),
                candidate: false,
            },
        );
        self
    }

    /// Make every `list_zones` call fail.
    pub fn with_list_error(mut self, error: CloudError) -> Self {
        self.list_error = Some(error);
        self
    }
}

#[async_trait]
impl ZoneDirectory for FakeZoneDirectory {
    async fn list_zones(&self, filter: NodeFilter) -> CloudResult<Vec<String>> {
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }

        let zones: BTreeSet<String> = self
            .nodes
            .values()
            .filter(|n| filter == NodeFilter::AllNodes || n.candidate)
            .map(|n| n.zone.clone())
            .collect();
        Ok(zones.into_iter().collect())
    }

    async fn zone_for_node(&self, node: &str) -> CloudResult<String> {
        self.nodes
            .get(node)
            .map(|n| n.zone.clone())
            .ok_or_else(|| CloudError::NotFound(format!("zone for node {node}")))
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Event recorder that keeps every event in memory.
#[derive(Debug, Default)]
pub struct FakeRecorder {
    events: StdMutex<Vec<RecordedEvent>>,
}

impl FakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventRecorder for FakeRecorder {
    fn record(&self, event_type: EventType, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(url: &str) -> InstanceReference {
        InstanceReference {
            instance: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let cloud = FakeCloud::new();
        let group = InstanceGroup::named("ig");

        cloud.create_instance_group(&group, "zone-a").await.unwrap();
        let err = cloud.create_instance_group(&group, "zone-a").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_add_existing_member_reports_but_adds_rest() {
        let cloud = FakeCloud::new();
        cloud.insert_instance_group("zone-a", InstanceGroup::named("ig")).await;
        cloud.insert_members("zone-a", "ig", ["u/a"]).await;

        let err = cloud
            .add_instances_to_group("ig", "zone-a", &[reference("u/a"), reference("u/b")])
            .await
            .unwrap_err();
        assert!(err.is_member_already_exists());
        assert_eq!(
            cloud.members("zone-a", "ig").await.unwrap(),
            vec!["u/a".to_string(), "u/b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remove_absent_member_is_noop() {
        let cloud = FakeCloud::new();
        cloud.insert_instance_group("zone-a", InstanceGroup::named("ig")).await;

        cloud
            .remove_instances_from_group("ig", "zone-a", &[reference("u/x")])
            .await
            .unwrap();
        assert!(cloud.members("zone-a", "ig").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scoped_fault_only_hits_its_zone() {
        let cloud = FakeCloud::new();
        cloud.insert_instance_group("zone-a", InstanceGroup::named("ig")).await;
        cloud.insert_instance_group("zone-b", InstanceGroup::named("ig")).await;
        cloud
            .inject(
                FakeOp::GetInstanceGroup,
                Some("zone-b"),
                CloudError::Internal("boom".to_string()),
            )
            .await;

        assert!(cloud.get_instance_group("ig", "zone-a").await.is_ok());
        assert!(cloud.get_instance_group("ig", "zone-b").await.is_err());
        assert_eq!(cloud.calls_for(FakeOp::GetInstanceGroup).await.len(), 2);
    }

    #[tokio::test]
    async fn test_one_shot_fault_fires_once() {
        let cloud = FakeCloud::new();
        cloud.insert_instance_group("zone-a", InstanceGroup::named("ig")).await;
        cloud
            .inject_once(
                FakeOp::GetInstanceGroup,
                None,
                CloudError::NotFound("ig".to_string()),
            )
            .await;

        assert!(cloud.get_instance_group("ig", "zone-a").await.unwrap_err().is_not_found());
        assert!(cloud.get_instance_group("ig", "zone-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_hook_assigns_address() {
        let cloud = FakeCloud::new();
        let rule = ForwardingRule {
            name: "fr".to_string(),
            ..Default::default()
        };

        cloud.create_forwarding_rule(&rule, "r1").await.unwrap();
        let stored = cloud.get_forwarding_rule("fr", "r1").await.unwrap();
        assert_eq!(stored.ip_address, FAKE_FORWARDING_RULE_IP);
        assert_eq!(stored.region, "r1");
    }

    #[tokio::test]
    async fn test_zone_directory_filters() {
        let zones = FakeZoneDirectory::new()
            .with_node("a", "zone-b")
            .with_node("b", "zone-a")
            .with_unready_node("c", "zone-c");

        assert_eq!(
            zones.list_zones(NodeFilter::CandidateNodes).await.unwrap(),
            vec!["zone-a".to_string(), "zone-b".to_string()]
        );
        assert_eq!(zones.list_zones(NodeFilter::AllNodes).await.unwrap().len(), 3);
        assert!(zones.zone_for_node("missing").await.unwrap_err().is_not_found());
    }
}
