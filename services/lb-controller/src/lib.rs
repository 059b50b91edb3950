//! lbsync controller core
//!
//! Keeps cloud load-balancer resources converged with a cluster's desired
//! state. Each reconciler reads current cloud state fresh, computes the
//! difference from the desired state and writes only what changed.
//!
//! ## Reconcilers
//!
//! - `instancegroups`: per-zone instance-group membership and named ports
//! - `forwardingrules`: forwarding-rule equality and create-or-update
//! - `patch`: Service annotation and load-balancer status patches
//! - `reconciler`: periodic membership sync loop
//!
//! All cloud access goes through the traits in `lbsync_cloud`; the
//! [`ControllerContext`] wires a concrete backend, metrics and the
//! reconcilers together.

pub mod config;
pub mod context;
pub mod error;
pub mod forwardingrules;
pub mod instancegroups;
pub mod namer;
pub mod patch;
pub mod reconciler;

pub use config::ControllerConfig;
pub use context::ControllerContext;
pub use error::{ControllerError, ControllerResult, ZoneFailure};
pub use forwardingrules::{
    desired_ipv6_forwarding_rule, equal_forwarding_rules, ForwardingRuleEnsurer, Ipv6RuleOptions,
    ResourceDescription,
};
pub use instancegroups::{canonicalize_instance_name, InstanceGroupManager, ManagerConfig};
pub use namer::Namer;
pub use patch::{skip_user_error, ServicePatcher};
pub use reconciler::{MembershipReconciler, NodeSource, ReconcilerConfig};
