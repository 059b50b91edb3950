//! # lbsync-cloud
//!
//! The collaborator surface consumed by the load-balancer reconcilers.
//!
//! ## Design Principles
//!
//! - Reconcilers depend only on the capability traits in [`api`]
//! - Every call returns a structured [`CloudError`]; callers switch on the
//!   variant, never on message text
//! - Every cloud call can be observed through [`InstrumentedCloud`] without
//!   changing its result
//!
//! ## Backends
//!
//! - A production client implements the traits outside this workspace
//! - [`fake`] provides a deterministic in-memory backend for tests

pub mod api;
mod error;
pub mod fake;
mod instrumented;
mod link;
pub mod metrics;
mod types;

pub use api::{
    EventRecorder, EventType, ForwardingRuleApi, InstanceGroupApi, NodeFilter, NoopRecorder,
    ServiceApi, ZoneDirectory,
};
pub use error::{CloudError, CloudResult};
pub use instrumented::InstrumentedCloud;
pub use link::{key_name, parse_resource_url, ResourceId, Scope};
pub use metrics::{ApiMetrics, MetricContext};
pub use types::*;
