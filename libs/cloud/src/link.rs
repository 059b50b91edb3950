//! Resource URL parsing.
//!
//! The cloud returns the same resource under several equivalent URL forms
//! (different API hosts, with or without a version path). Comparisons go
//! through [`ResourceId`], which keeps only the trailing
//! `projects/<p>/<scope>/<type>/<name>` path.

use std::fmt;

use crate::error::{CloudError, CloudResult};

/// Location scope of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Regional(String),
    Zonal(String),
}

/// Normalized identity of a cloud resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub project: String,
    pub scope: Scope,
    pub resource_type: String,
    pub name: String,
}

impl ResourceId {
    /// The `projects/...` path, independent of host and API version.
    pub fn resource_path(&self) -> String {
        let scope = match &self.scope {
            Scope::Global => "global".to_string(),
            Scope::Regional(region) => format!("regions/{region}"),
            Scope::Zonal(zone) => format!("zones/{zone}"),
        };
        format!(
            "projects/{}/{}/{}/{}",
            self.project, scope, self.resource_type, self.name
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_path())
    }
}

/// Parse a full or partial resource URL.
///
/// Accepts anything containing a `projects/<p>/...` path, for example
/// `https://www.googleapis.com/compute/v1/projects/p/regions/r/backendServices/bs`.
pub fn parse_resource_url(url: &str) -> CloudResult<ResourceId> {
    let invalid = || CloudError::InvalidResource(format!("cannot parse resource URL '{url}'"));

    let start = url.find("projects/").ok_or_else(invalid)?;
    let parts: Vec<&str> = url[start..].trim_end_matches('/').split('/').collect();

    let (project, rest) = match parts.as_slice() {
        ["projects", project, rest @ ..] if !project.is_empty() => (*project, rest),
        _ => return Err(invalid()),
    };

    let (scope, resource_type, name) = match rest {
        ["global", resource_type, name] => (Scope::Global, *resource_type, *name),
        ["regions", region, resource_type, name] => {
            (Scope::Regional(region.to_string()), *resource_type, *name)
        }
        ["zones", zone, resource_type, name] => {
            (Scope::Zonal(zone.to_string()), *resource_type, *name)
        }
        _ => return Err(invalid()),
    };

    if resource_type.is_empty() || name.is_empty() {
        return Err(invalid());
    }

    Ok(ResourceId {
        project: project.to_string(),
        scope,
        resource_type: resource_type.to_string(),
        name: name.to_string(),
    })
}

/// The trailing name segment of a resource URL.
pub fn key_name(url: &str) -> CloudResult<String> {
    match url.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(CloudError::InvalidResource(format!(
            "cannot read resource name from '{url}'"
        ))),
    }
}
