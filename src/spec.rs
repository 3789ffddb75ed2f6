//! Intent spec parsing and validation.
//!
//! A [`Spec`] is the user-declared desired resource set for one stack. The
//! engine accepts it as a value; producing it from source files is the
//! compiler's job and out of scope here. Manifests arrive as YAML or JSON
//! and deserialize into the same camelCase wire format the state snapshot
//! uses.

use crate::error::{Error, Result};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The desired resource set for a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// Planned resources in declaration order.
    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Cluster tag derived from the manifest. When present it overrides the
    /// cluster named in the operation request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl Spec {
    /// Creates a spec from a list of resources.
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            cluster: None,
        }
    }

    /// Parses a spec from YAML bytes.
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(yaml)
            .map_err(|e| Error::IllegalManifest(format!("invalid manifest yaml: {e}")))
    }

    /// Parses a spec from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::IllegalManifest(format!("invalid manifest json: {e}")))
    }

    /// Validates the structural invariants every operation relies on:
    ///
    /// - resource ids are non-empty and unique,
    /// - every `dependsOn` target names a resource in this spec,
    /// - no resource depends on itself.
    ///
    /// Cycle detection across declared and implicit edges happens later, on
    /// the full graph, where prior-state resources are also in play.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if resource.id.is_empty() {
                return Err(Error::IllegalManifest(
                    "resource with empty id".to_string(),
                ));
            }
            if !seen.insert(resource.id.as_str()) {
                return Err(Error::IllegalManifest(format!(
                    "duplicate resource id: {}",
                    resource.id
                )));
            }
        }

        for resource in &self.resources {
            for dep in &resource.depends_on {
                if dep == &resource.id {
                    return Err(Error::IllegalManifest(format!(
                        "resource {} depends on itself",
                        resource.id
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(Error::IllegalManifest(format!(
                        "resource {} depends on unknown resource {}",
                        resource.id, dep
                    )));
                }
            }
        }

        Ok(())
    }
}
