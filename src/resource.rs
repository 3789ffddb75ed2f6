//! Resource model.
//!
//! A [`Resource`] is the unit the engine plans and executes: an id unique
//! within its stack, a schema-less attribute tree, declared dependencies and
//! runtime-specific extension metadata. The same type carries planned
//! resources (from the intent manifest) and live resources (from the
//! runtime or a persisted snapshot).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A planned or live resource.
///
/// Wire format (camelCase, per the manifest and snapshot schemas):
///
/// ```json
/// {
///   "id": "apps/v1:Deployment:web",
///   "type": "Kubernetes",
///   "attributes": { "spec": { "replicas": 3 } },
///   "dependsOn": ["v1:Namespace:web"],
///   "extensions": { "kind": "Deployment" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Globally unique id within a stack.
    pub id: String,

    /// Runtime driver hint (e.g. provider kind). Free-form.
    #[serde(default, rename = "type")]
    pub resource_type: String,

    /// Schema-less attribute tree: maps, lists and scalars.
    #[serde(default)]
    pub attributes: Value,

    /// Ids of resources this one depends on, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Runtime-specific typed metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, Value>,
}

impl Resource {
    /// Creates a resource with the given id and attributes and no
    /// dependencies.
    pub fn new(id: impl Into<String>, attributes: Value) -> Self {
        Self {
            id: id.into(),
            resource_type: String::new(),
            attributes,
            depends_on: Vec::new(),
            extensions: HashMap::new(),
        }
    }

    /// Returns the key this resource is indexed under.
    ///
    /// Currently the key is the id itself; call sites go through this
    /// accessor so the key shape stays in one place.
    pub fn key(&self) -> &str {
        &self.id
    }
}

/// Builds an `id → Resource` index over a resource list.
///
/// Later entries win on duplicate ids; manifest validation rejects
/// duplicates before any index built here is consulted.
pub fn index_by_id(resources: &[Resource]) -> HashMap<String, Resource> {
    resources
        .iter()
        .map(|r| (r.key().to_string(), r.clone()))
        .collect()
}
