//! Cross-resource reference resolution.
//!
//! Attribute trees may contain placeholder strings of the form
//! `$kusion_path:<resourceID>.<segment>(.<segment>)*`. The resolver
//! replaces each placeholder with the value addressed inside the referenced
//! resource's attributes. Segments address map keys or list indices.
//!
//! Resolution runs per node during the graph walk, in topological order
//! over both declared dependencies and the reference edges themselves, so
//! a placeholder always points at attributes that are already final.

use crate::constants::IMPLICIT_REF_PREFIX;
use crate::error::{Error, Result};
use crate::resource::Resource;
use serde_json::Value;
use std::collections::HashMap;

/// Returns the ids of all resources referenced by placeholders anywhere in
/// the attribute tree. Used by the graph builder to add implicit edges.
pub fn referred_ids(attributes: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    collect_ids(attributes, &mut ids);
    ids
}

fn collect_ids(value: &Value, ids: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix(IMPLICIT_REF_PREFIX) {
                let target = rest.split('.').next().unwrap_or(rest);
                if !target.is_empty() && !ids.contains(&target.to_string()) {
                    ids.push(target.to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ids(item, ids);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_ids(item, ids);
            }
        }
        _ => {}
    }
}

/// Returns a copy of `attributes` with every placeholder replaced by the
/// value it addresses in `resolved`, the in-run index of already-final
/// resources.
///
/// Fails with [`Error::IllegalManifest`] when the target resource or any
/// path segment does not exist.
pub fn resolve_refs(attributes: &Value, resolved: &HashMap<String, Resource>) -> Result<Value> {
    match attributes {
        Value::String(s) => match s.strip_prefix(IMPLICIT_REF_PREFIX) {
            Some(rest) => lookup(rest, resolved),
            None => Ok(attributes.clone()),
        },
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_refs(item, resolved)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), resolve_refs(item, resolved)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(attributes.clone()),
    }
}

/// Resolves one token body (`<id>.<path>...`, prefix already stripped)
/// against the resolved index.
fn lookup(token: &str, resolved: &HashMap<String, Resource>) -> Result<Value> {
    let mut segments = token.split('.');
    let target = segments.next().unwrap_or_default();

    let not_found = || {
        Error::IllegalManifest(format!(
            "can't find specified value in resource:{target} by ref:{token}"
        ))
    };

    let resource = resolved.get(target).ok_or_else(not_found)?;

    let mut current = &resource.attributes;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(not_found)?,
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| not_found())?;
                items.get(index).ok_or_else(not_found)?
            }
            _ => return Err(not_found()),
        };
    }

    Ok(current.clone())
}
