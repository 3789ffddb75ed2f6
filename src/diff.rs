//! Structural diffing of attribute trees.
//!
//! The classifier uses this module to decide whether a planned resource
//! differs from its live counterpart, and the change ledger uses it to
//! render per-step diff reports. Comparison is structural over the
//! JSON-like attribute variant, ignores list-order changes by default, and
//! can suppress whole subtrees through a field mask of dot-paths.

use serde_json::Value;

/// One divergence between two attribute trees.
///
/// `old == None` means the path was added, `new == None` means it was
/// removed, both present means it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    /// Dot-joined path from the attribute root.
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Removes every masked dot-path from the tree. Mask segments address map
/// keys only; list elements cannot be masked individually.
pub fn apply_mask(value: &Value, ignore_fields: &[String]) -> Value {
    let mut out = value.clone();
    for field in ignore_fields {
        let segments: Vec<&str> = field.split('.').collect();
        remove_path(&mut out, &segments);
    }
    out
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if let Value::Object(map) = value {
        if rest.is_empty() {
            map.remove(*head);
        } else if let Some(child) = map.get_mut(*head) {
            remove_path(child, rest);
        }
    }
}

/// Compares two attribute trees under a field mask.
pub fn unchanged(old: &Value, new: &Value, ignore_fields: &[String]) -> bool {
    let old = apply_mask(old, ignore_fields);
    let new = apply_mask(new, ignore_fields);
    values_equal(&old, &new)
}

/// Structural equality that treats lists as multisets.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            if xs.len() != ys.len() {
                return false;
            }
            let mut used = vec![false; ys.len()];
            xs.iter().all(|x| {
                ys.iter().enumerate().any(|(i, y)| {
                    if !used[i] && values_equal(x, y) {
                        used[i] = true;
                        true
                    } else {
                        false
                    }
                })
            })
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Computes the list of divergences between two trees.
///
/// Maps are recursed into per key; a list that differs (as a multiset)
/// produces a single entry for the whole list path. Entry order follows a
/// depth-first walk over sorted keys and is deterministic.
pub fn entries(old: &Value, new: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    walk_diff("", Some(old), Some(new), &mut out);
    out
}

fn walk_diff(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<DiffEntry>) {
    match (old, new) {
        (Some(Value::Object(om)), Some(Value::Object(nm))) => {
            let mut keys: Vec<&String> = om.keys().chain(nm.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = join_path(path, key);
                walk_diff(&child, om.get(key.as_str()), nm.get(key.as_str()), out);
            }
        }
        (Some(o), Some(n)) => {
            if !values_equal(o, n) {
                out.push(DiffEntry {
                    path: path.to_string(),
                    old: Some(o.clone()),
                    new: Some(n.clone()),
                });
            }
        }
        (Some(o), None) => out.push(DiffEntry {
            path: path.to_string(),
            old: Some(o.clone()),
            new: None,
        }),
        (None, Some(n)) => out.push(DiffEntry {
            path: path.to_string(),
            old: None,
            new: Some(n.clone()),
        }),
        (None, None) => {}
    }
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

/// Renders entries as a line-per-divergence report:
///
/// ```text
/// ~ spec.replicas: 1 -> 3
/// + metadata.labels: {"app":"web"}
/// - status: "stale"
/// ```
pub fn render(entries: &[DiffEntry]) -> String {
    let mut report = String::new();
    for entry in entries {
        let line = match (&entry.old, &entry.new) {
            (Some(old), Some(new)) => {
                format!("~ {}: {} -> {}", entry.path, compact(old), compact(new))
            }
            (None, Some(new)) => format!("+ {}: {}", entry.path, compact(new)),
            (Some(old), None) => format!("- {}: {}", entry.path, compact(old)),
            (None, None) => continue,
        };
        report.push_str(&line);
        report.push('\n');
    }
    report
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}
