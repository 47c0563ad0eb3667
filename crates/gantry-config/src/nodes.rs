//! Accessors for KDL node arguments and properties.

use kdl::KdlNode;

use crate::{ConfigError, ConfigResult};

pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

pub(crate) fn first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

pub(crate) fn bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

/// A required string argument of a child node, e.g. `cause "push"`.
pub(crate) fn required_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    first_string_arg(node)
        .ok_or_else(|| ConfigError::invalid(field, "expected a string argument"))
}

pub(crate) fn required_bool(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    first_bool_arg(node).ok_or_else(|| ConfigError::invalid(field, "expected #true or #false"))
}

/// Children of a block node as `(key, first string argument)` pairs.
pub(crate) fn string_map(node: &KdlNode) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if let Some(val) = first_string_arg(child) {
                pairs.push((child.name().value().to_string(), val));
            }
        }
    }
    pairs
}
