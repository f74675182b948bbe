//! Small typed accessors over KDL nodes.

use kdl::KdlNode;

/// Get a named string entry from a node's children, e.g. `address "0.0.0.0:9123"`
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    let children = node.children()?;
    let child = children.nodes().iter().find(|n| n.name().value() == name)?;
    get_first_arg_string(child)
}

/// Get a named integer entry from a node's children, e.g. `per-client 5`
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    let children = node.children()?;
    let child = children.nodes().iter().find(|n| n.name().value() == name)?;
    child
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

/// Get a named boolean entry from a node's children, e.g. `trust-forwarded-header #true`
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    let children = node.children()?;
    let child = children.nodes().iter().find(|n| n.name().value() == name)?;
    child
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

/// Get the first positional string argument of a node, e.g. `allow "pds.example.com"`
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}
