//! Helpers for extracting values from KDL nodes.

use crate::{ConfigError, ConfigResult};
use ferry_core::task::Resources;
use kdl::{KdlNode, KdlValue};
use std::collections::BTreeMap;

fn args(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn name(node: &KdlNode) -> &str {
    node.name().value()
}

pub(crate) fn first_string_arg(node: &KdlNode) -> ConfigResult<String> {
    args(node)
        .next()
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::invalid(name(node), "expected a string argument"))
}

pub(crate) fn all_string_args(node: &KdlNode) -> ConfigResult<Vec<String>> {
    args(node)
        .map(|v| {
            v.as_string()
                .map(|s| s.to_string())
                .ok_or_else(|| ConfigError::invalid(name(node), format!("{v} is not a string")))
        })
        .collect()
}

/// A flag node: bare `flag` means true, otherwise `flag #true` / `flag #false`.
pub(crate) fn bool_arg(node: &KdlNode) -> ConfigResult<bool> {
    match args(node).next() {
        None => Ok(true),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| ConfigError::invalid(name(node), "expected #true or #false")),
    }
}

fn to_u64(field: &str, v: &KdlValue) -> ConfigResult<u64> {
    let n = v
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(field, format!("{v} is not an integer")))?;
    u64::try_from(n).map_err(|_| ConfigError::invalid(field, format!("{n} is out of range")))
}

pub(crate) fn u64_arg(node: &KdlNode) -> ConfigResult<u64> {
    let v = args(node)
        .next()
        .ok_or_else(|| ConfigError::invalid(name(node), "expected an integer argument"))?;
    to_u64(name(node), v)
}

/// `resources cpu=2 memory=4096 disk=10 iops=100`; absent properties are zero.
pub(crate) fn resources(node: &KdlNode) -> ConfigResult<Resources> {
    let mut res = Resources::default();

    for entry in node.entries() {
        let Some(key) = entry.name() else {
            return Err(ConfigError::invalid(
                name(node),
                "expected properties like cpu=1",
            ));
        };
        let field = format!("{}.{}", name(node), key.value());
        let value = to_u64(&field, entry.value())?;
        let value = u32::try_from(value)
            .map_err(|_| ConfigError::invalid(&field, format!("{value} is out of range")))?;

        match key.value() {
            "cpu" => res.cpu = value,
            "memory" => res.memory = value,
            "disk" => res.disk = value,
            "iops" => res.iops = value,
            _ => return Err(ConfigError::UnknownField(field)),
        }
    }

    Ok(res)
}

/// A block of `key "value"` children.
pub(crate) fn string_map(node: &KdlNode) -> ConfigResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = name(child).to_string();
            let value = match args(child).next() {
                Some(v) => match v.as_string() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                },
                None => String::new(),
            };
            if map.insert(key.clone(), value).is_some() {
                return Err(ConfigError::Duplicate(format!("{}.{key}", name(node))));
            }
        }
    }

    Ok(map)
}
