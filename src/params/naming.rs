//! Container naming, name templating, and tag parsing.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::ParameterError;
use crate::account::Protocol;

/// Longest container name the service accepts.
pub const CONTAINER_NAME_MAX_LEN: usize = 63;
/// Shortest container name the service accepts.
pub const CONTAINER_NAME_MIN_LEN: usize = 3;
/// Longest accepted `containerNamePrefix`.
pub const CONTAINER_NAME_PREFIX_MAX_LEN: usize = 20;

/// Template token replaced with the claim namespace.
pub const PVC_NAMESPACE_TOKEN: &str = "${pvc.metadata.namespace}";
/// Template token replaced with the claim name.
pub const PVC_NAME_TOKEN: &str = "${pvc.metadata.name}";
/// Template token replaced with the volume name.
pub const PV_NAME_TOKEN: &str = "${pv.metadata.name}";

const fn is_name_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-'
}

const fn is_edge_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit()
}

fn satisfies_container_rules(name: &str) -> bool {
    let len = name.chars().count();
    (CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len)
        && name.chars().all(is_name_char)
        && name.chars().next().is_some_and(is_edge_char)
        && name.chars().last().is_some_and(is_edge_char)
}

/// Turns a requested volume name into a container name the service accepts.
///
/// The name is lowercased and truncated. When the result still breaks the
/// container naming rules a fresh `pvc-<protocol>-dynamic-<uuid>` name is
/// generated instead. Doubled hyphens are collapsed in both cases.
///
/// The generated name is random per call, so it is not stable across
/// retries: a repeated create for an unusable name targets a new container
/// and leaves any container from the earlier attempt behind.
#[must_use]
pub fn valid_container_name(requested: &str, protocol: Protocol) -> String {
    let candidate: String = requested
        .to_lowercase()
        .chars()
        .take(CONTAINER_NAME_MAX_LEN)
        .collect();
    let name = if satisfies_container_rules(&candidate) {
        candidate
    } else {
        let generated = generated_container_name(protocol);
        tracing::warn!(
            requested,
            generated = %generated,
            "requested volume name is not a valid container name, regenerated"
        );
        generated
    };
    name.replace("--", "-")
}

fn generated_container_name(protocol: Protocol) -> String {
    let generated = format!("pvc-{protocol}-dynamic-{}", Uuid::new_v4());
    generated.chars().take(CONTAINER_NAME_MAX_LEN).collect()
}

/// Checks a `containerNamePrefix`: at most 20 lowercase letters, digits, or
/// hyphens. An empty prefix is valid.
#[must_use]
pub fn is_valid_container_name_prefix(prefix: &str) -> bool {
    prefix.chars().count() <= CONTAINER_NAME_PREFIX_MAX_LEN && prefix.chars().all(is_name_char)
}

/// Substitutes every template token present in `replacements`.
#[must_use]
pub fn replace_templates(template: &str, replacements: &BTreeMap<&'static str, String>) -> String {
    replacements
        .iter()
        .fold(template.to_owned(), |acc, (token, value)| {
            acc.replace(token, value)
        })
}

/// Parses `key1=value1,key2=value2` into a map.
///
/// # Errors
///
/// Returns [`ParameterError::InvalidTags`] when a pair lacks exactly one `=`
/// or has an empty key.
pub fn parse_tags(raw: &str) -> Result<BTreeMap<String, String>, ParameterError> {
    let mut tags = BTreeMap::new();
    if raw.trim().is_empty() {
        return Ok(tags);
    }
    let invalid = || ParameterError::InvalidTags {
        value: raw.to_owned(),
    };
    for pair in raw.split(',') {
        let mut parts = pair.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        let trimmed_key = key.trim();
        if trimmed_key.is_empty() {
            return Err(invalid());
        }
        tags.insert(trimmed_key.to_owned(), value.trim().to_owned());
    }
    Ok(tags)
}
