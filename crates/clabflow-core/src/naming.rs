//! Control-plane safe names
//!
//! All identifiers the engine sends to the control plane go through
//! [`normalize_name`], so names are a pure function of their inputs.

/// Default prefix of the topology namespace
pub const DEFAULT_NAMESPACE_PREFIX: &str = "clab-";

/// Turn an arbitrary string into a Kubernetes-style object name.
///
/// Lowercases, maps `_` and spaces to `-`, drops anything outside
/// `[a-z0-9.-]`, trims `.`/`-` from both ends and pads with `x`/`0` so the
/// result starts and ends alphanumeric.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase().replace(['_', ' '], "-");
    let filtered: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let mut safe = filtered.trim_matches(|c| c == '.' || c == '-').to_string();

    if !safe.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        safe.insert(0, 'x');
    }
    if !safe.ends_with(|c: char| c.is_ascii_alphanumeric()) {
        safe.push('0');
    }
    safe
}

/// Namespace holding every resource of a topology
pub fn namespace_for(topology_name: &str, prefix: &str) -> String {
    normalize_name(&format!("{}{}", prefix, normalize_name(topology_name)))
}
