//! Browser-navigation safety.

use crate::core::rules::RuleRegistry;
use crate::core::types::Verdict;

/// Evaluate a navigation target against the navigation table.
pub fn check_navigation(url: &str, registry: &RuleRegistry) -> Verdict {
    let url = url.trim();
    if url.is_empty() {
        return Verdict::allow();
    }
    match RuleRegistry::first_match(&registry.navigation, url) {
        Some(rule) => rule.verdict(url),
        None => Verdict::allow(),
    }
}

/// True when the URL's host is not a loopback address.
pub fn is_remote_host(url: &str) -> bool {
    let Some((_, rest)) = url.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or("")
    } else {
        host_port.split(':').next().unwrap_or("")
    };
    let host = host.to_ascii_lowercase();
    !(host.is_empty()
        || host == "localhost"
        || host.ends_with(".localhost")
        || host == "::1"
        || host == "0.0.0.0"
        || host.starts_with("127."))
}
