//! Protected-file guard for file mutations.

use crate::core::rules::{RuleRegistry, Severity};
use crate::core::types::Verdict;

/// Deny writes to credential-shaped paths, at any directory depth.
///
/// Exemptions (`.env.example`, `*.pub`, ...) sit ahead of the blocking
/// entries in the same table, so the first match decides.
pub fn check_protected_path(path: &str, registry: &RuleRegistry) -> Verdict {
    let normalized = path.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Verdict::allow();
    }
    match RuleRegistry::first_match(&registry.protected_paths, &normalized) {
        Some(rule) if rule.severity == Severity::Block => Verdict::deny(
            format!(
                "BLOCKED: Cannot write to protected file '{}': {}\nRule: {} (pattern: {})",
                path,
                rule.message,
                rule.id,
                rule.source()
            ),
            Some(rule.id),
        ),
        Some(rule) => rule.verdict(&normalized),
        None => Verdict::allow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::RulePolicy;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(&RulePolicy::default()).expect("registry")
    }

    #[test]
    fn env_files_are_protected() {
        let registry = registry();
        for path in [
            "/project/.env",
            ".env",
            "/project/apps/api/.env.local",
            "/project/.env.production",
            "C:\\project\\.env",
        ] {
            match check_protected_path(path, &registry) {
                Verdict::Deny { reason, .. } => assert!(reason.contains("protected file"), "{path}"),
                other => panic!("{path}: expected deny, got {other:?}"),
            }
        }
    }

    #[test]
    fn env_templates_are_allowed() {
        let registry = registry();
        for path in [
            "/project/.env.example",
            "/project/.env.sample",
            "/project/.env.template",
            "/project/src/environment.ts",
            "/project/.envrc.md",
        ] {
            assert!(check_protected_path(path, &registry).is_allow(), "{path}");
        }
    }

    #[test]
    fn key_material_is_protected_but_public_keys_are_not() {
        let registry = registry();
        for path in [
            "/home/u/.ssh/id_rsa",
            "/home/u/.ssh/id_ed25519",
            "/project/certs/server.pem",
            "/project/deep/nested/private.key",
            "/project/config/credentials.json",
            "/project/secrets.json",
        ] {
            assert!(check_protected_path(path, &registry).is_deny(), "{path}");
        }
        assert!(check_protected_path("/home/u/.ssh/id_rsa.pub", &registry).is_allow());
        assert!(check_protected_path("/project/my-credentials.json", &registry).is_allow());
    }
}
