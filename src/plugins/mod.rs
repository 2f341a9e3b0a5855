//! Built-in plugins.

pub mod aws_iam;
pub mod github;

use crate::plugin::PluginRegistry;

/// Registry with every plugin this binary ships, keyed by type id.
pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::default();
    registry
        .register(aws_iam::TYPE_ID, aws_iam::IamBuilder)
        .register(github::TYPE_ID, github::GithubBuilder);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry();
        assert_eq!(registry.type_ids(), vec!["aws-iam", "github"]);
    }
}
