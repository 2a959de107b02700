use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::info;

use crate::ConfigError;
use crate::Policy;
use crate::PolicyConfig;
use crate::Statistics;
use crate::Strategy;

/// Named policies, built once at startup and read-only afterwards.
///
/// Cloning is cheap and every clone shares the same policy instances, so counters
/// are shared by every request that resolves the same name.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: Arc<HashMap<String, Arc<Policy>>>,
}

impl PolicyRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Builds a registry from a map of policy configurations.
    pub fn from_config(config: &BTreeMap<String, PolicyConfig>) -> Result<Self, ConfigError> {
        config
            .iter()
            .fold(Self::builder(), |builder, (name, policy)| {
                builder.policy(name.clone(), policy.clone())
            })
            .build()
    }

    /// Looks up a policy by name.
    pub fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(name).cloned()
    }

    /// Like [`PolicyRegistry::get`], but an unknown name is an error.
    pub fn resolve(&self, name: &str) -> Result<Arc<Policy>, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownPolicy(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// A statistics snapshot of every policy, keyed by name.
    pub fn statistics(&self) -> BTreeMap<String, Statistics> {
        self.policies
            .iter()
            .map(|(name, policy)| (name.clone(), policy.statistics()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

enum Source {
    Config(PolicyConfig),
    Built(Policy),
}

/// Collects policies and validates them as a whole in [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<(String, Source)>,
}

impl RegistryBuilder {
    /// Registers a policy from its configuration.
    pub fn policy(mut self, name: impl Into<String>, config: PolicyConfig) -> Self {
        self.entries.push((name.into(), Source::Config(config)));
        self
    }

    /// Registers an already constructed policy.
    pub fn strategy(mut self, name: impl Into<String>, policy: impl Into<Policy>) -> Self {
        self.entries.push((name.into(), Source::Built(policy.into())));
        self
    }

    pub fn build(self) -> Result<PolicyRegistry, ConfigError> {
        let mut policies = HashMap::with_capacity(self.entries.len());
        for (name, source) in self.entries {
            let policy = match source {
                Source::Config(config) => config.build(&name)?,
                Source::Built(policy) => policy,
            };
            match policies.entry(name) {
                Entry::Occupied(entry) => {
                    return Err(ConfigError::DuplicatePolicy(entry.key().clone()));
                }
                Entry::Vacant(entry) => {
                    info!(
                        policy = %entry.key(),
                        kind = %policy.kind(),
                        "registered admission policy"
                    );
                    entry.insert(Arc::new(policy));
                }
            }
        }
        Ok(PolicyRegistry {
            policies: Arc::new(policies),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::*;
    use crate::ConcurrencyLimit;
    use crate::PolicyKind;

    fn fixed(permit_limit: usize) -> PolicyConfig {
        PolicyConfig::FixedWindow {
            permit_limit,
            window: Duration::from_secs(10),
            queue_limit: 0,
            queue_order: Default::default(),
        }
    }

    #[test]
    fn it_resolves_registered_policies() {
        let registry = PolicyRegistry::builder()
            .policy("fixed", fixed(2))
            .strategy(
                "concurrency",
                ConcurrencyLimit::new(NonZeroUsize::new(2).unwrap()),
            )
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), ["concurrency", "fixed"]);
        assert_eq!(
            registry.resolve("fixed").unwrap().kind(),
            PolicyKind::FixedWindow
        );
        assert!(matches!(
            registry.resolve("missing"),
            Err(ConfigError::UnknownPolicy(name)) if name == "missing"
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = PolicyRegistry::builder()
            .policy("fixed", fixed(2))
            .policy("fixed", fixed(3))
            .build();

        assert!(matches!(result, Err(ConfigError::DuplicatePolicy(name)) if name == "fixed"));
    }

    #[test]
    fn invalid_parameters_fail_the_whole_build() {
        let config = BTreeMap::from([
            ("good".to_string(), fixed(1)),
            ("bad".to_string(), fixed(0)),
        ]);

        assert!(matches!(
            PolicyRegistry::from_config(&config),
            Err(ConfigError::InvalidParameter { policy, .. }) if policy == "bad"
        ));
    }

    #[tokio::test]
    async fn clones_share_counters() {
        let config = BTreeMap::from([("fixed".to_string(), fixed(1))]);
        let registry = PolicyRegistry::from_config(&config).unwrap();
        let other = registry.clone();

        assert!(registry.resolve("fixed").unwrap().acquire().await.is_ok());
        assert!(other.resolve("fixed").unwrap().acquire().await.is_err());

        let stats = other.statistics();
        assert_eq!(stats["fixed"].total_admitted, 1);
        assert_eq!(stats["fixed"].total_rejected, 1);
    }
}
