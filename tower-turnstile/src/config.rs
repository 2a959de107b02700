use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use turnstile::ConfigError;
use turnstile::PolicyConfig;
use turnstile::PolicyRegistry;
use turnstile::QueueOrder;

use crate::AdmissionLayer;
use crate::layer::DEFAULT_REJECTION_STATUS;
use crate::route::RouteTable;

/// Policies, routes and the rejection status of an admission stack.
///
/// ```yaml
/// rejection_status: 429
/// policies:
///   fixed: { kind: fixed_window, permit_limit: 2, window: 10s, queue_limit: 1 }
/// routes:
///   /ratelimittests/fixed: fixed
///   /health: ~
/// ```
///
/// Missing sections in a file are empty, and a missing `rejection_status` is 429.
/// [`AdmissionConfig::default`] is the four demo policies and their
/// `/ratelimittests` routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_rejection_status")]
    pub rejection_status: u16,
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
    #[serde(default)]
    pub routes: BTreeMap<String, Option<String>>,
}

fn default_rejection_status() -> u16 {
    DEFAULT_REJECTION_STATUS
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let window = Duration::from_secs(10);
        let policies = BTreeMap::from([
            (
                "fixed".to_string(),
                PolicyConfig::FixedWindow {
                    permit_limit: 2,
                    window,
                    queue_limit: 1,
                    queue_order: QueueOrder::OldestFirst,
                },
            ),
            (
                "sliding".to_string(),
                PolicyConfig::SlidingWindow {
                    permit_limit: 2,
                    window,
                    segments_per_window: 2,
                    queue_limit: 1,
                    queue_order: QueueOrder::OldestFirst,
                },
            ),
            (
                "token_bucket".to_string(),
                PolicyConfig::TokenBucket {
                    token_limit: 10,
                    tokens_per_period: 10,
                    replenishment_period: window,
                },
            ),
            (
                "concurrency".to_string(),
                PolicyConfig::Concurrency { permit_limit: 3 },
            ),
        ]);
        let routes = [
            ("/ratelimittests/fixed", "fixed"),
            ("/ratelimittests/sliding", "sliding"),
            ("/ratelimittests/token-bucket", "token_bucket"),
            ("/ratelimittests/concurrency", "concurrency"),
        ]
        .into_iter()
        .map(|(path, policy)| (path.to_string(), Some(policy.to_string())))
        .collect();

        Self {
            rejection_status: DEFAULT_REJECTION_STATUS,
            policies,
            routes,
        }
    }
}

impl AdmissionConfig {
    /// Reads a configuration file. `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the rejection status and every policy's parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(400..=599).contains(&self.rejection_status) {
            return Err(ConfigError::InvalidStatus(self.rejection_status));
        }
        for (name, policy) in &self.policies {
            policy.validate(name)?;
        }
        Ok(())
    }

    /// Builds the policies with fresh counters.
    pub fn registry(&self) -> Result<PolicyRegistry, ConfigError> {
        PolicyRegistry::from_config(&self.policies)
    }

    /// Resolves the routes against `registry`.
    pub fn route_table(&self, registry: &PolicyRegistry) -> Result<RouteTable, ConfigError> {
        RouteTable::from_config(registry, &self.routes)
    }

    /// Builds the registry, the route table and the layer in one go.
    pub fn layer(&self) -> Result<(PolicyRegistry, AdmissionLayer<RouteTable>), ConfigError> {
        self.validate()?;
        let registry = self.registry()?;
        let routes = self.route_table(&registry)?;
        let layer = AdmissionLayer::routed(routes).with_rejection_status(self.rejection_status);
        Ok((registry, layer))
    }
}
