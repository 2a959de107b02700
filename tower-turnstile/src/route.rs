use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use turnstile::ConfigError;
use turnstile::Policy;
use turnstile::PolicyRegistry;

/// A policy resolved from the registry, together with its name.
#[derive(Debug, Clone)]
pub struct BoundPolicy {
    name: Arc<str>,
    policy: Arc<Policy>,
}

impl BoundPolicy {
    /// Looks `name` up in `registry`; unknown names are a configuration error.
    pub fn resolve(registry: &PolicyRegistry, name: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            name: Arc::from(name),
            policy: registry.resolve(name)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// Picks the policy that applies to a request, if any.
///
/// Selection is a plain lookup; every name was resolved when the selector was built.
pub trait PolicySelector<Req> {
    fn select(&self, req: &Req) -> Option<&BoundPolicy>;
}

/// Applies the same policy, or none, to every request.
#[derive(Debug, Clone, Default)]
pub struct SinglePolicy(Option<BoundPolicy>);

impl SinglePolicy {
    pub fn new(registry: &PolicyRegistry, name: Option<&str>) -> Result<Self, ConfigError> {
        name.map(|name| BoundPolicy::resolve(registry, name))
            .transpose()
            .map(Self)
    }
}

impl<Req> PolicySelector<Req> for SinglePolicy {
    fn select(&self, _req: &Req) -> Option<&BoundPolicy> {
        self.0.as_ref()
    }
}

/// Maps request paths to policies.
///
/// Paths are matched exactly after normalisation: ASCII lowercase, without a
/// trailing `/`. Paths that are not in the table, or are mapped to no policy, are
/// not limited.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Arc<HashMap<String, Option<BoundPolicy>>>,
}

fn normalise(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

impl RouteTable {
    pub fn builder(registry: &PolicyRegistry) -> RouteTableBuilder<'_> {
        RouteTableBuilder {
            registry,
            routes: Vec::new(),
        }
    }

    /// Builds a table from `path -> policy name or none`, validating every name.
    pub fn from_config(
        registry: &PolicyRegistry,
        routes: &BTreeMap<String, Option<String>>,
    ) -> Result<Self, ConfigError> {
        routes
            .iter()
            .fold(Self::builder(registry), |builder, (path, policy)| {
                builder.route(path, policy.as_deref())
            })
            .build()
    }

    /// The policy applied to `path`, if any.
    pub fn lookup(&self, path: &str) -> Option<&BoundPolicy> {
        self.routes.get(&normalise(path)).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(feature = "http")]
impl<B> PolicySelector<http::Request<B>> for RouteTable {
    fn select(&self, req: &http::Request<B>) -> Option<&BoundPolicy> {
        self.lookup(req.uri().path())
    }
}

/// Collects routes for a [`RouteTable`].
pub struct RouteTableBuilder<'a> {
    registry: &'a PolicyRegistry,
    routes: Vec<(String, Option<String>)>,
}

impl RouteTableBuilder<'_> {
    /// Applies `policy` to `path`; `None` exempts the path explicitly.
    pub fn route(mut self, path: &str, policy: Option<&str>) -> Self {
        self.routes.push((normalise(path), policy.map(str::to_string)));
        self
    }

    pub fn build(self) -> Result<RouteTable, ConfigError> {
        let routes = self
            .routes
            .into_iter()
            .map(|(path, name)| {
                let bound = name
                    .map(|name| BoundPolicy::resolve(self.registry, &name))
                    .transpose()?;
                Ok((path, bound))
            })
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;
        Ok(RouteTable {
            routes: Arc::new(routes),
        })
    }
}
