use tower::Layer;
use turnstile::ConfigError;
use turnstile::PolicyRegistry;

use crate::route::RouteTable;
use crate::route::SinglePolicy;
use crate::service::AdmissionService;

/// Status returned for rejected requests unless configured otherwise.
pub const DEFAULT_REJECTION_STATUS: u16 = 429;

/// Applies named admission policies to requests.
#[derive(Debug, Clone)]
pub struct AdmissionLayer<P> {
    selector: P,
    rejection_status: u16,
}

impl AdmissionLayer<SinglePolicy> {
    /// Create an AdmissionLayer applying one policy, or none, to every request.
    ///
    /// The name is resolved here, so an unknown policy fails at startup rather than
    /// on the first request.
    pub fn new(registry: &PolicyRegistry, policy: Option<&str>) -> Result<Self, ConfigError> {
        Ok(Self {
            selector: SinglePolicy::new(registry, policy)?,
            rejection_status: DEFAULT_REJECTION_STATUS,
        })
    }
}

impl AdmissionLayer<RouteTable> {
    /// Create an AdmissionLayer choosing the policy by request path.
    pub fn routed(routes: RouteTable) -> Self {
        Self {
            selector: routes,
            rejection_status: DEFAULT_REJECTION_STATUS,
        }
    }
}

impl<P> AdmissionLayer<P> {
    /// Set the HTTP status used for rejected requests.
    pub fn with_rejection_status(mut self, status: u16) -> Self {
        self.rejection_status = status;
        self
    }
}

impl<P, S> Layer<S> for AdmissionLayer<P>
where
    P: Clone,
{
    type Service = AdmissionService<P, S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService::new(service, self.selector.clone())
            .with_rejection_status(self.rejection_status)
    }
}
