use std::task::Context;
use std::task::Poll;

use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::time::Instant;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::debug;
use tracing::warn;
use turnstile::Acquisition;
use turnstile::Reason;

use crate::error::AdmitError;
use crate::error::Rejection;
use crate::layer::DEFAULT_REJECTION_STATUS;
use crate::route::PolicySelector;

#[derive(Clone, Debug)]
struct AdmissionMetrics {
    admitted: Counter<u64>,
    queued: Counter<u64>,
    rejected: Counter<u64>,
}

impl AdmissionMetrics {
    fn rejected(&self, policy: &str, status: u16, reason: Reason) -> BoxError {
        self.rejected.add(1, &[KeyValue::new("policy", policy.to_string())]);
        warn!(policy, ?reason, "request rejected");
        Box::new(AdmitError::Rejected(Rejection {
            policy: policy.to_string(),
            status,
            reason,
        }))
    }
}

/// Admits, queues or rejects each request according to its policy.
///
/// The permit taken for a request is held until the inner service's response
/// future completes or is dropped.
#[derive(Clone, Debug)]
pub struct AdmissionService<P, S> {
    inner: S,
    selector: P,
    rejection_status: u16,
    instruments: AdmissionMetrics,
}

impl<P, S> AdmissionService<P, S> {
    pub fn new(inner: S, selector: P) -> Self {
        let meter = global::meter("admission_service");
        let instruments = AdmissionMetrics {
            admitted: meter.u64_counter("admission.admitted").build(),
            queued: meter.u64_counter("admission.queued").build(),
            rejected: meter.u64_counter("admission.rejected").build(),
        };

        Self {
            inner,
            selector,
            rejection_status: DEFAULT_REJECTION_STATUS,
            instruments,
        }
    }

    pub fn with_rejection_status(mut self, status: u16) -> Self {
        self.rejection_status = status;
        self
    }
}

impl<P, S, Req> Service<Req> for AdmissionService<P, S>
where
    P: PolicySelector<Req>,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let Some(bound) = self.selector.select(&req).cloned() else {
            return Box::pin(self.inner.call(req));
        };
        let attributes = [KeyValue::new("policy", bound.name().to_string())];

        match bound.policy().acquire_at(Instant::now()) {
            Acquisition::Admitted(permit) => {
                self.instruments.admitted.add(1, &attributes);
                let fut = self.inner.call(req);
                Box::pin(async move {
                    let res = fut.await;
                    drop(permit);
                    res
                })
            }
            Acquisition::Queued(waiter) => {
                self.instruments.queued.add(1, &attributes);
                debug!(policy = bound.name(), "request queued");

                // The ready service goes with the queued request; a clone stays behind.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                let instruments = self.instruments.clone();
                let status = self.rejection_status;

                Box::pin(async move {
                    match waiter.await {
                        Ok(permit) => {
                            instruments.admitted.add(1, &attributes);
                            let res = inner.ready().await?.call(req).await;
                            drop(permit);
                            res
                        }
                        Err(reason) => Err(instruments.rejected(bound.name(), status, reason)),
                    }
                })
            }
            Acquisition::Rejected(reason) => {
                let err = self
                    .instruments
                    .rejected(bound.name(), self.rejection_status, reason);
                Box::pin(futures::future::ready(Err(err)))
            }
        }
    }
}
