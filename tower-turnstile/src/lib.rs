//! # Tower Turnstile
//!
//! `tower-turnstile` puts the named policies of [`turnstile`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## The Admission Stack
//! [`AdmissionLayer`] resolves the policy for each request and asks it for a permit:
//!
//! 1. **Admitted**: the inner service is called straight away. The permit is held
//!    until the response future completes, which is what releases concurrency slots.
//! 2. **Queued**: window policies with a queue park the request until a slot frees
//!    up. Dropping the response future leaves the queue.
//! 3. **Rejected**: the request fails with [`AdmitError::Rejected`], carrying the
//!    configured status and a retry hint when the policy knows one.
//!
//! Requests without a policy pass through untouched. Policy names are resolved when
//! the layer is built, so a typo fails at startup.
//!
//! ## Feature Flags
//!
//! - `http` (default): path based routing with [`RouteTable`] and
//!   [`Rejection::to_http_response`].
//! - `axum`: Enables `IntoResponse` for [`AdmitError`] and [`handle_admit_error`].
//! - `demo`: the `turnstile-demo` server binary.

mod config;
mod error;
mod layer;
mod route;
mod service;

#[cfg(test)]
mod tests;

pub use config::AdmissionConfig;
#[cfg(feature = "axum")]
pub use error::handle_admit_error;
pub use error::AdmitError;
pub use error::Rejection;
pub use layer::AdmissionLayer;
pub use layer::DEFAULT_REJECTION_STATUS;
pub use route::BoundPolicy;
pub use route::PolicySelector;
pub use route::RouteTable;
pub use route::RouteTableBuilder;
pub use route::SinglePolicy;
pub use service::AdmissionService;
