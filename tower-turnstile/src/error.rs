use std::time::Duration;

use turnstile::Reason;

/// Errors produced by the admission middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmitError {
    /// The request was turned away by its policy.
    ///
    /// When the `axum` feature is enabled, this converts to the policy's rejection
    /// status (429 unless configured otherwise) with a `Retry-After` header when the
    /// policy knows one.
    #[error("request rejected by policy `{}`", .0.policy)]
    Rejected(Rejection),

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

/// Everything needed to answer a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Name of the policy that rejected the request.
    pub policy: String,
    /// HTTP status to answer with.
    pub status: u16,
    /// Why the policy rejected the request.
    pub reason: Reason,
}

impl Rejection {
    /// How long the client should wait, when the policy knows.
    pub fn retry_after(&self) -> Option<Duration> {
        self.reason.retry_after()
    }

    /// The retry hint in whole seconds, rounded up and never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(|wait| {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            secs.max(1)
        })
    }

    /// Renders the rejection as an empty-bodied HTTP response.
    #[cfg(feature = "http")]
    pub fn to_http_response<B: Default>(&self) -> http::Response<B> {
        let mut response = http::Response::new(B::default());
        *response.status_mut() =
            http::StatusCode::from_u16(self.status).unwrap_or(http::StatusCode::TOO_MANY_REQUESTS);
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(http::header::RETRY_AFTER, http::HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for AdmitError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let msg = self.to_string();
        match self {
            Self::Rejected(rejection) => {
                let mut response = rejection.to_http_response::<axum::body::Body>();
                *response.body_mut() = axum::body::Body::from(msg);
                response
            }
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

/// Turns any error from an admission stack into a response.
///
/// Intended for `axum::error_handling::HandleErrorLayer`.
#[cfg(feature = "axum")]
pub async fn handle_admit_error(err: tower::BoxError) -> axum::response::Response {
    use axum::response::IntoResponse;

    match err.downcast::<AdmitError>() {
        Ok(admit_err) => (*admit_err).into_response(),
        Err(err) => AdmitError::Inner(err.to_string()).into_response(),
    }
}
