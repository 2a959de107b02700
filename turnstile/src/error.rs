/// Errors raised while building policies or loading their configuration.
///
/// These only occur at startup; once a registry is built, decisions never fail.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A policy parameter is out of range.
    #[error("policy `{policy}`: {reason}")]
    InvalidParameter {
        /// The policy being built.
        policy: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The status used for rejections is not an HTTP error status.
    #[error("rejection status {0} is not an HTTP error status")]
    InvalidStatus(u16),

    /// Two policies were registered under the same name.
    #[error("policy `{0}` is registered more than once")]
    DuplicatePolicy(String),

    /// A policy name was referenced but never registered.
    #[error("no policy named `{0}` is registered")]
    UnknownPolicy(String),

    /// The configuration file could not be read.
    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("unable to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(policy: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            policy: policy.to_string(),
            reason: reason.into(),
        }
    }
}
