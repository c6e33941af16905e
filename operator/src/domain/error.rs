use thiserror::Error;

use crate::domain::cluster::entities::EndpointScope;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperatorError {
    #[error("invalid spec field `{field}`: {message}")]
    InvalidSpec { field: &'static str, message: String },

    #[error("platform unavailable: {message}")]
    PlatformUnavailable { message: String },

    #[error("quorum unsafe: {message}")]
    QuorumUnsafe { message: String },

    #[error("{scope} DBEndpoint not ready yet for {db_type}")]
    EndpointNotReady {
        scope: EndpointScope,
        db_type: String,
    },

    #[error("member probe failing: {message}")]
    ProbeFailing { message: String },

    #[error("malformed stored state: {message}")]
    MalformedState { message: String },

    #[error("internal server error: {message}")]
    InternalServerError { message: String },
}

impl OperatorError {
    /// Errors the controller retries on the backoff schedule.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OperatorError::PlatformUnavailable { .. }
                | OperatorError::MalformedState { .. }
                | OperatorError::InternalServerError { .. }
        )
    }

    pub fn platform(message: impl Into<String>) -> Self {
        OperatorError::PlatformUnavailable {
            message: message.into(),
        }
    }
}

impl From<kube::Error> for OperatorError {
    fn from(e: kube::Error) -> Self {
        OperatorError::PlatformUnavailable {
            message: e.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for OperatorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        OperatorError::PlatformUnavailable {
            message: "external call timed out".to_string(),
        }
    }
}
