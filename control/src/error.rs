use crate::apis::ingress::synthesize::SynthesisError;
use thiserror::Error;

/// Reconciler errors
///
/// Everything a reconcile pass can fail with. `is_retryable` decides whether
/// the error policy requeues the key or waits for the next change.
#[derive(Error, Debug)]
pub enum Error {
    #[error("route synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("cluster write failed: {0}")]
    Client(#[from] ClientError),

    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Client(e) => e.is_retryable(),
            Error::Synthesis(_) | Error::MissingObjectKey(_) => false,
        }
    }

    /// Short machine-readable reason for status conditions and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Synthesis(_) => "SynthesisFailed",
            Error::Client(ClientError::Conflict(_)) => "WriteConflict",
            Error::Client(ClientError::Transient(_)) => "TransientAPIError",
            Error::Client(ClientError::Invalid(_)) => "InvalidResource",
            Error::Client(ClientError::NotFound(_)) => "NotFound",
            Error::MissingObjectKey(_) => "MissingObjectKey",
        }
    }
}

/// Classified failure of a single cluster write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Resource version precondition failed (409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Throttling, server or connectivity failure
    #[error("transient: {0}")]
    Transient(String),

    /// The API server rejected the object (400/422); retrying cannot help
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Conflict(_) | ClientError::Transient(_))
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClientError::NotFound(resp.message.clone()),
                409 => ClientError::Conflict(resp.message.clone()),
                400 | 422 => ClientError::Invalid(resp.message.clone()),
                _ => ClientError::Transient(format!("{} ({})", resp.message, resp.code)),
            },
            kube::Error::SerdeError(e) => ClientError::Invalid(e.to_string()),
            other => ClientError::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_classifies_api_status_codes() {
        assert!(matches!(
            ClientError::from(api_error(409)),
            ClientError::Conflict(_)
        ));
        assert!(matches!(
            ClientError::from(api_error(422)),
            ClientError::Invalid(_)
        ));
        assert!(matches!(
            ClientError::from(api_error(400)),
            ClientError::Invalid(_)
        ));
        assert!(matches!(
            ClientError::from(api_error(404)),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            ClientError::from(api_error(429)),
            ClientError::Transient(_)
        ));
        assert!(matches!(
            ClientError::from(api_error(503)),
            ClientError::Transient(_)
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(Error::from(ClientError::Conflict("x".into())).is_retryable());
        assert!(Error::from(ClientError::Transient("x".into())).is_retryable());
        assert!(
            !Error::from(ClientError::Invalid("x".into())).is_retryable(),
            "Invalid objects must not be retried"
        );
        assert!(!Error::MissingObjectKey(".metadata.name").is_retryable());
    }
}
