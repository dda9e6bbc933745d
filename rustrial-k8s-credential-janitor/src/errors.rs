use rustrial_k8s_credential_janitor_apis::RequestError;

use crate::gitea::GiteaError;

/// Extension methods for Kubernetes API errors.
pub(crate) trait ExtKubeApiError {
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
}

impl ExtKubeApiError for kube::Error {
    fn is_not_found(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 404 || e.code == 410 => true,
            _ => false,
        }
    }

    fn is_conflict(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 409 => true,
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ControllerError {
    /// The request `Secret` lacks a required annotation. Retrying is pointless until
    /// the object is changed.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    /// Gitea API error
    #[error("{0}")]
    Gitea(#[from] GiteaError),
    /// Kubernetes API error
    #[error("{0}")]
    KubeApi(#[from] kube::Error),
    /// The local mirror of request objects did not become ready.
    #[error("{0}")]
    CacheSync(String),
}

impl ControllerError {
    pub(crate) fn is_temporary(&self) -> bool {
        match self {
            ControllerError::InvalidRequest(_) => false,
            _ => true,
        }
    }

    /// Short label used for metrics and logs.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            ControllerError::InvalidRequest(_) => "invalid_request",
            ControllerError::Gitea(_) => "gitea",
            ControllerError::KubeApi(e) if e.is_conflict() => "conflict",
            ControllerError::KubeApi(e) if e.is_not_found() => "not_found",
            ControllerError::KubeApi(_) => "kube_api",
            ControllerError::CacheSync(_) => "cache_sync",
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
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn classifies_kube_api_errors() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(409).is_not_found());
        assert!(api_error(404).is_not_found());
        assert!(api_error(410).is_not_found());
        assert_eq!(ControllerError::from(api_error(409)).reason(), "conflict");
        assert_eq!(ControllerError::from(api_error(500)).reason(), "kube_api");
    }

    #[test]
    fn only_invalid_requests_are_permanent() {
        let invalid = ControllerError::from(RequestError::MissingAnnotation("x"));
        assert!(!invalid.is_temporary());
        assert!(ControllerError::from(api_error(500)).is_temporary());
        assert!(ControllerError::CacheSync("timeout".to_string()).is_temporary());
    }
}
