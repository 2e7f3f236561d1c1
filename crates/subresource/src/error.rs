use std::error::Error;
use std::time::Duration;

use thiserror::Error;

use crate::resource::ResourceStatus;

/// The reason a [`Resource`](crate::resource::Resource) ended up in an error state.
///
/// Errors are data at this layer: they are stored on the resource and surfaced to the
/// [`LoadHost`](crate::loader::LoadHost) exactly once, they are never thrown at clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The load was cancelled, either explicitly or because nobody is interested anymore.
    #[error("load cancelled")]
    Cancelled,
    /// The host could not provide a context to run the load in.
    #[error("no transport context available")]
    NoTransportContext,
    /// The host refused to start the load.
    #[error("blocked by host")]
    Blocked,
    /// The origin answered with an error status the resource kind does not tolerate.
    #[error("http status {0}")]
    HttpStatus(u16),
    /// The transport failed, like connection loss, DNS resolution, or TLS problems.
    ///
    /// The attached string contains the root cause.
    #[error("download failed: {0}")]
    Network(String),
    /// The transport gave up waiting for the origin.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The payload was retrieved, but a consumer could not interpret it.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl ResourceError {
    /// The terminal [`ResourceStatus`] this error puts a resource into.
    pub fn status(&self) -> ResourceStatus {
        match self {
            Self::Decode(_) => ResourceStatus::DecodeError,
            _ => ResourceStatus::LoadError,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn network_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        if error_string.contains("SSL routines") {
            error_string = "SSL error".to_string();
        }

        Self::Network(error_string)
    }
}

impl From<reqwest::Error> for ResourceError {
    fn from(error: reqwest::Error) -> Self {
        Self::network_error(&error)
    }
}

impl From<std::io::Error> for ResourceError {
    fn from(error: std::io::Error) -> Self {
        Self::network_error(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ResourceError::Decode("bad png".into()).status(),
            ResourceStatus::DecodeError
        );
        assert_eq!(ResourceError::Cancelled.status(), ResourceStatus::LoadError);
        assert_eq!(
            ResourceError::HttpStatus(404).status(),
            ResourceStatus::LoadError
        );
    }

    #[test]
    fn test_network_error_uses_root_cause() {
        let inner = std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "error:0A000086:SSL routines::certificate verify failed",
        );
        let outer = std::io::Error::other(inner);

        assert_eq!(
            ResourceError::from(outer),
            ResourceError::Network("certificate verify failed".into())
        );
    }
}
