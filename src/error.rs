//! Crate-wide error aggregation
//!
//! Each layer owns its own error enum; `LinkError` gathers them for callers that
//! drive the whole stack. The application-facing `DeviceLink` surface converts
//! these into booleans after logging them.

use thiserror::Error;

use crate::certificates::CertificateError;
use crate::config::ConfigError;
use crate::registration::RegistrationError;
use crate::registry::RegistryError;
use crate::session::SessionError;
use crate::transport::TransportError;

/// Main error type for connectivity operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Runner is not running")]
    RunnerStopped,

    #[error("Runner did not answer within {0:?}")]
    RunnerBusy(std::time::Duration),
}

impl LinkError {
    /// Errors that clear up on their own once the link or broker comes back
    pub fn is_transient(&self) -> bool {
        match self {
            LinkError::Transport(_) | LinkError::RunnerBusy(_) => true,
            LinkError::Session(e) => e.is_transient(),
            LinkError::Registration(RegistrationError::Session(e)) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for connectivity operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportClass;

    #[test]
    fn test_transport_errors_are_transient() {
        let error: LinkError = TransportError::LinkDown(TransportClass::Wifi).into();
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "Transport error: WIFI link is down");
    }

    #[test]
    fn test_config_errors_are_not_transient() {
        let error: LinkError = ConfigError::InvalidConfig("bad".to_string()).into();
        assert!(!error.is_transient());
    }

    #[test]
    fn test_capacity_errors_are_not_transient() {
        let error: LinkError = RegistryError::PatternLimit(20).into();
        assert!(!error.is_transient());
        assert!(error.to_string().contains("20"));
    }

    #[test]
    fn test_session_not_connected_is_transient() {
        let error: LinkError = SessionError::NotConnected.into();
        assert!(error.is_transient());
    }

    #[test]
    fn test_busy_runner_is_transient() {
        let error = LinkError::RunnerBusy(std::time::Duration::from_secs(5));
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "Runner did not answer within 5s");
    }
}
