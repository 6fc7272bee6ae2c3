//! Per-transport TLS settings
//!
//! Every transport that can carry the MQTT session owns exactly one
//! [`SecureClient`]. The transport resets it whenever it powers on, and the
//! session processor re-applies cached certificates to it before every
//! broker bind.

use std::time::Duration;

use crate::certificates::CertificateBundle;
use crate::transport::TransportClass;

/// Default TLS handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials presented during the TLS handshake
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    Certificates(CertificateBundle),
    PreSharedKey { identity: String, key: Vec<u8> },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Certificates(_) => f.write_str("Certificates(..)"),
            Credentials::PreSharedKey { identity, .. } => f
                .debug_struct("PreSharedKey")
                .field("identity", identity)
                .finish_non_exhaustive(),
        }
    }
}

/// TLS configuration bound to a single transport
#[derive(Debug, Clone)]
pub struct SecureClient {
    class: TransportClass,
    credentials: Credentials,
    insecure: bool,
    handshake_timeout: Duration,
    generation: u64,
}

impl SecureClient {
    pub fn new(class: TransportClass) -> Self {
        Self {
            class,
            credentials: Credentials::None,
            insecure: false,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            generation: 0,
        }
    }

    /// Drop all credentials, as after a radio power cycle
    pub fn reset(&mut self) {
        self.credentials = Credentials::None;
        self.insecure = false;
        self.generation += 1;
    }

    pub fn set_certificates(&mut self, bundle: &CertificateBundle) {
        self.credentials = Credentials::Certificates(bundle.clone());
    }

    pub fn set_pre_shared_key(&mut self, identity: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.credentials = Credentials::PreSharedKey {
            identity: identity.into(),
            key: key.into(),
        };
    }

    /// Skip peer verification and connect without TLS credentials
    pub fn set_insecure(&mut self, insecure: bool) {
        self.insecure = insecure;
    }

    pub fn set_handshake_timeout(&mut self, timeout: Duration) {
        self.handshake_timeout = timeout;
    }

    pub fn class(&self) -> TransportClass {
        self.class
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn has_credentials(&self) -> bool {
        !matches!(self.credentials, Credentials::None)
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Number of times this client has been reset since boot
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
