//! Certificate storage and caching
//!
//! The broker session needs exactly three PEM blobs: the CA certificate, the
//! device certificate, and the device private key. They come from a
//! [`CertificateStore`] (a directory on disk or constants compiled into the
//! binary) and are cached by [`CertificateCache`] after the first successful
//! read.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Certificate loading errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Certificate '{0}' not found")]
    Missing(String),

    #[error("Certificate '{0}' is empty")]
    Empty(String),

    #[error("Failed to read certificate '{name}'")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The three PEM blobs presented to the broker
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub ca: Vec<u8>,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("ca_len", &self.ca.len())
            .field("certificate_len", &self.certificate.len())
            .field("private_key_len", &self.private_key.len())
            .finish()
    }
}

/// Names of the three blobs inside a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateNames {
    #[serde(default = "default_ca_name")]
    pub ca: String,
    #[serde(default = "default_certificate_name")]
    pub certificate: String,
    #[serde(default = "default_private_key_name")]
    pub private_key: String,
}

fn default_ca_name() -> String {
    "ca.pem".to_string()
}

fn default_certificate_name() -> String {
    "device.pem.crt".to_string()
}

fn default_private_key_name() -> String {
    "private.pem.key".to_string()
}

impl Default for CertificateNames {
    fn default() -> Self {
        Self {
            ca: default_ca_name(),
            certificate: default_certificate_name(),
            private_key: default_private_key_name(),
        }
    }
}

/// Source of raw certificate bytes
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<Vec<u8>, CertificateError>;
}

/// Certificates stored as files under one directory
#[derive(Debug, Clone)]
pub struct FileCertificateStore {
    root: PathBuf,
}

impl FileCertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>, CertificateError> {
        let path = self.root.join(name);
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                CertificateError::Missing(name.to_string())
            } else {
                CertificateError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }
}

/// Certificates compiled into the binary
#[derive(Debug, Clone, Default)]
pub struct EmbeddedCertificateStore {
    entries: HashMap<String, &'static [u8]>,
}

impl EmbeddedCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, pem: &'static [u8]) -> Self {
        self.entries.insert(name.into(), pem);
        self
    }
}

#[async_trait]
impl CertificateStore for EmbeddedCertificateStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>, CertificateError> {
        self.entries
            .get(name)
            .map(|pem| pem.to_vec())
            .ok_or_else(|| CertificateError::Missing(name.to_string()))
    }
}

/// Loads the certificate bundle once and serves it from memory afterwards
pub struct CertificateCache {
    store: Arc<dyn CertificateStore>,
    names: CertificateNames,
    cached: Option<CertificateBundle>,
}

impl CertificateCache {
    pub fn new(store: Arc<dyn CertificateStore>, names: CertificateNames) -> Self {
        Self {
            store,
            names,
            cached: None,
        }
    }

    /// Return the cached bundle, reading all three blobs on a miss
    pub async fn load(&mut self) -> Result<&CertificateBundle, CertificateError> {
        if self.cached.is_none() {
            let ca = self.read_blob(&self.names.ca).await?;
            let certificate = self.read_blob(&self.names.certificate).await?;
            let private_key = self.read_blob(&self.names.private_key).await?;
            info!("Certificates loaded into cache");
            self.cached = Some(CertificateBundle {
                ca,
                certificate,
                private_key,
            });
        }

        match &self.cached {
            Some(bundle) => Ok(bundle),
            None => Err(CertificateError::Missing(self.names.ca.clone())),
        }
    }

    async fn read_blob(&self, name: &str) -> Result<Vec<u8>, CertificateError> {
        let blob = self.store.read(name).await?;
        if blob.iter().all(u8::is_ascii_whitespace) {
            return Err(CertificateError::Empty(name.to_string()));
        }
        debug!(
            name,
            header = %pem_header(&blob),
            bytes = blob.len(),
            "Read certificate"
        );
        Ok(blob)
    }

    /// Forget the cached bundle so the next load re-reads storage
    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            debug!("Certificate cache invalidated");
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}

impl fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCache")
            .field("names", &self.names)
            .field("cached", &self.cached.is_some())
            .finish()
    }
}

/// First line of a PEM blob, for logging without leaking key material
fn pem_header(blob: &[u8]) -> String {
    let text = String::from_utf8_lossy(blob);
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .chars()
        .take(40)
        .collect()
}
