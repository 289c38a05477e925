//! Registered client devices
//!
//! A device is identified by a fingerprint derived from non-secret
//! attributes the client reports (install id, hardware model, OS build).
//! Devices are never deleted; revocation flips a flag so history stays
//! available for audit.
//!
//! Tokens refer to devices through their subject, written `device:<id>`.

pub mod registry;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

pub use registry::DeviceRegistry;
pub use store::{DeviceStore, InsertOutcome, MemoryDeviceStore};

/// Subject prefix for device principals
pub const DEVICE_SUBJECT_PREFIX: &str = "device:";

/// Attribute key suffixes that indicate secret material
const SECRET_SUFFIXES: &[&str] = &["password", "secret", "token", "key"];

/// Token subject for a device id
pub fn device_subject(device_id: &str) -> String {
    format!("{DEVICE_SUBJECT_PREFIX}{device_id}")
}

/// Device id named by a subject, if it is a device subject
pub fn device_id_from_subject(subject: &str) -> Option<&str> {
    subject.strip_prefix(DEVICE_SUBJECT_PREFIX)
}

/// A registered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Assigned id
    pub device_id: String,
    /// Hex SHA-256 over the attributes
    pub fingerprint: String,
    /// Display label supplied at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Unix seconds
    pub registered_at: u64,
    /// Whether the device has been revoked
    pub revoked: bool,
    /// Unix seconds, when revoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<u64>,
}

impl Device {
    /// Whether the device may authenticate
    pub fn is_active(&self) -> bool {
        !self.revoked
    }

    /// Token subject for this device
    pub fn subject(&self) -> String {
        device_subject(&self.device_id)
    }
}

/// Client-reported attributes a fingerprint is derived from
///
/// ```rust
/// use hookguard_auth::device::DeviceAttributes;
///
/// let a = DeviceAttributes::new().with("model", "iPhone15,2").with("install_id", "7c1e");
/// let b = DeviceAttributes::new().with("install_id", "7c1e").with("model", "iPhone15,2");
/// assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    /// Attribute name to value; ordering is by name
    pub attributes: BTreeMap<String, String>,
    /// Human-readable label, not part of the fingerprint
    #[serde(default)]
    pub label: Option<String>,
}

impl DeviceAttributes {
    /// Empty attribute set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Stable fingerprint: lowercase hex SHA-256 over the attributes in name order
    ///
    /// Every name and value is length-prefixed (big-endian `u64`), so no
    /// choice of separators inside values can make two sets collide.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] for an empty set, blank names, or names
    /// that look like secrets.
    pub fn fingerprint(&self) -> AuthResult<String> {
        self.check()?;
        let mut hasher = Sha256::new();
        for (name, value) in &self.attributes {
            for field in [name, value] {
                hasher.update((field.len() as u64).to_be_bytes());
                hasher.update(field.as_bytes());
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn check(&self) -> AuthResult<()> {
        if self.attributes.is_empty() {
            return Err(AuthError::InvalidRequest(
                "device attributes must not be empty".into(),
            ));
        }
        for name in self.attributes.keys() {
            if name.trim().is_empty() {
                return Err(AuthError::InvalidRequest("blank device attribute name".into()));
            }
            let lower = name.to_ascii_lowercase();
            if SECRET_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
                return Err(AuthError::InvalidRequest(format!(
                    "device attribute '{name}' looks like a secret"
                )));
            }
        }
        Ok(())
    }
}
