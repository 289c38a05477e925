//! Device registration and revocation

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::store::{DeviceStore, InsertOutcome, MemoryDeviceStore};
use super::{Device, DeviceAttributes, device_subject};
use crate::audit::{AuditEvent, AuditKind, AuditSink, EventOutcome, TracingAuditSink};
use crate::clock::Clock;
use crate::error::{AuthError, AuthResult};

/// Registers, looks up and revokes devices
#[derive(Debug)]
pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl DeviceRegistry {
    /// Registry over an in-memory store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(MemoryDeviceStore::new()),
            clock,
            audit: Arc::new(TracingAuditSink::default()),
        }
    }

    /// Substitute the device store
    pub fn with_store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.store = store;
        self
    }

    /// Substitute the audit sink
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Register a device, returning the existing one on a fingerprint match
    ///
    /// Retries from a client that lost the first response get the same
    /// device back.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRequest`] when the attributes are unusable.
    pub fn register(&self, attributes: DeviceAttributes) -> AuthResult<Device> {
        match self.insert(attributes)? {
            InsertOutcome::Inserted(device) | InsertOutcome::Existing(device) => Ok(device),
        }
    }

    /// Register a device, failing on a fingerprint match
    ///
    /// # Errors
    ///
    /// [`AuthError::DuplicateFingerprint`] when an unrevoked device has the
    /// same fingerprint, [`AuthError::InvalidRequest`] for unusable attributes.
    pub fn register_strict(&self, attributes: DeviceAttributes) -> AuthResult<Device> {
        match self.insert(attributes)? {
            InsertOutcome::Inserted(device) => Ok(device),
            InsertOutcome::Existing(device) => Err(AuthError::DuplicateFingerprint(device.device_id)),
        }
    }

    fn insert(&self, attributes: DeviceAttributes) -> AuthResult<InsertOutcome> {
        let fingerprint = attributes.fingerprint()?;
        let now = self.clock.now_unix();
        let candidate = Device {
            device_id: Uuid::new_v4().simple().to_string(),
            fingerprint,
            label: attributes.label,
            registered_at: now,
            revoked: false,
            revoked_at: None,
        };

        let outcome = self.store.insert_unique(candidate);
        match &outcome {
            InsertOutcome::Inserted(device) => {
                self.audit.record(
                    AuditEvent::new(
                        AuditKind::DeviceRegistered,
                        device_subject(&device.device_id),
                        EventOutcome::Success,
                        now,
                    )
                    .with_detail(format!("fingerprint {}", &device.fingerprint[..16])),
                );
                info!(device_id = %device.device_id, "Device registered");
            }
            InsertOutcome::Existing(device) => {
                debug!(device_id = %device.device_id, "Device already registered for fingerprint");
            }
        }
        Ok(outcome)
    }

    /// Revoke a device; revoking an already revoked device is a no-op
    ///
    /// Outstanding tokens for the device stop validating immediately.
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownDevice`] when the id was never registered.
    pub fn revoke(&self, device_id: &str) -> AuthResult<()> {
        let now = self.clock.now_unix();
        match self.store.mark_revoked(device_id, now) {
            None => Err(AuthError::UnknownDevice(device_id.to_string())),
            Some(false) => Ok(()),
            Some(true) => {
                self.audit.record(AuditEvent::new(
                    AuditKind::DeviceRevoked,
                    device_subject(device_id),
                    EventOutcome::Success,
                    now,
                ));
                info!(device_id = %device_id, "Device revoked");
                Ok(())
            }
        }
    }

    /// False for unknown or revoked devices
    pub fn is_active(&self, device_id: &str) -> bool {
        self.store.get(device_id).is_some_and(|d| d.is_active())
    }

    /// Look up a device, revoked or not
    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.store.get(device_id)
    }

    /// Every registered device
    pub fn list(&self) -> Vec<Device> {
        self.store.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::ManualClock;

    fn registry() -> (DeviceRegistry, MemoryAuditSink) {
        let audit = MemoryAuditSink::new();
        let registry = DeviceRegistry::new(Arc::new(ManualClock::at(1_000)))
            .with_audit_sink(Arc::new(audit.clone()));
        (registry, audit)
    }

    fn attrs(install: &str) -> DeviceAttributes {
        DeviceAttributes::new()
            .with("install_id", install)
            .with("model", "Pixel 8")
    }

    #[test]
    fn test_register_is_idempotent() {
        let (registry, audit) = registry();
        let first = registry.register(attrs("i-1")).unwrap();
        let again = registry.register(attrs("i-1")).unwrap();

        assert_eq!(first, again);
        assert_eq!(first.registered_at, 1_000);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(audit.events_of(AuditKind::DeviceRegistered).len(), 1);
    }

    #[test]
    fn test_register_strict_reports_duplicate() {
        let (registry, _) = registry();
        let first = registry.register_strict(attrs("i-1")).unwrap();

        assert_eq!(
            registry.register_strict(attrs("i-1")),
            Err(AuthError::DuplicateFingerprint(first.device_id))
        );
        assert!(registry.register_strict(attrs("i-2")).is_ok());
    }

    #[test]
    fn test_separator_smuggling_registers_distinct_devices() {
        let (registry, _) = registry();
        let packed = registry
            .register(DeviceAttributes::new().with("install_id", "i-1|model=Pixel 8"))
            .unwrap();
        let split = registry.register(attrs("i-1")).unwrap();

        assert_ne!(packed.device_id, split.device_id);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_revoke_is_idempotent_and_keeps_history() {
        let (registry, audit) = registry();
        let device = registry.register(attrs("i-1")).unwrap();
        assert!(registry.is_active(&device.device_id));

        registry.revoke(&device.device_id).unwrap();
        registry.revoke(&device.device_id).unwrap();

        assert!(!registry.is_active(&device.device_id));
        assert!(registry.get(&device.device_id).unwrap().revoked);
        assert_eq!(audit.events_of(AuditKind::DeviceRevoked).len(), 1);
    }

    #[test]
    fn test_revoked_fingerprint_registers_as_new_device() {
        let (registry, _) = registry();
        let old = registry.register(attrs("i-1")).unwrap();
        registry.revoke(&old.device_id).unwrap();

        let new = registry.register(attrs("i-1")).unwrap();

        assert_ne!(old.device_id, new.device_id);
        assert_eq!(old.fingerprint, new.fingerprint);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_unknown_device() {
        let (registry, _) = registry();
        assert!(!registry.is_active("missing"));
        assert_eq!(
            registry.revoke("missing"),
            Err(AuthError::UnknownDevice("missing".into()))
        );
    }

    #[test]
    fn test_secret_attributes_never_stored() {
        let (registry, _) = registry();
        let err = registry
            .register(DeviceAttributes::new().with("password", "hunter2"))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
        assert!(registry.list().is_empty());
    }
}
