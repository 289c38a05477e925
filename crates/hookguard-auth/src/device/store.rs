//! Device storage

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use super::Device;

/// Result of [`DeviceStore::insert_unique`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The device was stored
    Inserted(Device),
    /// An unrevoked device with the same fingerprint already exists
    Existing(Device),
}

/// Storage for device records
///
/// Records are append-only apart from the revocation flag.
pub trait DeviceStore: Send + Sync + fmt::Debug {
    /// Store `device` unless an unrevoked device has the same fingerprint
    ///
    /// The check and the insert must be atomic.
    fn insert_unique(&self, device: Device) -> InsertOutcome;

    /// Look up by id
    fn get(&self, device_id: &str) -> Option<Device>;

    /// Flag a device revoked
    ///
    /// `None` for an unknown id, `Some(true)` when this call revoked it,
    /// `Some(false)` when it was already revoked.
    fn mark_revoked(&self, device_id: &str, now: u64) -> Option<bool>;

    /// Every device ever registered, ordered by registration time
    fn list(&self) -> Vec<Device>;
}

#[derive(Debug, Default)]
struct DeviceTable {
    devices: HashMap<String, Device>,
    /// Fingerprint -> id of the unrevoked device holding it
    active_fingerprints: HashMap<String, String>,
}

/// In-memory [`DeviceStore`]
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    table: RwLock<DeviceTable>,
}

impl MemoryDeviceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn insert_unique(&self, device: Device) -> InsertOutcome {
        let mut table = self.table.write();
        if let Some(existing) = table
            .active_fingerprints
            .get(&device.fingerprint)
            .and_then(|id| table.devices.get(id))
        {
            return InsertOutcome::Existing(existing.clone());
        }
        table
            .active_fingerprints
            .insert(device.fingerprint.clone(), device.device_id.clone());
        table.devices.insert(device.device_id.clone(), device.clone());
        InsertOutcome::Inserted(device)
    }

    fn get(&self, device_id: &str) -> Option<Device> {
        self.table.read().devices.get(device_id).cloned()
    }

    fn mark_revoked(&self, device_id: &str, now: u64) -> Option<bool> {
        let mut table = self.table.write();
        let device = table.devices.get_mut(device_id)?;
        if device.revoked {
            return Some(false);
        }
        device.revoked = true;
        device.revoked_at = Some(now);
        let fingerprint = device.fingerprint.clone();
        if table.active_fingerprints.get(&fingerprint).map(String::as_str) == Some(device_id) {
            table.active_fingerprints.remove(&fingerprint);
        }
        Some(true)
    }

    fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.table.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, fingerprint: &str, at: u64) -> Device {
        Device {
            device_id: id.into(),
            fingerprint: fingerprint.into(),
            label: None,
            registered_at: at,
            revoked: false,
            revoked_at: None,
        }
    }

    #[test]
    fn test_insert_unique_returns_existing_active_device() {
        let store = MemoryDeviceStore::new();
        assert!(matches!(store.insert_unique(device("d1", "fp", 1)), InsertOutcome::Inserted(_)));

        match store.insert_unique(device("d2", "fp", 2)) {
            InsertOutcome::Existing(d) => assert_eq!(d.device_id, "d1"),
            other => panic!("expected existing device, got {other:?}"),
        }
        assert!(store.get("d2").is_none());
    }

    #[test]
    fn test_revoked_fingerprint_can_register_again() {
        let store = MemoryDeviceStore::new();
        store.insert_unique(device("d1", "fp", 1));

        assert_eq!(store.mark_revoked("d1", 5), Some(true));
        assert_eq!(store.mark_revoked("d1", 6), Some(false));
        assert_eq!(store.mark_revoked("nope", 6), None);

        assert!(matches!(store.insert_unique(device("d2", "fp", 7)), InsertOutcome::Inserted(_)));
        let listed: Vec<_> = store.list().into_iter().map(|d| (d.device_id, d.revoked)).collect();
        assert_eq!(listed, vec![("d1".to_string(), true), ("d2".to_string(), false)]);
        assert_eq!(store.get("d1").unwrap().revoked_at, Some(5));
    }
}
