use crate::types::Device;
use std::collections::HashMap;
use tracking_wire::DeviceStatus;

/// Attached devices keyed by daemon handle. Mutated only by the poll thread.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    pub devices: HashMap<u32, Device>,
}

impl DeviceRegistry {
    /// Returns the device previously registered under the same handle.
    pub fn insert(&mut self, device: Device) -> Option<Device> {
        self.devices.insert(device.handle, device)
    }

    pub fn remove(&mut self, handle: u32) -> Option<Device> {
        self.devices.remove(&handle)
    }

    pub fn get(&self, handle: u32) -> Option<&Device> {
        self.devices.get(&handle)
    }

    /// Updates in place. Returns the updated device and its previous status.
    pub fn update_status(
        &mut self,
        handle: u32,
        status: DeviceStatus,
    ) -> Option<(Device, DeviceStatus)> {
        let device = self.devices.get_mut(&handle)?;
        let previous = std::mem::replace(&mut device.status, status);
        Some((device.clone(), previous))
    }

    /// Sorted by handle.
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.handle);
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracking_wire::DeviceType;

    fn device(handle: u32) -> Device {
        Device {
            handle,
            open_handle: handle + 0x1000,
            device_type: DeviceType::Gen2,
            status: DeviceStatus::STREAMING,
            serial: format!("LP{handle:04}"),
            h_fov: 2.0,
            v_fov: 2.0,
            range_mm: 800,
            baseline_um: 40_000,
        }
    }

    #[test]
    fn test_insert_remove() {
        let mut reg = DeviceRegistry::default();
        assert!(reg.insert(device(7)).is_none());
        assert!(reg.insert(device(3)).is_none());
        assert_eq!(reg.len(), 2);
        let handles: Vec<u32> = reg.list().iter().map(|d| d.handle).collect();
        assert_eq!(handles, vec![3, 7]);

        assert_eq!(reg.remove(7).unwrap().serial, "LP0007");
        assert!(reg.remove(7).is_none());
        assert!(reg.get(3).is_some());
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_status_in_place() {
        let mut reg = DeviceRegistry::default();
        reg.insert(device(7));
        let (updated, previous) = reg
            .update_status(7, DeviceStatus::PAUSED | DeviceStatus::SMUDGED)
            .unwrap();
        assert_eq!(previous, DeviceStatus::STREAMING);
        assert!(updated.status.contains(DeviceStatus::SMUDGED));
        assert_eq!(reg.get(7).unwrap().status, updated.status);
        assert!(reg.update_status(8, DeviceStatus::PAUSED).is_none());
    }
}
