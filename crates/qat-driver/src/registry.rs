//! Device registry
//!
//! Hands out device ids from a fixed pool and keeps the remap table between
//! internal ids and the ids callers see. Virtual functions hosted on this
//! machine keep their internal id while detached, so a re-plugged VF comes
//! back under the same id. A caller-visible id is the device's position
//! among attached rows of the remap table, so visible ids stay unique and
//! contiguous: detaching or re-attaching a row shifts every later one.
//!
//! One mutex guards the table. It is never held across register access:
//! callers get an [`Arc<RegisteredDevice>`] out and work on that.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{QatError, Result};

/// Size of the id pool.
pub const MAX_DEVICES: usize = 32;

/// Wildcard accepted by [`Registry::verify_id`].
pub const ALL_DEVICES: u32 = 0xfe;

/// PCI location of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusIdentity {
    /// Bus number
    pub bus: u8,
    /// Device (slot) and function, packed as `slot << 3 | func`
    pub devfn: u8,
}

impl BusIdentity {
    /// Identity from bus, slot and function.
    #[must_use]
    pub const fn new(bus: u8, slot: u8, func: u8) -> Self {
        Self {
            bus,
            devfn: (slot << 3) | (func & 7),
        }
    }

    /// Slot number.
    #[must_use]
    pub const fn slot(self) -> u8 {
        self.devfn >> 3
    }

    /// Function number.
    #[must_use]
    pub const fn func(self) -> u8 {
        self.devfn & 7
    }

    /// VF index derived from slot and function. VFs start at slot 1.
    #[must_use]
    pub const fn vf_id(self) -> u32 {
        let slot = self.slot().saturating_sub(1) as u32;
        7 * slot + self.func() as u32 + slot
    }

    /// Remap-table key.
    #[must_use]
    pub const fn key(self) -> u32 {
        ((self.bus as u32) << 8) | self.vf_id()
    }
}

impl std::fmt::Display for BusIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.slot(), self.func())
    }
}

/// How a device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// Physical function; owns its id outright.
    Physical,
    /// Virtual function hosted on this machine; keeps its id across detach.
    HostedVf,
}

/// What a caller registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable name
    pub name: String,
    /// PCI location
    pub identity: BusIdentity,
    /// Attachment kind
    pub role: DeviceRole,
}

/// Told when a device's usage count leaves or returns to zero.
pub trait UsageObserver: Send + Sync {
    /// Usage went from 0 to 1.
    fn busy(&self, id: u32);
    /// Usage went from 1 to 0.
    fn idle(&self, id: u32);
}

/// A registered device and its usage count.
#[derive(Debug)]
pub struct RegisteredDevice {
    id: u32,
    info: DeviceInfo,
    usage: AtomicU32,
}

impl RegisteredDevice {
    /// Internal id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Registration details.
    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Current usage count.
    #[must_use]
    pub fn usage(&self) -> u32 {
        self.usage.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemapRow {
    key: u32,
    id: u32,
    attached: bool,
}

#[derive(Debug, Default)]
struct Table {
    slots: Vec<Option<Arc<RegisteredDevice>>>,
    remap: Vec<RemapRow>,
}

impl Table {
    fn reserved(&self, id: u32) -> bool {
        self.remap.iter().any(|r| r.id == id)
    }

    fn free_id(&self) -> Option<u32> {
        (0..MAX_DEVICES as u32).find(|&id| !self.reserved(id))
    }

    fn attached_count(&self) -> u32 {
        self.remap.iter().filter(|r| r.attached).count() as u32
    }

    /// Attached rows paired with their caller-visible ids.
    fn visible(&self) -> impl Iterator<Item = (u32, &RemapRow)> {
        (0..).zip(self.remap.iter().filter(|r| r.attached))
    }
}

/// Bounded device registry.
pub struct Registry {
    table: Mutex<Table>,
    observer: Option<Box<dyn UsageObserver>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("devices", &self.device_count())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry without a usage observer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                slots: vec![None; MAX_DEVICES],
                remap: Vec::new(),
            }),
            observer: None,
        }
    }

    /// Empty registry that reports busy/idle transitions to `observer`.
    #[must_use]
    pub fn with_observer(observer: impl UsageObserver + 'static) -> Self {
        Self {
            observer: Some(Box::new(observer)),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock cannot leave the table half-updated.
        self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register `info` and return its internal id.
    ///
    /// # Errors
    ///
    /// Precondition if the same PCI location is already attached; resource
    /// exhaustion when every id is taken, leaving the registry unchanged.
    pub fn register(&self, info: DeviceInfo) -> Result<u32> {
        let mut table = self.lock();
        let key = info.identity.key();
        if table.slots.iter().flatten().any(|d| d.info.identity == info.identity) {
            return Err(QatError::precondition(format!(
                "device {} is already registered",
                info.identity
            )));
        }

        let rejoin = (info.role == DeviceRole::HostedVf)
            .then(|| table.remap.iter().position(|r| r.key == key && !r.attached))
            .flatten();
        let id = match rejoin {
            Some(row) => {
                table.remap[row].attached = true;
                table.remap[row].id
            }
            None => {
                let Some(id) = table.free_id() else {
                    tracing::warn!("Cannot register {}: all {MAX_DEVICES} ids in use", info.name);
                    return Err(QatError::exhausted(format!("device pool of {MAX_DEVICES} is full")));
                };
                table.remap.push(RemapRow {
                    key,
                    id,
                    attached: true,
                });
                id
            }
        };

        tracing::info!("Registered {} at {} as device {id}", info.name, info.identity);
        table.slots[id as usize] = Some(Arc::new(RegisteredDevice {
            id,
            info,
            usage: AtomicU32::new(0),
        }));
        Ok(id)
    }

    /// Remove device `id`. A physical function frees its id; a hosted VF
    /// keeps it reserved for re-attach.
    ///
    /// # Errors
    ///
    /// Invalid input if `id` is not registered; precondition if the device
    /// is still in use.
    pub fn unregister(&self, id: u32) -> Result<()> {
        let mut table = self.lock();
        let Some(dev) = table.slots.get(id as usize).cloned().flatten() else {
            return Err(QatError::invalid_input(format!("device {id} is not registered")));
        };
        if dev.usage() != 0 {
            return Err(QatError::precondition(format!(
                "device {id} is in use ({} references)",
                dev.usage()
            )));
        }
        let Some(row) = table.remap.iter().position(|r| r.id == id) else {
            return Err(QatError::invalid_input(format!("device {id} has no remap entry")));
        };

        table.slots[id as usize] = None;
        match dev.info.role {
            DeviceRole::Physical => {
                table.remap.remove(row);
            }
            DeviceRole::HostedVf => table.remap[row].attached = false,
        }
        tracing::info!("Unregistered device {id} ({})", dev.info.name);
        Ok(())
    }

    /// Device behind the caller-visible id `fake_id`.
    #[must_use]
    pub fn lookup(&self, fake_id: u32) -> Option<Arc<RegisteredDevice>> {
        let table = self.lock();
        let (_, row) = table.visible().find(|&(visible, _)| visible == fake_id)?;
        table.slots.get(row.id as usize).cloned().flatten()
    }

    /// Device registered under internal `id`.
    #[must_use]
    pub fn get_by_id(&self, id: u32) -> Option<Arc<RegisteredDevice>> {
        self.lock().slots.get(id as usize).cloned().flatten()
    }

    /// Caller-visible id of internal `id`.
    #[must_use]
    pub fn visible_id(&self, id: u32) -> Option<u32> {
        self.lock()
            .visible()
            .find(|&(_, r)| r.id == id)
            .map(|(fake_id, _)| fake_id)
    }

    /// Attached devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.lock().attached_count() as usize
    }

    /// Accept [`ALL_DEVICES`] or any attached caller-visible id.
    ///
    /// # Errors
    ///
    /// Invalid input otherwise.
    pub fn verify_id(&self, fake_id: u32) -> Result<()> {
        if fake_id == ALL_DEVICES || self.lookup(fake_id).is_some() {
            Ok(())
        } else {
            Err(QatError::invalid_input(format!("no device with id {fake_id}")))
        }
    }

    /// Release the ids held by detached VFs. Returns how many were freed.
    pub fn purge_detached(&self) -> usize {
        let mut table = self.lock();
        let before = table.remap.len();
        table.remap.retain(|r| r.attached);
        before - table.remap.len()
    }

    /// Take a usage reference on `dev`.
    pub fn get(&self, dev: &RegisteredDevice) {
        if dev.usage.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::debug!("Device {} busy", dev.id);
            if let Some(observer) = &self.observer {
                observer.busy(dev.id);
            }
        }
    }

    /// Drop a usage reference on `dev`.
    ///
    /// # Errors
    ///
    /// Precondition if the count is already zero.
    pub fn put(&self, dev: &RegisteredDevice) -> Result<()> {
        let prev = dev
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| QatError::precondition(format!("device {} is not in use", dev.id)))?;
        if prev == 1 {
            tracing::debug!("Device {} idle", dev.id);
            if let Some(observer) = &self.observer {
                observer.idle(dev.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pf(n: u8) -> DeviceInfo {
        DeviceInfo {
            name: format!("qat{n}"),
            identity: BusIdentity::new(n, 0, 0),
            role: DeviceRole::Physical,
        }
    }

    fn vf(slot: u8, func: u8) -> DeviceInfo {
        DeviceInfo {
            name: format!("vf{slot}.{func}"),
            identity: BusIdentity::new(0x3d, slot, func),
            role: DeviceRole::HostedVf,
        }
    }

    #[test]
    fn vf_id_counts_eight_functions_per_slot() {
        assert_eq!(BusIdentity::new(0, 1, 0).vf_id(), 0);
        assert_eq!(BusIdentity::new(0, 1, 7).vf_id(), 7);
        assert_eq!(BusIdentity::new(0, 2, 0).vf_id(), 8);
        assert_eq!(BusIdentity::new(0x3d, 2, 3).key(), 0x3d00 | 11);
        assert_eq!(BusIdentity::new(0x3d, 2, 3).to_string(), "3d:02.3");
    }

    #[test]
    fn ids_are_unique_and_reused_after_physical_unregister() {
        let reg = Registry::new();
        let a = reg.register(pf(1)).unwrap();
        let b = reg.register(pf(2)).unwrap();
        assert_ne!(a, b);
        reg.unregister(a).unwrap();
        assert_eq!(reg.lookup(0).map(|d| d.id()), Some(b));
        assert_eq!(reg.register(pf(3)).unwrap(), a);
    }

    #[test]
    fn duplicate_location_is_refused() {
        let reg = Registry::new();
        reg.register(pf(1)).unwrap();
        let err = reg.register(pf(1)).unwrap_err();
        assert!(matches!(err, QatError::Precondition { .. }));
    }

    #[test]
    fn replugged_vf_keeps_its_id_and_shifts_later_rows() {
        let reg = Registry::new();
        let first = reg.register(vf(1, 0)).unwrap();
        let second = reg.register(vf(1, 1)).unwrap();
        let third = reg.register(pf(7)).unwrap();
        assert_eq!(reg.visible_id(third), Some(2));

        reg.unregister(second).unwrap();
        assert_eq!(reg.device_count(), 2);
        assert_eq!(reg.visible_id(third), Some(1));
        assert_eq!(reg.lookup(1).map(|d| d.id()), Some(third));

        assert_eq!(reg.register(vf(1, 1)).unwrap(), second);
        assert_eq!(reg.visible_id(first), Some(0));
        assert_eq!(reg.visible_id(second), Some(1));
        assert_eq!(reg.visible_id(third), Some(2));
    }

    #[test]
    fn visible_ids_stay_unique_across_pf_removal_and_vf_replug() {
        let reg = Registry::new();
        let a = reg.register(pf(1)).unwrap();
        let b = reg.register(vf(1, 0)).unwrap();
        reg.unregister(b).unwrap();
        reg.unregister(a).unwrap();
        let a = reg.register(pf(1)).unwrap();
        assert_eq!(reg.register(vf(1, 0)).unwrap(), b);

        let pf_visible = reg.visible_id(a);
        let vf_visible = reg.visible_id(b);
        assert_ne!(pf_visible, vf_visible);
        assert_eq!(vf_visible, Some(0));
        assert_eq!(pf_visible, Some(1));
        assert_eq!(reg.lookup(0).map(|d| d.id()), Some(b));
        assert_eq!(reg.lookup(1).map(|d| d.id()), Some(a));
        assert!(reg.lookup(2).is_none());
    }

    #[test]
    fn purge_frees_detached_vf_ids() {
        let reg = Registry::new();
        let id = reg.register(vf(1, 0)).unwrap();
        reg.unregister(id).unwrap();
        assert_eq!(reg.purge_detached(), 1);
        assert_eq!(reg.register(pf(9)).unwrap(), id);
    }

    #[test]
    fn verify_id_accepts_wildcard() {
        let reg = Registry::new();
        assert!(reg.verify_id(ALL_DEVICES).is_ok());
        assert!(reg.verify_id(0).is_err());
        reg.register(pf(1)).unwrap();
        assert!(reg.verify_id(0).is_ok());
    }

    #[derive(Default)]
    struct Counts(AtomicUsize, AtomicUsize);

    impl UsageObserver for Arc<Counts> {
        fn busy(&self, _id: u32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn idle(&self, _id: u32) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observer_sees_only_zero_crossings() {
        let counts = Arc::new(Counts::default());
        let reg = Registry::with_observer(Arc::clone(&counts));
        let id = reg.register(pf(1)).unwrap();
        let dev = reg.get_by_id(id).unwrap();
        reg.get(&dev);
        reg.get(&dev);
        reg.put(&dev).unwrap();
        assert_eq!(counts.0.load(Ordering::SeqCst), 1);
        assert_eq!(counts.1.load(Ordering::SeqCst), 0);
        assert!(reg.unregister(id).is_err());
        reg.put(&dev).unwrap();
        assert_eq!(counts.1.load(Ordering::SeqCst), 1);
        assert!(reg.put(&dev).is_err());
        reg.unregister(id).unwrap();
    }
}
