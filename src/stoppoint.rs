//! # Stoppoint Collection
//!
//! A generic container for breakpoint sites and watchpoints, indexed by id
//! and by virtual address.
//!
//! The collection itself never talks to the kernel. Removal only erases the
//! entry; the inferior's `remove_*` operations disable the stoppoint first
//! so that no trap byte or debug register slot is leaked.

use crate::addr::VirtAddr;
use crate::errors::{DebuggerError, Result};

/// Monotonic per-inferior stoppoint id.
pub type StoppointId = u32;

/// Access mode of a hardware stoppoint.
///
/// x86-64 has no read-only data breakpoint, hence no `Read` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppointMode {
    Write,
    ReadWrite,
    Execute,
}

/// Common surface of breakpoint sites and watchpoints.
pub trait Stoppoint {
    fn id(&self) -> StoppointId;
    fn address(&self) -> VirtAddr;
    fn is_enabled(&self) -> bool;

    fn at_address(&self, address: VirtAddr) -> bool {
        self.address() == address
    }

    fn in_region(&self, low: VirtAddr, high: VirtAddr) -> bool {
        low <= self.address() && self.address() < high
    }
}

/// Id- and address-indexed container of one kind of stoppoint.
#[derive(Debug, Default)]
pub struct StoppointCollection<T: Stoppoint> {
    stoppoints: Vec<T>,
}

impl<T: Stoppoint> StoppointCollection<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stoppoints: Vec::new(),
        }
    }

    pub fn push(&mut self, stoppoint: T) -> &mut T {
        self.stoppoints.push(stoppoint);
        self.stoppoints.last_mut().unwrap()
    }

    fn find_by_id(&self, id: StoppointId) -> Option<usize> {
        self.stoppoints.iter().position(|point| point.id() == id)
    }

    fn find_by_address(&self, address: VirtAddr) -> Option<usize> {
        self.stoppoints
            .iter()
            .position(|point| point.at_address(address))
    }

    #[must_use]
    pub fn contains_id(&self, id: StoppointId) -> bool {
        self.find_by_id(id).is_some()
    }

    #[must_use]
    pub fn contains_address(&self, address: VirtAddr) -> bool {
        self.find_by_address(address).is_some()
    }

    #[must_use]
    pub fn enabled_stoppoint_at_address(&self, address: VirtAddr) -> bool {
        self.find_by_address(address)
            .is_some_and(|i| self.stoppoints[i].is_enabled())
    }

    pub fn get_by_id(&self, id: StoppointId) -> Result<&T> {
        self.find_by_id(id)
            .map(|i| &self.stoppoints[i])
            .ok_or(DebuggerError::InvalidStoppoint("id"))
    }

    pub fn get_by_id_mut(&mut self, id: StoppointId) -> Result<&mut T> {
        self.find_by_id(id)
            .map(|i| &mut self.stoppoints[i])
            .ok_or(DebuggerError::InvalidStoppoint("id"))
    }

    pub fn get_by_address(&self, address: VirtAddr) -> Result<&T> {
        self.find_by_address(address)
            .map(|i| &self.stoppoints[i])
            .ok_or(DebuggerError::InvalidStoppoint("address"))
    }

    pub fn get_by_address_mut(&mut self, address: VirtAddr) -> Result<&mut T> {
        self.find_by_address(address)
            .map(|i| &mut self.stoppoints[i])
            .ok_or(DebuggerError::InvalidStoppoint("address"))
    }

    /// Erases the stoppoint with `id` and returns it.
    pub fn remove_by_id(&mut self, id: StoppointId) -> Result<T> {
        let index = self
            .find_by_id(id)
            .ok_or(DebuggerError::InvalidStoppoint("id"))?;
        Ok(self.stoppoints.remove(index))
    }

    /// Erases the stoppoint at `address` and returns it.
    pub fn remove_by_address(&mut self, address: VirtAddr) -> Result<T> {
        let index = self
            .find_by_address(address)
            .ok_or(DebuggerError::InvalidStoppoint("address"))?;
        Ok(self.stoppoints.remove(index))
    }

    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for point in &self.stoppoints {
            f(point);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.stoppoints.iter()
    }

    /// All stoppoints whose address lies in `[low, high)`.
    #[must_use]
    pub fn get_in_region(&self, low: VirtAddr, high: VirtAddr) -> Vec<&T> {
        self.stoppoints
            .iter()
            .filter(|point| point.in_region(low, high))
            .collect()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.stoppoints.len()
    }

    #[must_use]
    pub fn empty(&self) -> bool {
        self.stoppoints.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct TestPoint {
        id: StoppointId,
        addr: VirtAddr,
        enabled: bool,
    }

    impl Stoppoint for TestPoint {
        fn id(&self) -> StoppointId {
            self.id
        }
        fn address(&self) -> VirtAddr {
            self.addr
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    fn collection() -> StoppointCollection<TestPoint> {
        let mut points = StoppointCollection::new();
        points.push(TestPoint {
            id: 1,
            addr: VirtAddr::new(0x1000),
            enabled: true,
        });
        points.push(TestPoint {
            id: 2,
            addr: VirtAddr::new(0x2000),
            enabled: false,
        });
        points
    }

    #[test]
    fn test_lookup() {
        let points = collection();
        assert!(points.contains_id(1));
        assert!(!points.contains_id(3));
        assert!(points.contains_address(VirtAddr::new(0x2000)));
        assert_eq!(points.get_by_address(VirtAddr::new(0x1000)).unwrap().id(), 1);
        assert!(points.get_by_id(7).is_err());
    }

    #[test]
    fn test_enabled_stoppoint_at_address() {
        let points = collection();
        assert!(points.enabled_stoppoint_at_address(VirtAddr::new(0x1000)));
        assert!(!points.enabled_stoppoint_at_address(VirtAddr::new(0x2000)));
        assert!(!points.enabled_stoppoint_at_address(VirtAddr::new(0x3000)));
    }

    #[test]
    fn test_remove() {
        let mut points = collection();
        points.remove_by_id(1).unwrap();
        assert_eq!(points.size(), 1);
        points.remove_by_address(VirtAddr::new(0x2000)).unwrap();
        assert!(points.empty());
        assert!(points.remove_by_id(2).is_err());
    }

    #[test]
    fn test_get_in_region() {
        let points = collection();
        let hits = points.get_in_region(VirtAddr::new(0x1000), VirtAddr::new(0x2000));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), 1);
    }
}
