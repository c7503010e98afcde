//! Hardware data breakpoints with a before/after snapshot of the watched
//! bytes.

use std::mem;

use crate::addr::VirtAddr;
use crate::errors::{DebuggerError, Result};
use crate::stoppoint::{Stoppoint, StoppointId, StoppointMode};

#[derive(Debug)]
pub struct Watchpoint {
    id: StoppointId,
    addr: VirtAddr,
    enabled: bool,
    mode: StoppointMode,
    size: usize,
    hardware_slot: Option<usize>,
    data: u64,
    previous_data: u64,
}

impl Watchpoint {
    /// Creates a disabled watchpoint.
    ///
    /// `size` must be 1, 2, 4 or 8 and `addr` must be aligned to it; the
    /// debug registers cannot express anything else.
    pub(crate) fn new(
        id: StoppointId,
        addr: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<Self> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(DebuggerError::InvalidArgument(format!(
                "invalid watchpoint size: {size}"
            )));
        }
        if addr.addr() & (size as u64 - 1) != 0 {
            return Err(DebuggerError::InvalidArgument(format!(
                "watchpoint must be aligned to size: address = {addr}, size = {size}"
            )));
        }

        Ok(Self {
            id,
            addr,
            enabled: false,
            mode,
            size,
            hardware_slot: None,
            data: 0,
            previous_data: 0,
        })
    }

    #[must_use]
    pub fn mode(&self) -> StoppointMode {
        self.mode
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The watched bytes as of the latest snapshot, zero-extended.
    #[must_use]
    pub fn data(&self) -> u64 {
        self.data
    }

    /// The watched bytes as of the snapshot before the latest one.
    #[must_use]
    pub fn previous_data(&self) -> u64 {
        self.previous_data
    }

    #[must_use]
    pub fn hardware_slot(&self) -> Option<usize> {
        self.hardware_slot
    }

    pub(crate) fn push_data(&mut self, new_data: u64) {
        self.previous_data = mem::replace(&mut self.data, new_data);
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_hardware_slot(&mut self, slot: Option<usize>) {
        self.hardware_slot = slot;
    }
}

impl Stoppoint for Watchpoint {
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rejects_unaligned_address() {
        let result = Watchpoint::new(1, VirtAddr::new(0x1001), StoppointMode::Write, 4);
        assert!(matches!(result, Err(DebuggerError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_bad_size() {
        let result = Watchpoint::new(1, VirtAddr::new(0x1000), StoppointMode::Write, 3);
        assert!(matches!(result, Err(DebuggerError::InvalidArgument(_))));
    }

    #[test]
    fn test_aligned_sizes_accepted() {
        for size in [1usize, 2, 4, 8] {
            assert!(Watchpoint::new(1, VirtAddr::new(0x1000), StoppointMode::ReadWrite, size).is_ok());
        }
    }

    #[test]
    fn test_data_snapshots() {
        let mut wp = Watchpoint::new(1, VirtAddr::new(0x1000), StoppointMode::Write, 8).unwrap();
        wp.push_data(0xcafe);
        wp.push_data(0xba5e);
        assert_eq!(wp.previous_data(), 0xcafe);
        assert_eq!(wp.data(), 0xba5e);
    }
}
