//! Binds one inferior to the ELF object it was loaded from and derives the
//! load bias from the auxiliary vector.

use std::os::fd::OwnedFd;
use std::path::Path;

use tracing::debug;

use crate::addr::{FileAddr, VirtAddr};
use crate::consts::AT_ENTRY;
use crate::elf::Elf;
use crate::errors::{DebuggerError, Result};
use crate::inferior::Inferior;

/// One debugging session: an inferior plus its executable's ELF.
pub struct Target {
    inferior: Inferior,
    elf: Elf,
}

impl Target {
    /// Launches `path` under the tracer and parses its ELF.
    pub fn launch(path: impl AsRef<Path>, stdout_replacement: Option<OwnedFd>) -> Result<Self> {
        let path = path.as_ref();
        let inferior = Inferior::launch(path, true, stdout_replacement)?;
        let elf = create_loaded_elf(&inferior, path)?;
        Ok(Self { inferior, elf })
    }

    /// Attaches to `pid`, resolving its executable through procfs.
    pub fn attach(pid: i32) -> Result<Self> {
        let elf_path = format!("/proc/{pid}/exe");
        let inferior = Inferior::attach(pid)?;
        let elf = create_loaded_elf(&inferior, elf_path)?;
        Ok(Self { inferior, elf })
    }

    #[must_use]
    pub fn inferior(&self) -> &Inferior {
        &self.inferior
    }

    pub fn inferior_mut(&mut self) -> &mut Inferior {
        &mut self.inferior
    }

    #[must_use]
    pub fn elf(&self) -> &Elf {
        &self.elf
    }

    /// The live virtual address of the executable's entry point.
    #[must_use]
    pub fn entry_point(&self) -> Option<VirtAddr> {
        FileAddr::new(&self.elf, self.elf.header().e_entry).to_virt_addr()
    }
}

/// Parses the ELF at `path` and sets its load bias from the inferior's
/// auxiliary vector: observed entry PC minus declared entry point.
fn create_loaded_elf(inferior: &Inferior, path: impl AsRef<Path>) -> Result<Elf> {
    let auxv = inferior.get_auxv()?;
    let mut elf = Elf::open(path)?;

    let entry = auxv.get(&AT_ENTRY).copied().ok_or_else(|| {
        DebuggerError::InvalidArgument("no AT_ENTRY in the auxiliary vector".to_string())
    })?;
    let bias = VirtAddr::new(entry - elf.header().e_entry);
    debug!("load bias of {} is {bias}", elf.path().display());
    elf.notify_loaded(bias);
    Ok(elf)
}
