//! # Inferior Control Plane
//!
//! Launching and attaching to the traced process, the stop/resume state
//! machine on top of ptrace, stop-reason classification, memory access, and
//! the shared pool of four hardware debug register slots.
//!
//! All interaction with the inferior is synchronous: the tracer resumes,
//! blocks in `waitpid`, classifies the stop, and hands a [`StopReason`] back
//! to the caller. The cached register image is refreshed on every transition
//! into the stopped state and must not be consulted while the inferior runs.

use std::collections::HashMap;
use std::ffi::CString;
use std::io::IoSliceMut;
use std::os::fd::OwnedFd;
use std::path::Path;

use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, setpgid, ForkResult, Pid};
use syscalls::Sysno;
use tracing::{debug, trace};

use crate::addr::VirtAddr;
use crate::breakpoint::BreakpointSite;
use crate::consts::{AT_NULL, INT3_BYTE, SI_KERNEL, TRAP_HWBKPT, TRAP_TRACE, WORD_BYTES};
use crate::errors::{DebuggerError, Result};
use crate::pipe::Pipe;
use crate::register_info::RegisterId;
use crate::registers::{RegisterValue, Registers};
use crate::stoppoint::{Stoppoint, StoppointCollection, StoppointId, StoppointMode};
use crate::watchpoint::Watchpoint;

const PAGE_SIZE: u64 = 0x1000;

/// Lifecycle state of the inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Stopped,
    Running,
    Exited,
    Terminated,
}

/// Why a SIGTRAP stop happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapType {
    SingleStep,
    SoftwareBreak,
    HardwareBreak,
    Syscall,
    Unknown,
}

/// Per-direction payload of a syscall stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallData {
    /// The six argument registers, captured on entry
    Args([u64; 6]),
    /// The return value, captured on exit
    Ret(i64),
}

/// One half of a syscall entry/exit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallInfo {
    pub id: u16,
    pub entry: bool,
    pub data: SyscallData,
}

/// Decoded and augmented result of one wait.
#[derive(Debug, Clone, Copy)]
pub struct StopReason {
    pub reason: ProcState,
    /// Exit code for `Exited`, signal number otherwise
    pub info: i32,
    pub trap_reason: Option<TrapType>,
    pub syscall_info: Option<SyscallInfo>,
}

impl StopReason {
    fn from_wait_status(status: WaitStatus) -> Self {
        let (reason, info) = match status {
            WaitStatus::Exited(_, code) => (ProcState::Exited, code),
            WaitStatus::Signaled(_, signal, _) => (ProcState::Terminated, signal as i32),
            WaitStatus::Stopped(_, signal) => (ProcState::Stopped, signal as i32),
            // TRACESYSGOOD marks syscall stops; normalized to SIGTRAP here
            // and classified during augmentation
            WaitStatus::PtraceSyscall(_) => (ProcState::Stopped, Signal::SIGTRAP as i32),
            WaitStatus::PtraceEvent(_, signal, _) => (ProcState::Stopped, signal as i32),
            WaitStatus::Continued(_) | WaitStatus::StillAlive => (ProcState::Running, 0),
        };
        Self {
            reason,
            info,
            trap_reason: None,
            syscall_info: None,
        }
    }
}

/// Which syscalls cause a reported stop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyscallCatchPolicy {
    #[default]
    None,
    All,
    Some(Vec<Sysno>),
}

/// Identity of the hardware stoppoint a hardware trap belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareStoppoint {
    Breakpoint(StoppointId),
    Watchpoint(StoppointId),
}

/// A process under the tracer's control.
pub struct Inferior {
    pid: Pid,
    terminate_on_end: bool,
    is_attached: bool,
    state: ProcState,
    registers: Registers,
    breakpoint_sites: StoppointCollection<BreakpointSite>,
    watchpoints: StoppointCollection<Watchpoint>,
    syscall_catch_policy: SyscallCatchPolicy,
    expecting_syscall_exit: bool,
    next_stoppoint_id: StoppointId,
}

impl Inferior {
    fn new(pid: Pid, terminate_on_end: bool, is_attached: bool) -> Self {
        Self {
            pid,
            terminate_on_end,
            is_attached,
            state: ProcState::Stopped,
            registers: Registers::new(pid),
            breakpoint_sites: StoppointCollection::new(),
            watchpoints: StoppointCollection::new(),
            syscall_catch_policy: SyscallCatchPolicy::None,
            expecting_syscall_exit: false,
            next_stoppoint_id: 0,
        }
    }

    /// Forks and execs `path` as a traced child.
    ///
    /// With `debug` unset the child is spawned without tracing, which is
    /// what the attach path and its tests need. `stdout_replacement` is
    /// duplicated onto the child's stdout before exec.
    pub fn launch(
        path: impl AsRef<Path>,
        debug: bool,
        stdout_replacement: Option<OwnedFd>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut channel = Pipe::new(true)?;

        match unsafe { fork() }.map_err(DebuggerError::kernel_call("fork failed"))? {
            ForkResult::Child => {
                channel.close_read();
                let err = exec_inferior(path, debug, stdout_replacement)
                    .expect_err("exec does not return on success");
                let _ = channel.write(err.to_string().as_bytes());
                std::process::exit(-1);
            }
            ForkResult::Parent { child } => {
                channel.close_write();
                let data = channel.read()?;
                channel.close_read();

                if !data.is_empty() {
                    let _ = waitpid(child, None);
                    return Err(DebuggerError::Launch(
                        String::from_utf8_lossy(&data).into_owned(),
                    ));
                }

                debug!("launched {} as pid {child}", path.display());
                let mut inferior = Self::new(child, true, debug);
                if debug {
                    inferior.wait_on_signal()?;
                    inferior.set_ptrace_options()?;
                }
                Ok(inferior)
            }
        }
    }

    /// Attaches to an already running process.
    pub fn attach(pid: i32) -> Result<Self> {
        if pid == 0 {
            return Err(DebuggerError::Attach("invalid PID".to_string()));
        }
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid).map_err(DebuggerError::kernel_call("could not attach"))?;

        let mut inferior = Self::new(pid, false, true);
        inferior.wait_on_signal()?;
        inferior.set_ptrace_options()?;
        Ok(inferior)
    }

    fn set_ptrace_options(&self) -> Result<()> {
        ptrace::setoptions(self.pid, ptrace::Options::PTRACE_O_TRACESYSGOOD)
            .map_err(DebuggerError::kernel_call("failed to set TRACESYSGOOD option"))
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn state(&self) -> ProcState {
        self.state
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    #[must_use]
    pub fn breakpoint_sites(&self) -> &StoppointCollection<BreakpointSite> {
        &self.breakpoint_sites
    }

    #[must_use]
    pub fn watchpoints(&self) -> &StoppointCollection<Watchpoint> {
        &self.watchpoints
    }

    pub fn set_syscall_catch_policy(&mut self, policy: SyscallCatchPolicy) {
        self.syscall_catch_policy = policy;
    }

    /// Whether a process with this pid still exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        !matches!(kill(self.pid, None), Err(nix::errno::Errno::ESRCH))
    }

    pub fn pc(&self) -> Result<VirtAddr> {
        Ok(VirtAddr::new(
            self.registers.read_by_id_as_u64(RegisterId::rip)?,
        ))
    }

    pub fn set_pc(&mut self, address: VirtAddr) -> Result<()> {
        self.registers
            .write_by_id(RegisterId::rip, RegisterValue::U64(address.addr()))
    }

    /// Resumes execution until the next stop.
    ///
    /// An enabled breakpoint at the current PC is stepped over first:
    /// disable, single step, wait, re-enable. The site is re-enabled even
    /// when the step stops early on an unrelated signal.
    pub fn resume(&mut self) -> Result<()> {
        let pc = self.pc()?;
        if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            let id = self.breakpoint_sites.get_by_address(pc)?.id();
            self.disable_breakpoint_site(id)?;
            ptrace::step(self.pid, None)
                .map_err(DebuggerError::kernel_call("failed to single step"))?;
            let wait_result =
                waitpid(self.pid, None).map_err(DebuggerError::kernel_call("waitpid failed"));
            self.enable_breakpoint_site(id)?;
            wait_result?;
        }

        let resume_result = if self.syscall_catch_policy == SyscallCatchPolicy::None {
            ptrace::cont(self.pid, None)
        } else {
            ptrace::syscall(self.pid, None)
        };
        resume_result.map_err(DebuggerError::kernel_call("could not resume"))?;

        self.state = ProcState::Running;
        Ok(())
    }

    /// Blocks until the inferior stops or ends and classifies the event.
    pub fn wait_on_signal(&mut self) -> Result<StopReason> {
        let status =
            waitpid(self.pid, None).map_err(DebuggerError::kernel_call("waitpid failed"))?;
        let mut reason = StopReason::from_wait_status(status);
        self.state = reason.reason;
        trace!("wait_on_signal: {status:?}");

        if self.is_attached && self.state == ProcState::Stopped {
            self.read_all_registers()?;
            self.augment_stop_reason(&mut reason, status)?;

            if reason.info == Signal::SIGTRAP as i32 {
                let instr_begin = self.pc()? - 1i64;
                if reason.trap_reason == Some(TrapType::SoftwareBreak)
                    && self.breakpoint_sites.enabled_stoppoint_at_address(instr_begin)
                {
                    // the CPU has executed the one-byte trap; put the PC
                    // back on the patched instruction
                    self.set_pc(instr_begin)?;
                } else if reason.trap_reason == Some(TrapType::HardwareBreak) {
                    if let HardwareStoppoint::Watchpoint(id) =
                        self.get_current_hardware_stoppoint()?
                    {
                        self.update_watchpoint_data(id)?;
                    }
                } else if reason.trap_reason == Some(TrapType::Syscall) {
                    reason = self.maybe_resume_from_syscall(reason)?;
                }
            }
        }

        Ok(reason)
    }

    /// Fills in trap and syscall detail for a stop and keeps the syscall
    /// entry/exit pairing state consistent.
    fn augment_stop_reason(&mut self, reason: &mut StopReason, status: WaitStatus) -> Result<()> {
        if matches!(status, WaitStatus::PtraceSyscall(_)) {
            let id = self.registers.read_by_id_as_u64(RegisterId::orig_rax)? as u16;

            let info = if self.expecting_syscall_exit {
                self.expecting_syscall_exit = false;
                SyscallInfo {
                    id,
                    entry: false,
                    data: SyscallData::Ret(
                        self.registers.read_by_id_as_u64(RegisterId::rax)? as i64
                    ),
                }
            } else {
                // SYSV ABI argument registers, in order
                const ARG_REGISTERS: [RegisterId; 6] = [
                    RegisterId::rdi,
                    RegisterId::rsi,
                    RegisterId::rdx,
                    RegisterId::r10,
                    RegisterId::r8,
                    RegisterId::r9,
                ];
                let mut args = [0u64; 6];
                for (slot, reg) in args.iter_mut().zip(ARG_REGISTERS) {
                    *slot = self.registers.read_by_id_as_u64(reg)?;
                }
                self.expecting_syscall_exit = true;
                SyscallInfo {
                    id,
                    entry: true,
                    data: SyscallData::Args(args),
                }
            };

            reason.syscall_info = Some(info);
            reason.info = Signal::SIGTRAP as i32;
            reason.trap_reason = Some(TrapType::Syscall);
            return Ok(());
        }

        // a user signal between syscall entry and exit must not
        // desynchronize the pairing
        self.expecting_syscall_exit = false;

        if reason.info == Signal::SIGTRAP as i32 {
            let siginfo = ptrace::getsiginfo(self.pid)
                .map_err(DebuggerError::kernel_call("failed to get signal info"))?;
            reason.trap_reason = Some(match siginfo.si_code {
                TRAP_TRACE => TrapType::SingleStep,
                SI_KERNEL => TrapType::SoftwareBreak,
                TRAP_HWBKPT => TrapType::HardwareBreak,
                code => {
                    trace!("unclassified SIGTRAP si_code: {code}");
                    TrapType::Unknown
                }
            });
        }
        Ok(())
    }

    /// Applies the `Some` catch policy: a syscall stop whose id is not in
    /// the allow-list is silently resumed and waited through.
    fn maybe_resume_from_syscall(&mut self, reason: StopReason) -> Result<StopReason> {
        if let SyscallCatchPolicy::Some(to_catch) = &self.syscall_catch_policy {
            if let Some(info) = &reason.syscall_info {
                if !to_catch.contains(&Sysno::from(i32::from(info.id))) {
                    self.resume()?;
                    return self.wait_on_signal();
                }
            }
        }
        Ok(reason)
    }

    /// Executes exactly one instruction.
    pub fn step_instruction(&mut self) -> Result<StopReason> {
        let pc = self.pc()?;
        let to_reenable = if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            let id = self.breakpoint_sites.get_by_address(pc)?.id();
            self.disable_breakpoint_site(id)?;
            Some(id)
        } else {
            None
        };

        ptrace::step(self.pid, None)
            .map_err(DebuggerError::kernel_call("could not single step"))?;
        let reason = self.wait_on_signal();

        if let Some(id) = to_reenable {
            self.enable_breakpoint_site(id)?;
        }
        reason
    }

    /// Refreshes the whole cached register image from the kernel.
    fn read_all_registers(&mut self) -> Result<()> {
        let gprs = ptrace::getregs(self.pid)
            .map_err(DebuggerError::kernel_call("could not read GPR registers"))?;
        self.registers.set_gprs(gprs);

        let fprs = ptrace::getregset::<ptrace::regset::NT_PRFPREG>(self.pid)
            .map_err(DebuggerError::kernel_call("could not read FPR registers"))?;
        self.registers.set_fprs(fprs);

        for n in 0..8 {
            let info = crate::register_info::register_info_by_id(RegisterId::dr(n));
            let data = ptrace::read_user(self.pid, info.offset as ptrace::AddressType)
                .map_err(DebuggerError::kernel_call("could not read debug register"))?;
            self.registers.set_debug_register(n, data as u64);
        }
        Ok(())
    }

    /// Bulk read of inferior memory, chunked at page boundaries for
    /// `process_vm_readv`.
    pub fn read_memory(&self, address: VirtAddr, amount: usize) -> Result<Vec<u8>> {
        let mut ret = vec![0u8; amount];

        let mut remote_descs = Vec::new();
        let mut addr = address;
        let mut remaining = amount;
        while remaining > 0 {
            let up_to_next_page = (PAGE_SIZE - (addr.addr() & (PAGE_SIZE - 1))) as usize;
            let chunk_size = remaining.min(up_to_next_page);
            remote_descs.push(RemoteIoVec {
                base: addr.addr() as usize,
                len: chunk_size,
            });
            remaining -= chunk_size;
            addr += chunk_size as u64;
        }

        let n_read = process_vm_readv(
            self.pid,
            &mut [IoSliceMut::new(&mut ret)],
            &remote_descs,
        )
        .map_err(DebuggerError::kernel_call("could not read process memory"))?;
        ret.truncate(n_read);
        Ok(ret)
    }

    /// Like [`Self::read_memory`], but with the bytes patched by enabled
    /// software breakpoints replaced by their saved originals.
    pub fn read_memory_without_traps(&self, address: VirtAddr, amount: usize) -> Result<Vec<u8>> {
        let mut memory = self.read_memory(address, amount)?;
        for site in self
            .breakpoint_sites
            .get_in_region(address, address + amount as u64)
        {
            if !site.is_enabled() || site.is_hardware() {
                continue;
            }
            if let Some(saved) = site.saved_byte() {
                let offset = (site.address().addr() - address.addr()) as usize;
                if offset < memory.len() {
                    memory[offset] = saved;
                }
            }
        }
        Ok(memory)
    }

    /// Reads one little-endian u64 from inferior memory.
    pub fn read_memory_as_u64(&self, address: VirtAddr) -> Result<u64> {
        let bytes = self.read_memory(address, 8)?;
        let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            DebuggerError::InvalidArgument(format!("short read of 8 bytes at {address}"))
        })?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Writes arbitrary bytes to inferior memory.
    ///
    /// `PTRACE_POKEDATA` is word granular, so partial leading and trailing
    /// words are merged with a prior read of the surrounding bytes.
    pub fn write_memory(&mut self, address: VirtAddr, data: &[u8]) -> Result<()> {
        let mut written = 0usize;
        while written < data.len() {
            let remaining = data.len() - written;
            let mut word = [0u8; WORD_BYTES];
            if remaining >= WORD_BYTES {
                word.copy_from_slice(&data[written..written + WORD_BYTES]);
            } else {
                let existing = self.read_memory(address + written, WORD_BYTES)?;
                if existing.len() < WORD_BYTES {
                    return Err(DebuggerError::InvalidArgument(format!(
                        "short read while merging partial word at {}",
                        address + written
                    )));
                }
                word[..remaining].copy_from_slice(&data[written..]);
                word[remaining..].copy_from_slice(&existing[remaining..]);
            }

            ptrace::write(
                self.pid,
                (address + written).raw_pointer(),
                i64::from_le_bytes(word),
            )
            .map_err(DebuggerError::kernel_call("failed to write memory"))?;
            written += WORD_BYTES;
        }
        Ok(())
    }

    fn peek_word(&self, address: VirtAddr) -> Result<i64> {
        ptrace::read(self.pid, address.raw_pointer())
            .map_err(DebuggerError::kernel_call("could not peek data"))
    }

    fn poke_byte(&mut self, address: VirtAddr, byte: u8) -> Result<()> {
        let word = self.peek_word(address)?;
        let patched = (word & !0xff) | i64::from(byte);
        ptrace::write(self.pid, address.raw_pointer(), patched)
            .map_err(DebuggerError::kernel_call("could not poke data"))
    }

    fn next_stoppoint_id(&mut self) -> StoppointId {
        self.next_stoppoint_id += 1;
        self.next_stoppoint_id
    }

    /// Registers a new, disabled breakpoint site.
    pub fn create_breakpoint_site(
        &mut self,
        address: VirtAddr,
        hardware: bool,
        internal: bool,
    ) -> Result<&mut BreakpointSite> {
        if self.breakpoint_sites.contains_address(address) {
            return Err(DebuggerError::InvalidArgument(format!(
                "breakpoint site already created at address {address}"
            )));
        }
        let id = self.next_stoppoint_id();
        Ok(self
            .breakpoint_sites
            .push(BreakpointSite::new(id, address, hardware, internal)))
    }

    /// Arms a breakpoint site.
    ///
    /// Enable is transactional: when patching or slot allocation fails the
    /// site stays observably disabled.
    pub fn enable_breakpoint_site(&mut self, id: StoppointId) -> Result<()> {
        let site = self.breakpoint_sites.get_by_id(id)?;
        if site.is_enabled() {
            return Ok(());
        }
        let address = site.address();

        if site.is_hardware() {
            let slot = self.set_hardware_stoppoint(address, StoppointMode::Execute, 1)?;
            let site = self.breakpoint_sites.get_by_id_mut(id)?;
            site.set_hardware_slot(Some(slot));
            site.set_enabled(true);
        } else {
            let word = self.peek_word(address)?;
            let saved = (word & 0xff) as u8;
            self.poke_byte(address, INT3_BYTE)?;
            let site = self.breakpoint_sites.get_by_id_mut(id)?;
            site.set_saved_byte(Some(saved));
            site.set_enabled(true);
        }
        Ok(())
    }

    /// Disarms a breakpoint site, restoring the patched byte or releasing
    /// the debug register slot.
    pub fn disable_breakpoint_site(&mut self, id: StoppointId) -> Result<()> {
        let site = self.breakpoint_sites.get_by_id(id)?;
        if !site.is_enabled() {
            return Ok(());
        }
        let address = site.address();

        if let Some(slot) = site.hardware_slot() {
            self.clear_hardware_stoppoint(slot)?;
            let site = self.breakpoint_sites.get_by_id_mut(id)?;
            site.set_hardware_slot(None);
            site.set_enabled(false);
        } else {
            let saved = site
                .saved_byte()
                .ok_or(DebuggerError::InvalidStoppoint("with no saved byte"))?;
            self.poke_byte(address, saved)?;
            let site = self.breakpoint_sites.get_by_id_mut(id)?;
            site.set_saved_byte(None);
            site.set_enabled(false);
        }
        Ok(())
    }

    /// Disables and erases a breakpoint site.
    pub fn remove_breakpoint_site_by_id(&mut self, id: StoppointId) -> Result<()> {
        self.disable_breakpoint_site(id)?;
        self.breakpoint_sites.remove_by_id(id)?;
        Ok(())
    }

    pub fn remove_breakpoint_site_by_address(&mut self, address: VirtAddr) -> Result<()> {
        let id = self.breakpoint_sites.get_by_address(address)?.id();
        self.remove_breakpoint_site_by_id(id)
    }

    /// Registers a new, disabled watchpoint and takes its first data
    /// snapshot.
    pub fn create_watchpoint(
        &mut self,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<&mut Watchpoint> {
        if self.watchpoints.contains_address(address) {
            return Err(DebuggerError::InvalidArgument(format!(
                "watchpoint already created at address {address}"
            )));
        }
        let id = self.next_stoppoint_id();
        self.watchpoints
            .push(Watchpoint::new(id, address, mode, size)?);
        self.update_watchpoint_data(id)?;
        self.watchpoints.get_by_id_mut(id)
    }

    pub fn enable_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        let watchpoint = self.watchpoints.get_by_id(id)?;
        if watchpoint.is_enabled() {
            return Ok(());
        }
        let (address, mode, size) = (
            watchpoint.address(),
            watchpoint.mode(),
            watchpoint.size(),
        );

        let slot = self.set_hardware_stoppoint(address, mode, size)?;
        let watchpoint = self.watchpoints.get_by_id_mut(id)?;
        watchpoint.set_hardware_slot(Some(slot));
        watchpoint.set_enabled(true);
        Ok(())
    }

    pub fn disable_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        let watchpoint = self.watchpoints.get_by_id(id)?;
        if !watchpoint.is_enabled() {
            return Ok(());
        }
        let slot = watchpoint
            .hardware_slot()
            .ok_or(DebuggerError::InvalidStoppoint("with no hardware slot"))?;

        self.clear_hardware_stoppoint(slot)?;
        let watchpoint = self.watchpoints.get_by_id_mut(id)?;
        watchpoint.set_hardware_slot(None);
        watchpoint.set_enabled(false);
        Ok(())
    }

    /// Disables and erases a watchpoint.
    pub fn remove_watchpoint_by_id(&mut self, id: StoppointId) -> Result<()> {
        self.disable_watchpoint(id)?;
        self.watchpoints.remove_by_id(id)?;
        Ok(())
    }

    pub fn remove_watchpoint_by_address(&mut self, address: VirtAddr) -> Result<()> {
        let id = self.watchpoints.get_by_address(address)?.id();
        self.remove_watchpoint_by_id(id)
    }

    /// Refreshes a watchpoint's before/after data snapshot.
    pub fn update_watchpoint_data(&mut self, id: StoppointId) -> Result<()> {
        let watchpoint = self.watchpoints.get_by_id(id)?;
        let (address, size) = (watchpoint.address(), watchpoint.size());

        let bytes = self.read_memory(address, size)?;
        let mut word = [0u8; 8];
        let n = bytes.len().min(8);
        word[..n].copy_from_slice(&bytes[..n]);

        self.watchpoints
            .get_by_id_mut(id)?
            .push_data(u64::from_le_bytes(word));
        Ok(())
    }

    /// Claims a free debug register slot and programs it.
    ///
    /// Slots are a pool of four shared between hardware breakpoints and
    /// watchpoints; exhaustion is an error.
    fn set_hardware_stoppoint(
        &mut self,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<usize> {
        let control = self.registers.read_by_id_as_u64(RegisterId::dr7)?;
        let slot = find_free_stoppoint_register(control)?;

        self.registers.write_by_id(
            RegisterId::dr(slot),
            RegisterValue::U64(address.addr()),
        )?;

        let masked = encode_dr7(control, slot, mode, size)?;
        self.registers
            .write_by_id(RegisterId::dr7, RegisterValue::U64(masked))?;
        Ok(slot)
    }

    /// Releases a debug register slot.
    fn clear_hardware_stoppoint(&mut self, slot: usize) -> Result<()> {
        self.registers
            .write_by_id(RegisterId::dr(slot), RegisterValue::U64(0))?;
        let control = self.registers.read_by_id_as_u64(RegisterId::dr7)?;
        let masked = control & !dr7_slot_mask(slot);
        self.registers
            .write_by_id(RegisterId::dr7, RegisterValue::U64(masked))
    }

    /// Identifies which hardware stoppoint fired, via the DR6 status bits.
    pub fn get_current_hardware_stoppoint(&self) -> Result<HardwareStoppoint> {
        let status = self.registers.read_by_id_as_u64(RegisterId::dr6)?;
        let slot = status.trailing_zeros() as usize;
        if slot >= 4 {
            return Err(DebuggerError::InvalidArgument(
                "no hardware debug register has fired".to_string(),
            ));
        }

        let address = VirtAddr::new(self.registers.read_by_id_as_u64(RegisterId::dr(slot))?);
        if self.breakpoint_sites.contains_address(address) {
            Ok(HardwareStoppoint::Breakpoint(
                self.breakpoint_sites.get_by_address(address)?.id(),
            ))
        } else {
            Ok(HardwareStoppoint::Watchpoint(
                self.watchpoints.get_by_address(address)?.id(),
            ))
        }
    }

    /// Reads the auxiliary vector from procfs.
    pub fn get_auxv(&self) -> Result<HashMap<u64, u64>> {
        let bytes = std::fs::read(format!("/proc/{}/auxv", self.pid))?;
        let mut auxv = HashMap::new();
        for pair in bytes.chunks_exact(16) {
            let id = u64::from_le_bytes(pair[..8].try_into().unwrap());
            if id == AT_NULL {
                break;
            }
            let value = u64::from_le_bytes(pair[8..].try_into().unwrap());
            auxv.insert(id, value);
        }
        Ok(auxv)
    }
}

impl Drop for Inferior {
    fn drop(&mut self) {
        if self.pid.as_raw() == 0 {
            return;
        }

        if self.is_attached {
            if self.state == ProcState::Running {
                let _ = kill(self.pid, Signal::SIGSTOP);
                let _ = waitpid(self.pid, None);
            }
            let _ = ptrace::detach(self.pid, None);
            let _ = kill(self.pid, Signal::SIGCONT);
        }

        if self.terminate_on_end {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

/// Child-side setup between fork and exec. Only returns on failure.
fn exec_inferior(
    path: &Path,
    debug: bool,
    stdout_replacement: Option<OwnedFd>,
) -> Result<std::convert::Infallible> {
    // isolate signal delivery from the tracer's process group
    setpgid(Pid::from_raw(0), Pid::from_raw(0))
        .map_err(DebuggerError::kernel_call("could not set pgid"))?;

    personality::set(Persona::ADDR_NO_RANDOMIZE)
        .map_err(DebuggerError::kernel_call("could not disable ASLR"))?;

    if let Some(fd) = stdout_replacement {
        nix::unistd::dup2_stdout(fd)
            .map_err(DebuggerError::kernel_call("stdout replacement failed"))?;
    }

    if debug {
        ptrace::traceme().map_err(DebuggerError::kernel_call("tracing failed"))?;
    }

    let program = CString::new(path.as_os_str().as_encoded_bytes())?;
    execvp(&program, &[program.clone()])
        .map_err(DebuggerError::kernel_call("exec failed"))
}

fn find_free_stoppoint_register(control: u64) -> Result<usize> {
    // each slot owns two enable bits (local, global)
    for slot in 0..4 {
        if control & (0b11 << (slot * 2)) == 0 {
            return Ok(slot);
        }
    }
    Err(DebuggerError::OutOfHardwareRegisters)
}

/// Bits DR7 dedicates to one slot: the enable pair plus the mode/size group.
fn dr7_slot_mask(slot: usize) -> u64 {
    (0b11 << (slot * 2)) | (0b1111 << (slot * 4 + 16))
}

/// Programs one DR7 slot: clear its bit group, then set enable, mode and
/// size.
fn encode_dr7(control: u64, slot: usize, mode: StoppointMode, size: usize) -> Result<u64> {
    let mode_flag: u64 = match mode {
        StoppointMode::Write => 0b01,
        StoppointMode::ReadWrite => 0b11,
        StoppointMode::Execute => 0b00,
    };
    let size_flag: u64 = match size {
        1 => 0b00,
        2 => 0b01,
        4 => 0b11,
        8 => 0b10,
        _ => {
            return Err(DebuggerError::InvalidArgument(format!(
                "invalid hardware stoppoint size: {size}"
            )))
        }
    };
    if mode == StoppointMode::Execute && size != 1 {
        return Err(DebuggerError::InvalidArgument(
            "execution stoppoints must have size 1".to_string(),
        ));
    }

    let enable_bit = 1u64 << (slot * 2);
    let mode_bits = mode_flag << (slot * 4 + 16);
    let size_bits = size_flag << (slot * 4 + 18);
    Ok((control & !dr7_slot_mask(slot)) | enable_bit | mode_bits | size_bits)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_free_stoppoint_register() {
        assert_eq!(find_free_stoppoint_register(0).unwrap(), 0);
        assert_eq!(find_free_stoppoint_register(0b01).unwrap(), 1);
        assert_eq!(find_free_stoppoint_register(0b0101_0101).unwrap_or(4), 4);
        assert_eq!(find_free_stoppoint_register(0b0101_0001).unwrap(), 1);
        assert!(matches!(
            find_free_stoppoint_register(0b1111_1111),
            Err(DebuggerError::OutOfHardwareRegisters)
        ));
    }

    #[test]
    fn test_encode_dr7_slot_zero_write_four_bytes() {
        let dr7 = encode_dr7(0, 0, StoppointMode::Write, 4).unwrap();
        // local enable, mode 01 at bits 16..17, size 11 at bits 18..19
        assert_eq!(dr7, 0b1101_0000_0000_0000_0001);
    }

    #[test]
    fn test_encode_dr7_clears_previous_group() {
        let old = encode_dr7(0, 1, StoppointMode::ReadWrite, 8).unwrap();
        let new = encode_dr7(old, 1, StoppointMode::Execute, 1).unwrap();
        assert_eq!(new & (0b1111 << 20), 0);
        assert_eq!(new & (0b11 << 2), 0b01 << 2);
    }

    #[test]
    fn test_encode_dr7_rejects_wide_execute() {
        assert!(encode_dr7(0, 0, StoppointMode::Execute, 8).is_err());
        assert!(encode_dr7(0, 0, StoppointMode::Write, 3).is_err());
    }

    #[test]
    fn test_dr7_slot_mask() {
        assert_eq!(dr7_slot_mask(0), 0b1111_0000_0000_0000_0011);
        assert_eq!(dr7_slot_mask(3), (0b1111 << 28) | (0b11 << 6));
    }

    #[test]
    fn test_stop_reason_decoding() {
        let pid = Pid::from_raw(1234);
        let exited = StopReason::from_wait_status(WaitStatus::Exited(pid, 3));
        assert_eq!(exited.reason, ProcState::Exited);
        assert_eq!(exited.info, 3);

        let signaled =
            StopReason::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false));
        assert_eq!(signaled.reason, ProcState::Terminated);
        assert_eq!(signaled.info, Signal::SIGKILL as i32);

        let syscall = StopReason::from_wait_status(WaitStatus::PtraceSyscall(pid));
        assert_eq!(syscall.reason, ProcState::Stopped);
        assert_eq!(syscall.info, Signal::SIGTRAP as i32);
    }
}
