//! The dispatch loop binding a UI to one [`Target`], plus the formatters
//! that turn stop reasons, registers and memory into text.

use tracing::error;

use crate::addr::VirtAddr;
use crate::disassemble;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::inferior::{ProcState, StopReason, SyscallData};
use crate::register_info::{register_info_by_id, RegisterType, REGISTER_INFOS};
use crate::stoppoint::{Stoppoint, StoppointMode};
use crate::syscalls::syscall_id_to_name;
use crate::target::Target;
use crate::ui::{DebuggerUI, Status};

pub struct Debugger<UI: DebuggerUI> {
    target: Target,
    ui: UI,
}

impl<UI: DebuggerUI> Debugger<UI> {
    pub fn new(target: Target, ui: UI) -> Self {
        Self { target, ui }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut feedback = Feedback::Ok;
        loop {
            let status = match self.ui.process(&feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(status) => status,
            };

            if matches!(status, Status::DebuggerQuit) {
                break;
            }

            feedback = match self.dispatch(status) {
                Ok(f) => f,
                Err(e) => Feedback::Error(e),
            };
        }
        Ok(())
    }

    fn dispatch(&mut self, status: Status) -> Result<Feedback> {
        match status {
            Status::Continue => {
                self.target.inferior_mut().resume()?;
                let reason = self.target.inferior_mut().wait_on_signal()?;
                self.stop_feedback(&reason)
            }
            Status::StepInstruction => {
                let reason = self.target.inferior_mut().step_instruction()?;
                self.stop_feedback(&reason)
            }
            Status::RegisterReadAll => Ok(self.read_registers(true)),
            Status::RegisterRead(None) => Ok(self.read_registers(false)),
            Status::RegisterRead(Some(id)) => {
                let info = register_info_by_id(id);
                let value = self.target.inferior().registers().read(info);
                Ok(Feedback::Registers(vec![(info.name, value.to_string())]))
            }
            Status::RegisterWrite(id, value) => {
                self.target
                    .inferior_mut()
                    .registers_mut()
                    .write_by_id(id, value)?;
                Ok(Feedback::Ok)
            }
            Status::MemoryRead(address, n_bytes) => {
                let data = self.target.inferior().read_memory(address, n_bytes)?;
                Ok(Feedback::Text(format_memory(address, &data)))
            }
            Status::MemoryWrite(address, bytes) => {
                self.target.inferior_mut().write_memory(address, &bytes)?;
                Ok(Feedback::Ok)
            }
            Status::BreakpointList => Ok(Feedback::Text(self.list_breakpoints())),
            Status::BreakpointSet(address, hardware) => {
                let id = self
                    .target
                    .inferior_mut()
                    .create_breakpoint_site(address, hardware, false)?
                    .id();
                self.target.inferior_mut().enable_breakpoint_site(id)?;
                Ok(Feedback::Text(format!(
                    "created breakpoint site {id} at {address}"
                )))
            }
            Status::BreakpointEnable(id) => {
                self.target.inferior_mut().enable_breakpoint_site(id)?;
                Ok(Feedback::Ok)
            }
            Status::BreakpointDisable(id) => {
                self.target.inferior_mut().disable_breakpoint_site(id)?;
                Ok(Feedback::Ok)
            }
            Status::BreakpointDelete(id) => {
                self.target.inferior_mut().remove_breakpoint_site_by_id(id)?;
                Ok(Feedback::Ok)
            }
            Status::WatchpointList => Ok(Feedback::Text(self.list_watchpoints())),
            Status::WatchpointSet(address, mode, size) => {
                let id = self
                    .target
                    .inferior_mut()
                    .create_watchpoint(address, mode, size)?
                    .id();
                self.target.inferior_mut().enable_watchpoint(id)?;
                Ok(Feedback::Text(format!(
                    "created watchpoint {id} at {address}"
                )))
            }
            Status::WatchpointEnable(id) => {
                self.target.inferior_mut().enable_watchpoint(id)?;
                Ok(Feedback::Ok)
            }
            Status::WatchpointDisable(id) => {
                self.target.inferior_mut().disable_watchpoint(id)?;
                Ok(Feedback::Ok)
            }
            Status::WatchpointDelete(id) => {
                self.target.inferior_mut().remove_watchpoint_by_id(id)?;
                Ok(Feedback::Ok)
            }
            Status::CatchSyscalls(policy) => {
                self.target.inferior_mut().set_syscall_catch_policy(policy);
                Ok(Feedback::Ok)
            }
            Status::Disassemble(address, n_instructions) => {
                let instructions =
                    disassemble::disassemble(self.target.inferior(), n_instructions, address)?;
                let text = instructions
                    .iter()
                    .map(|instruction| format!("{:#018x}: {}", instruction.addr.addr(), instruction.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(Feedback::Text(text))
            }
            Status::DebuggerQuit => Ok(Feedback::Ok),
        }
    }

    fn stop_feedback(&self, reason: &StopReason) -> Result<Feedback> {
        if reason.reason == ProcState::Exited {
            return Ok(Feedback::Exit(reason.info));
        }
        Ok(Feedback::Text(self.format_stop_reason(reason)?))
    }

    fn format_stop_reason(&self, reason: &StopReason) -> Result<String> {
        let pid = self.target.inferior().pid();
        let msg = match reason.reason {
            ProcState::Exited => format!("exited with status {}", reason.info),
            ProcState::Terminated => {
                format!("terminated with signal {}", signal_name(reason.info))
            }
            ProcState::Running => "running".to_string(),
            ProcState::Stopped => {
                let pc = self.target.inferior().pc()?;
                let mut msg =
                    format!("stopped with signal {} at {pc}", signal_name(reason.info));

                if let Some(symbol) = self.target.elf().get_symbol_containing_virt_addr(pc) {
                    let name = self.target.elf().get_string(symbol.st_name as usize);
                    if !name.is_empty() {
                        msg.push_str(&format!(" in {name}"));
                    }
                }

                if let Some(info) = &reason.syscall_info {
                    let name = syscall_id_to_name(u64::from(info.id))
                        .unwrap_or("unknown");
                    match info.data {
                        SyscallData::Args(args) => {
                            let args = args
                                .iter()
                                .map(|arg| format!("{arg:#x}"))
                                .collect::<Vec<_>>()
                                .join(", ");
                            msg.push_str(&format!("\nsyscall entry: {name}({args})"));
                        }
                        SyscallData::Ret(ret) => {
                            msg.push_str(&format!("\nsyscall exit: {name} returned {ret:#x}"));
                        }
                    }
                }
                msg
            }
        };
        Ok(format!("Process {pid} {msg}"))
    }

    fn read_registers(&self, all: bool) -> Feedback {
        let registers = self.target.inferior().registers();
        let mut out = Vec::new();
        for info in REGISTER_INFOS {
            let should_print =
                (all || info.reg_type == RegisterType::Gpr) && info.name != "orig_rax";
            if !should_print {
                continue;
            }
            out.push((info.name, registers.read(info).to_string()));
        }
        Feedback::Registers(out)
    }

    fn list_breakpoints(&self) -> String {
        let sites = self.target.inferior().breakpoint_sites();
        let mut lines = Vec::new();
        sites.for_each(|site| {
            if site.is_internal() {
                return;
            }
            lines.push(format!(
                "{}: address = {}, {}{}",
                site.id(),
                site.address(),
                if site.is_hardware() { "hardware, " } else { "" },
                if site.is_enabled() { "enabled" } else { "disabled" },
            ));
        });

        if lines.is_empty() {
            "no breakpoints set".to_string()
        } else {
            format!("current breakpoints:\n{}", lines.join("\n"))
        }
    }

    fn list_watchpoints(&self) -> String {
        let watchpoints = self.target.inferior().watchpoints();
        let mut lines = Vec::new();
        watchpoints.for_each(|watchpoint| {
            lines.push(format!(
                "{}: address = {}, mode = {}, size = {}, {}",
                watchpoint.id(),
                watchpoint.address(),
                mode_name(watchpoint.mode()),
                watchpoint.size(),
                if watchpoint.is_enabled() {
                    "enabled"
                } else {
                    "disabled"
                },
            ));
        });

        if lines.is_empty() {
            "no watchpoints set".to_string()
        } else {
            format!("current watchpoints:\n{}", lines.join("\n"))
        }
    }
}

fn mode_name(mode: StoppointMode) -> &'static str {
    match mode {
        StoppointMode::Write => "write",
        StoppointMode::ReadWrite => "read_write",
        StoppointMode::Execute => "execute",
    }
}

fn signal_name(info: i32) -> String {
    nix::sys::signal::Signal::try_from(info)
        .map_or_else(|_| format!("signal {info}"), |signal| signal.to_string())
}

fn format_memory(address: VirtAddr, data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(i, row)| {
            let bytes = row
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{:#016x}: {bytes}", address.addr() + i as u64 * 16)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_memory() {
        let data: Vec<u8> = (0..18).collect();
        let text = format_memory(VirtAddr::new(0x1000), &data);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0x00000000001000: 00 01"));
        assert!(lines[1].starts_with("0x00000000001010: 10 11"));
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(5), "SIGTRAP");
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(4242), "signal 4242");
    }
}
