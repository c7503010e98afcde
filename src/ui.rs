use crate::addr::VirtAddr;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::inferior::SyscallCatchPolicy;
use crate::register_info::RegisterId;
use crate::registers::RegisterValue;
use crate::stoppoint::{StoppointId, StoppointMode};

pub mod cli;

/// A command the UI asks the debugger to carry out.
pub enum Status {
    Continue,
    StepInstruction,
    RegisterReadAll,
    /// `None` reads the general purpose summary
    RegisterRead(Option<RegisterId>),
    RegisterWrite(RegisterId, RegisterValue),
    MemoryRead(VirtAddr, usize),
    MemoryWrite(VirtAddr, Vec<u8>),
    BreakpointList,
    /// address, hardware?
    BreakpointSet(VirtAddr, bool),
    BreakpointEnable(StoppointId),
    BreakpointDisable(StoppointId),
    BreakpointDelete(StoppointId),
    WatchpointList,
    WatchpointSet(VirtAddr, StoppointMode, usize),
    WatchpointEnable(StoppointId),
    WatchpointDisable(StoppointId),
    WatchpointDelete(StoppointId),
    CatchSyscalls(SyscallCatchPolicy),
    Disassemble(Option<VirtAddr>, usize),
    DebuggerQuit,
}

pub trait DebuggerUI {
    fn process(&mut self, feedback: &Feedback) -> Result<Status>;
}
