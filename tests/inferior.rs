//! Process control tests against real inferiors.
//!
//! These launch small coreutils programs (`yes`, `true`) so they need no
//! purpose-built targets; endless inferiors get their stdout pointed at
//! /dev/null.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use burrow::inferior::{Inferior, ProcState, SyscallCatchPolicy, TrapType};
use burrow::register_info::RegisterId;
use burrow::registers::RegisterValue;
use burrow::stoppoint::{Stoppoint, StoppointMode};
use nix::unistd::Pid;

fn find_program(name: &str) -> PathBuf {
    std::env::split_paths(&std::env::var_os("PATH").expect("PATH is not set"))
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| panic!("{name} not found in PATH"))
}

fn dev_null() -> OwnedFd {
    OwnedFd::from(File::create("/dev/null").unwrap())
}

/// Launches `yes` with stdout discarded; runs until killed.
fn launch_endless(debug: bool) -> Inferior {
    Inferior::launch(find_program("yes"), debug, Some(dev_null())).unwrap()
}

fn process_exists(pid: Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

/// The status character from `/proc/<pid>/stat`.
fn get_process_status(pid: Pid) -> char {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap();
    let index_of_last_parenthesis = stat.rfind(')').unwrap();
    stat.chars().nth(index_of_last_parenthesis + 2).unwrap()
}

#[test]
fn launch_succeeds() {
    let inferior = launch_endless(true);
    assert!(process_exists(inferior.pid()));
}

#[test]
fn launch_no_such_program_fails() {
    let result = Inferior::launch("you_do_not_have_to_be_good", true, None);
    let error = result.err().expect("launching a missing program must fail");
    assert!(
        error.to_string().contains("exec"),
        "expected an exec error, got: {error}"
    );
}

#[test]
fn attach_halts_the_target() {
    let target = launch_endless(false);
    let _inferior = Inferior::attach(target.pid().as_raw()).unwrap();
    assert_eq!(get_process_status(target.pid()), 't');
}

#[test]
fn attach_invalid_pid_fails() {
    assert!(Inferior::attach(0).is_err());
}

#[test]
fn resume_progresses_launched_inferior() {
    let mut inferior = launch_endless(true);
    inferior.resume().unwrap();
    let status = get_process_status(inferior.pid());
    assert!(status == 'R' || status == 'S', "unexpected status {status}");
}

#[test]
fn resume_progresses_attached_inferior() {
    let target = launch_endless(false);
    let mut inferior = Inferior::attach(target.pid().as_raw()).unwrap();
    inferior.resume().unwrap();
    let status = get_process_status(inferior.pid());
    assert!(status == 'R' || status == 'S', "unexpected status {status}");
}

#[test]
fn resume_after_exit_fails() {
    let mut inferior = Inferior::launch(find_program("true"), true, None).unwrap();
    inferior.resume().unwrap();
    let reason = inferior.wait_on_signal().unwrap();
    assert_eq!(reason.reason, ProcState::Exited);
    assert_eq!(reason.info, 0);
    assert!(inferior.resume().is_err());
}

#[test]
fn register_write_round_trips_through_the_kernel() {
    let mut inferior = launch_endless(true);

    inferior
        .registers_mut()
        .write_by_id(RegisterId::r13, RegisterValue::U64(0xcafe_cafe))
        .unwrap();
    // a single step refreshes the cache from the kernel
    let reason = inferior.step_instruction().unwrap();
    assert_eq!(reason.reason, ProcState::Stopped);
    assert_eq!(
        inferior.registers().read_by_id(RegisterId::r13),
        RegisterValue::U64(0xcafe_cafe)
    );
}

#[test]
fn sub_register_write_preserves_surrounding_bits() {
    let mut inferior = launch_endless(true);
    let registers = inferior.registers_mut();

    registers
        .write_by_id(RegisterId::rax, RegisterValue::U64(0x1122_3344_5566_7788))
        .unwrap();
    registers
        .write_by_id(RegisterId::al, RegisterValue::U8(0xff))
        .unwrap();
    assert_eq!(
        registers.read_by_id(RegisterId::rax),
        RegisterValue::U64(0x1122_3344_5566_77ff)
    );

    registers
        .write_by_id(RegisterId::ah, RegisterValue::U8(0x42))
        .unwrap();
    assert_eq!(
        registers.read_by_id(RegisterId::rax),
        RegisterValue::U64(0x1122_3344_5566_42ff)
    );
}

#[test]
fn fpu_register_write_round_trips_through_the_kernel() {
    let mut inferior = launch_endless(true);

    inferior
        .registers_mut()
        .write_by_id(RegisterId::fsw, RegisterValue::U16(0b0011_1000_0000_0000))
        .unwrap();
    inferior
        .registers_mut()
        .write_by_id(
            RegisterId::mm0,
            RegisterValue::Byte64([0x11, 0xba, 0x5e, 0xba, 0, 0, 0, 0]),
        )
        .unwrap();

    inferior.step_instruction().unwrap();

    assert_eq!(
        inferior.registers().read_by_id(RegisterId::fsw),
        RegisterValue::U16(0b0011_1000_0000_0000)
    );
    assert_eq!(
        inferior.registers().read_by_id(RegisterId::mm0),
        RegisterValue::Byte64([0x11, 0xba, 0x5e, 0xba, 0, 0, 0, 0])
    );
}

#[test]
fn memory_write_round_trips() {
    let mut inferior = launch_endless(true);
    // the word at the stack pointer holds argc; safe scratch space while
    // the inferior is held stopped
    let rsp = inferior
        .registers()
        .read_by_id_as_u64(RegisterId::rsp)
        .unwrap();
    let address = burrow::VirtAddr::new(rsp);

    let payload = b"Hello, world!";
    inferior.write_memory(address, payload).unwrap();
    let read_back = inferior.read_memory(address, payload.len()).unwrap();
    assert_eq!(read_back, payload);
}

#[test]
fn watchpoint_alignment_is_enforced() {
    let mut inferior = launch_endless(true);
    let result = inferior.create_watchpoint(
        burrow::VirtAddr::new(0x1001),
        StoppointMode::Write,
        4,
    );
    assert!(matches!(
        result,
        Err(burrow::DebuggerError::InvalidArgument(_))
    ));
}

#[test]
fn hardware_slot_budget_is_four() {
    let mut inferior = launch_endless(true);
    let rsp = inferior
        .registers()
        .read_by_id_as_u64(RegisterId::rsp)
        .unwrap();
    let base = burrow::VirtAddr::new(rsp & !7);

    let mut ids = Vec::new();
    for i in 0..4u64 {
        let id = inferior
            .create_watchpoint(base + i * 8, StoppointMode::ReadWrite, 8)
            .unwrap()
            .id();
        inferior.enable_watchpoint(id).unwrap();
        ids.push(id);
    }

    // the pool is shared with hardware breakpoints
    let bp_id = inferior
        .create_breakpoint_site(base + 64u64, true, false)
        .unwrap()
        .id();
    assert!(matches!(
        inferior.enable_breakpoint_site(bp_id),
        Err(burrow::DebuggerError::OutOfHardwareRegisters)
    ));
    let site = inferior.breakpoint_sites().get_by_id(bp_id).unwrap();
    assert!(!site.is_enabled(), "a failed enable must leave the site disabled");

    // freeing any slot makes the fifth stoppoint fit
    inferior.remove_watchpoint_by_id(ids[1]).unwrap();
    inferior.enable_breakpoint_site(bp_id).unwrap();
}

#[test]
fn watchpoint_snapshots_memory() {
    let mut inferior = launch_endless(true);
    let rsp = inferior
        .registers()
        .read_by_id_as_u64(RegisterId::rsp)
        .unwrap();
    let address = burrow::VirtAddr::new(rsp & !7);
    let expected = inferior.read_memory_as_u64(address).unwrap();

    let id = inferior
        .create_watchpoint(address, StoppointMode::ReadWrite, 8)
        .unwrap()
        .id();
    let watchpoint = inferior.watchpoints().get_by_id(id).unwrap();
    assert_eq!(watchpoint.data(), expected);

    inferior.enable_watchpoint(id).unwrap();
    let dr7 = inferior
        .registers()
        .read_by_id_as_u64(RegisterId::dr7)
        .unwrap();
    assert_ne!(dr7 & 0b1111_1111, 0, "an enable bit must be set in DR7");
}

#[test]
fn syscall_catch_all_pairs_entries_and_exits() {
    let mut inferior = launch_endless(true);
    inferior.set_syscall_catch_policy(SyscallCatchPolicy::All);

    inferior.resume().unwrap();
    let entry = inferior.wait_on_signal().unwrap();
    assert_eq!(entry.trap_reason, Some(TrapType::Syscall));
    let entry_info = entry.syscall_info.unwrap();
    assert!(entry_info.entry);

    inferior.resume().unwrap();
    let exit = inferior.wait_on_signal().unwrap();
    assert_eq!(exit.trap_reason, Some(TrapType::Syscall));
    let exit_info = exit.syscall_info.unwrap();
    assert!(!exit_info.entry);
    assert_eq!(exit_info.id, entry_info.id);
}

#[test]
fn syscall_catch_some_filters_other_syscalls() {
    let mut inferior = launch_endless(true);
    let write_id = burrow::syscalls::syscall_name_to_id("write").unwrap();
    inferior.set_syscall_catch_policy(SyscallCatchPolicy::Some(vec![write_id]));

    inferior.resume().unwrap();
    let reason = inferior.wait_on_signal().unwrap();
    assert_eq!(reason.trap_reason, Some(TrapType::Syscall));
    let info = reason.syscall_info.unwrap();
    assert!(info.entry);
    assert_eq!(i32::from(info.id), write_id as i32);
}
