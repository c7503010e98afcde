//! Target-level tests: ELF parsing of real binaries, load-bias translation
//! and the breakpoint engine driven end to end.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use burrow::addr::FileAddr;
use burrow::consts::INT3_BYTE;
use burrow::elf::Elf;
use burrow::inferior::{ProcState, TrapType};
use burrow::stoppoint::Stoppoint;
use burrow::target::Target;

fn find_program(name: &str) -> PathBuf {
    std::env::split_paths(&std::env::var_os("PATH").expect("PATH is not set"))
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| panic!("{name} not found in PATH"))
}

fn dev_null() -> OwnedFd {
    OwnedFd::from(File::create("/dev/null").unwrap())
}

fn launch_yes() -> Target {
    Target::launch(find_program("yes"), Some(dev_null())).unwrap()
}

#[test]
fn parses_own_test_binary() {
    let exe = std::env::current_exe().unwrap();
    let elf = Elf::open(&exe).unwrap();

    assert_eq!(&elf.header().e_ident[..4], b"\x7fELF");
    assert!(elf.get_section(".text").is_some());
    // the C-ABI entry shim keeps an unmangled `main` around
    assert!(!elf.get_symbols_by_name("main").is_empty());
}

#[test]
fn launch_derives_load_bias() {
    let target = launch_yes();
    let entry = target.entry_point().expect("entry must be in a section");

    let elf = target.elf();
    assert!(elf.get_section_containing_virt_addr(entry).is_some());

    // property: for any file address in a loaded section,
    // to_virt().to_file() is the identity
    let file_entry = FileAddr::new(elf, elf.header().e_entry);
    let round_trip = file_entry
        .to_virt_addr()
        .unwrap()
        .to_file_addr(elf)
        .unwrap();
    assert_eq!(round_trip, file_entry);
}

#[test]
fn attach_builds_target_from_procfs() {
    let held = burrow::Inferior::launch(find_program("yes"), false, Some(dev_null())).unwrap();
    let target = Target::attach(held.pid().as_raw()).unwrap();
    assert_eq!(target.inferior().state(), ProcState::Stopped);
    assert!(target.entry_point().is_some());
}

#[test]
fn entry_bytes_match_the_file_image() {
    let target = launch_yes();
    let entry = target.entry_point().unwrap();

    let memory = target.inferior().read_memory(entry, 8).unwrap();

    let elf = target.elf();
    let file_entry = FileAddr::new(elf, elf.header().e_entry);
    let offset = elf.file_addr_to_file_offset(file_entry).unwrap().off() as usize;
    let image = std::fs::read(elf.path()).unwrap();
    assert_eq!(memory, image[offset..offset + 8]);
}

#[test]
fn software_breakpoint_fires_at_entry_with_rewound_pc() {
    let mut target = launch_yes();
    let entry = target.entry_point().unwrap();
    let original_byte = target.inferior().read_memory(entry, 1).unwrap()[0];

    let id = target
        .inferior_mut()
        .create_breakpoint_site(entry, false, false)
        .unwrap()
        .id();
    target.inferior_mut().enable_breakpoint_site(id).unwrap();

    // the trap byte is visible to plain reads and masked by trap-free reads
    assert_eq!(target.inferior().read_memory(entry, 1).unwrap()[0], INT3_BYTE);
    assert_eq!(
        target
            .inferior()
            .read_memory_without_traps(entry, 1)
            .unwrap()[0],
        original_byte
    );

    target.inferior_mut().resume().unwrap();
    let reason = target.inferior_mut().wait_on_signal().unwrap();

    assert_eq!(reason.reason, ProcState::Stopped);
    assert_eq!(reason.trap_reason, Some(TrapType::SoftwareBreak));
    assert_eq!(target.inferior().pc().unwrap(), entry);

    // stepping off the breakpoint and resuming does not wedge the inferior
    let step = target.inferior_mut().step_instruction().unwrap();
    assert_eq!(step.reason, ProcState::Stopped);
}

#[test]
fn hardware_breakpoint_fires_at_entry() {
    let mut target = launch_yes();
    let entry = target.entry_point().unwrap();

    let id = target
        .inferior_mut()
        .create_breakpoint_site(entry, true, false)
        .unwrap()
        .id();
    target.inferior_mut().enable_breakpoint_site(id).unwrap();

    // hardware sites do not patch memory
    assert_ne!(target.inferior().read_memory(entry, 1).unwrap()[0], INT3_BYTE);

    target.inferior_mut().resume().unwrap();
    let reason = target.inferior_mut().wait_on_signal().unwrap();

    assert_eq!(reason.reason, ProcState::Stopped);
    assert_eq!(reason.trap_reason, Some(TrapType::HardwareBreak));
    assert_eq!(target.inferior().pc().unwrap(), entry);

    let fired = target.inferior().get_current_hardware_stoppoint().unwrap();
    assert_eq!(
        fired,
        burrow::inferior::HardwareStoppoint::Breakpoint(id)
    );
}

#[test]
fn deleted_breakpoint_restores_the_original_byte() {
    let mut target = launch_yes();
    let entry = target.entry_point().unwrap();
    let original_byte = target.inferior().read_memory(entry, 1).unwrap()[0];

    let id = target
        .inferior_mut()
        .create_breakpoint_site(entry, false, false)
        .unwrap()
        .id();
    target.inferior_mut().enable_breakpoint_site(id).unwrap();
    target.inferior_mut().remove_breakpoint_site_by_id(id).unwrap();

    assert_eq!(
        target.inferior().read_memory(entry, 1).unwrap()[0],
        original_byte
    );
    assert!(target.inferior().breakpoint_sites().empty());
}

#[test]
fn duplicate_breakpoint_address_is_rejected() {
    let mut target = launch_yes();
    let entry = target.entry_point().unwrap();

    target
        .inferior_mut()
        .create_breakpoint_site(entry, false, false)
        .unwrap();
    assert!(matches!(
        target.inferior_mut().create_breakpoint_site(entry, false, false),
        Err(burrow::DebuggerError::InvalidArgument(_))
    ));
}
