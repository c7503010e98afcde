//! Constants that are deeply nested in the kernel headers and not exported
//! by nix or the libc bindings in a usable form.
//!
//! Source: <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>

#![allow(unused)]

/// Sent by the kernel from somewhere
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ---------------------------------------------------------------

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;
/// Process trace trap
pub const TRAP_TRACE: i32 = 0x2;
/// Process taken branch trap
pub const TRAP_BRANCH: i32 = 0x3;
/// Hardware breakpoint/watchpoint
pub const TRAP_HWBKPT: i32 = 0x4;

// ---------------- breakpoints --------------------------------------------------------------------

/// The one-byte `int3` trap opcode used for software breakpoints
pub const INT3_BYTE: u8 = 0xcc;

// ---------------- auxiliary vector ---------------------------------------------------------------

/// End of the auxiliary vector
pub const AT_NULL: u64 = 0;
/// Entry point of the program as mapped by the kernel
pub const AT_ENTRY: u64 = 9;

/// Granularity of `PTRACE_POKEDATA`
pub const WORD_BYTES: usize = 8;
