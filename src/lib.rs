//! # burrow
//!
//! A source-level debugger for x86-64 Linux user-space processes.
//!
//! The crate is organized around three cores: the inferior control plane
//! ([`inferior`]), the stoppoint engine ([`breakpoint`], [`watchpoint`],
//! [`stoppoint`]), and the ELF address model ([`elf`], [`addr`]). A
//! [`target::Target`] binds one inferior to one ELF; the shell in [`ui`]
//! and [`debugger`] is a thin adapter over those cores.

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod debugger;
pub mod disassemble;
pub mod elf;
pub mod errors;
pub mod feedback;
pub mod inferior;
pub mod parse;
pub mod pipe;
pub mod register_info;
pub mod registers;
pub mod stoppoint;
pub mod syscalls;
pub mod target;
pub mod ui;
pub mod watchpoint;

pub use addr::VirtAddr;
pub use errors::{DebuggerError, Result};
pub use inferior::Inferior;
pub use target::Target;
