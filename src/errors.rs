//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! All fallible operations in the debugger funnel into [`DebuggerError`],
//! built with the [thiserror] crate. Kernel call failures keep the errno that
//! caused them together with a short description of the operation that was
//! attempted, so that the shell can print something more useful than a bare
//! `EPERM`.

use thiserror::Error;

/// Type alias for Results returned by burrow functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// Comprehensive error type for the burrow debugger
///
/// # Examples
///
/// ```
/// use burrow::errors::{DebuggerError, Result};
///
/// fn example_function() -> Result<()> {
///     if true {
///         return Err(DebuggerError::InvalidArgument(
///             "watchpoint must be aligned to size".to_string(),
///         ));
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("could not launch inferior: {0}")]
    Launch(String),
    #[error("could not attach: {0}")]
    Attach(String),
    #[error("{what}: {source}")]
    KernelCall {
        what: &'static str,
        source: nix::Error,
    },
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no remaining hardware debug registers")]
    OutOfHardwareRegisters,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid stoppoint {0}")]
    InvalidStoppoint(&'static str),
    #[error("no such register: {0}")]
    NoSuchRegister(String),
    #[error("no such syscall: {0}")]
    NoSuchSyscall(String),
    #[error("could not parse user input: {0}")]
    Parse(String),
    #[error("could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("could not parse float: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error("could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("error while getting cli input: {0}")]
    CliUiDialogueError(#[from] dialoguer::Error),
    #[error("the ELF image is malformed: {0}")]
    MalformedElf(String),
}

impl DebuggerError {
    /// Attaches an operation description to a [nix] errno.
    pub(crate) fn kernel_call(what: &'static str) -> impl FnOnce(nix::Error) -> Self {
        move |source| DebuggerError::KernelCall { what, source }
    }
}
