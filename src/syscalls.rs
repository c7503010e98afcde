//! Bidirectional mapping between syscall names and numbers, backed by the
//! [syscalls] crate's generated x86-64 table.

use std::str::FromStr;

use syscalls::Sysno;

use crate::errors::{DebuggerError, Result};

/// Resolves a syscall name like `"write"` to its number.
pub fn syscall_name_to_id(name: &str) -> Result<Sysno> {
    Sysno::from_str(name).map_err(|_| DebuggerError::NoSuchSyscall(name.to_string()))
}

/// Resolves a syscall number to its name.
pub fn syscall_id_to_name(id: u64) -> Result<&'static str> {
    usize::try_from(id)
        .ok()
        .and_then(Sysno::new)
        .map(|sysno| sysno.name())
        .ok_or_else(|| DebuggerError::NoSuchSyscall(id.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_name_to_id() {
        assert_eq!(syscall_name_to_id("write").unwrap(), Sysno::write);
        assert_eq!(syscall_name_to_id("kill").unwrap(), Sysno::kill);
        assert!(syscall_name_to_id("not_a_syscall").is_err());
    }

    #[test]
    fn test_id_to_name() {
        assert_eq!(syscall_id_to_name(Sysno::write as u64).unwrap(), "write");
        assert!(syscall_id_to_name(u64::MAX).is_err());
    }

    #[test]
    fn test_round_trip() {
        for name in ["read", "write", "openat", "execve", "exit_group"] {
            let id = syscall_name_to_id(name).unwrap();
            assert_eq!(syscall_id_to_name(id as u64).unwrap(), name);
        }
    }
}
