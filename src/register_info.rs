//! # Register Catalog
//!
//! Static description of every x86-64 register the debugger can touch: its
//! name, DWARF number, width, byte offset into the kernel `user` area, broad
//! type and display format.
//!
//! The table and the [`RegisterId`] enum are generated from a single macro
//! invocation so that `id as usize` always indexes the matching table entry.
//! Offsets are computed against [`nix::libc::user`] with
//! [`std::mem::offset_of`], which is exactly the layout `PTRACE_PEEKUSER`
//! and `PTRACE_POKEUSER` address.

use std::mem::offset_of;

use nix::libc::{user, user_fpregs_struct, user_regs_struct};

use crate::errors::{DebuggerError, Result};

/// Broad classification of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterType {
    /// Full general purpose register
    Gpr,
    /// Aliased view into a general purpose register (e.g. `eax`, `ah`)
    SubGpr,
    /// x87 / SSE floating point register
    Fpr,
    /// Debug register
    Dr,
}

/// How a register's value is rendered and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFormat {
    Uint,
    DoubleFloat,
    LongDouble,
    Vector,
}

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: &'static str,
    pub dwarf_id: i32,
    pub size: usize,
    pub offset: usize,
    pub reg_type: RegisterType,
    pub format: RegisterFormat,
}

macro_rules! gpr_off {
    ($field:ident) => {
        offset_of!(user, regs) + offset_of!(user_regs_struct, $field)
    };
}

macro_rules! fpr_off {
    ($field:ident) => {
        offset_of!(user, i387) + offset_of!(user_fpregs_struct, $field)
    };
}

macro_rules! dr_off {
    ($n:expr) => {
        offset_of!(user, u_debugreg) + 8 * $n
    };
}

macro_rules! define_registers {
    ($(($id:ident, $name:literal, $dwarf:literal, $size:literal, $offset:expr, $ty:ident, $fmt:ident)),* $(,)?) => {
        /// Identifier of a single catalog entry.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RegisterId {
            $($id),*
        }

        /// The full x86-64 register catalog, indexed by [`RegisterId`].
        pub static REGISTER_INFOS: &[RegisterInfo] = &[
            $(RegisterInfo {
                id: RegisterId::$id,
                name: $name,
                dwarf_id: $dwarf,
                size: $size,
                offset: $offset,
                reg_type: RegisterType::$ty,
                format: RegisterFormat::$fmt,
            }),*
        ];
    };
}

#[rustfmt::skip]
define_registers![
    // 64 bit general purpose registers
    (rax, "rax", 0, 8, gpr_off!(rax), Gpr, Uint),
    (rdx, "rdx", 1, 8, gpr_off!(rdx), Gpr, Uint),
    (rcx, "rcx", 2, 8, gpr_off!(rcx), Gpr, Uint),
    (rbx, "rbx", 3, 8, gpr_off!(rbx), Gpr, Uint),
    (rsi, "rsi", 4, 8, gpr_off!(rsi), Gpr, Uint),
    (rdi, "rdi", 5, 8, gpr_off!(rdi), Gpr, Uint),
    (rbp, "rbp", 6, 8, gpr_off!(rbp), Gpr, Uint),
    (rsp, "rsp", 7, 8, gpr_off!(rsp), Gpr, Uint),
    (r8, "r8", 8, 8, gpr_off!(r8), Gpr, Uint),
    (r9, "r9", 9, 8, gpr_off!(r9), Gpr, Uint),
    (r10, "r10", 10, 8, gpr_off!(r10), Gpr, Uint),
    (r11, "r11", 11, 8, gpr_off!(r11), Gpr, Uint),
    (r12, "r12", 12, 8, gpr_off!(r12), Gpr, Uint),
    (r13, "r13", 13, 8, gpr_off!(r13), Gpr, Uint),
    (r14, "r14", 14, 8, gpr_off!(r14), Gpr, Uint),
    (r15, "r15", 15, 8, gpr_off!(r15), Gpr, Uint),
    (rip, "rip", 16, 8, gpr_off!(rip), Gpr, Uint),
    (eflags, "eflags", 49, 8, gpr_off!(eflags), Gpr, Uint),
    (cs, "cs", 51, 8, gpr_off!(cs), Gpr, Uint),
    (fs, "fs", 54, 8, gpr_off!(fs), Gpr, Uint),
    (gs, "gs", 55, 8, gpr_off!(gs), Gpr, Uint),
    (ss, "ss", 52, 8, gpr_off!(ss), Gpr, Uint),
    (ds, "ds", 53, 8, gpr_off!(ds), Gpr, Uint),
    (es, "es", 50, 8, gpr_off!(es), Gpr, Uint),
    (fs_base, "fs_base", 58, 8, gpr_off!(fs_base), Gpr, Uint),
    (gs_base, "gs_base", 59, 8, gpr_off!(gs_base), Gpr, Uint),
    (orig_rax, "orig_rax", -1, 8, gpr_off!(orig_rax), Gpr, Uint),
    // 32 bit views
    (eax, "eax", -1, 4, gpr_off!(rax), SubGpr, Uint),
    (edx, "edx", -1, 4, gpr_off!(rdx), SubGpr, Uint),
    (ecx, "ecx", -1, 4, gpr_off!(rcx), SubGpr, Uint),
    (ebx, "ebx", -1, 4, gpr_off!(rbx), SubGpr, Uint),
    (esi, "esi", -1, 4, gpr_off!(rsi), SubGpr, Uint),
    (edi, "edi", -1, 4, gpr_off!(rdi), SubGpr, Uint),
    (ebp, "ebp", -1, 4, gpr_off!(rbp), SubGpr, Uint),
    (esp, "esp", -1, 4, gpr_off!(rsp), SubGpr, Uint),
    (r8d, "r8d", -1, 4, gpr_off!(r8), SubGpr, Uint),
    (r9d, "r9d", -1, 4, gpr_off!(r9), SubGpr, Uint),
    (r10d, "r10d", -1, 4, gpr_off!(r10), SubGpr, Uint),
    (r11d, "r11d", -1, 4, gpr_off!(r11), SubGpr, Uint),
    (r12d, "r12d", -1, 4, gpr_off!(r12), SubGpr, Uint),
    (r13d, "r13d", -1, 4, gpr_off!(r13), SubGpr, Uint),
    (r14d, "r14d", -1, 4, gpr_off!(r14), SubGpr, Uint),
    (r15d, "r15d", -1, 4, gpr_off!(r15), SubGpr, Uint),
    // 16 bit views
    (ax, "ax", -1, 2, gpr_off!(rax), SubGpr, Uint),
    (dx, "dx", -1, 2, gpr_off!(rdx), SubGpr, Uint),
    (cx, "cx", -1, 2, gpr_off!(rcx), SubGpr, Uint),
    (bx, "bx", -1, 2, gpr_off!(rbx), SubGpr, Uint),
    (si, "si", -1, 2, gpr_off!(rsi), SubGpr, Uint),
    (di, "di", -1, 2, gpr_off!(rdi), SubGpr, Uint),
    (bp, "bp", -1, 2, gpr_off!(rbp), SubGpr, Uint),
    (sp, "sp", -1, 2, gpr_off!(rsp), SubGpr, Uint),
    (r8w, "r8w", -1, 2, gpr_off!(r8), SubGpr, Uint),
    (r9w, "r9w", -1, 2, gpr_off!(r9), SubGpr, Uint),
    (r10w, "r10w", -1, 2, gpr_off!(r10), SubGpr, Uint),
    (r11w, "r11w", -1, 2, gpr_off!(r11), SubGpr, Uint),
    (r12w, "r12w", -1, 2, gpr_off!(r12), SubGpr, Uint),
    (r13w, "r13w", -1, 2, gpr_off!(r13), SubGpr, Uint),
    (r14w, "r14w", -1, 2, gpr_off!(r14), SubGpr, Uint),
    (r15w, "r15w", -1, 2, gpr_off!(r15), SubGpr, Uint),
    // low byte views
    (al, "al", -1, 1, gpr_off!(rax), SubGpr, Uint),
    (dl, "dl", -1, 1, gpr_off!(rdx), SubGpr, Uint),
    (cl, "cl", -1, 1, gpr_off!(rcx), SubGpr, Uint),
    (bl, "bl", -1, 1, gpr_off!(rbx), SubGpr, Uint),
    (sil, "sil", -1, 1, gpr_off!(rsi), SubGpr, Uint),
    (dil, "dil", -1, 1, gpr_off!(rdi), SubGpr, Uint),
    (bpl, "bpl", -1, 1, gpr_off!(rbp), SubGpr, Uint),
    (spl, "spl", -1, 1, gpr_off!(rsp), SubGpr, Uint),
    (r8b, "r8b", -1, 1, gpr_off!(r8), SubGpr, Uint),
    (r9b, "r9b", -1, 1, gpr_off!(r9), SubGpr, Uint),
    (r10b, "r10b", -1, 1, gpr_off!(r10), SubGpr, Uint),
    (r11b, "r11b", -1, 1, gpr_off!(r11), SubGpr, Uint),
    (r12b, "r12b", -1, 1, gpr_off!(r12), SubGpr, Uint),
    (r13b, "r13b", -1, 1, gpr_off!(r13), SubGpr, Uint),
    (r14b, "r14b", -1, 1, gpr_off!(r14), SubGpr, Uint),
    (r15b, "r15b", -1, 1, gpr_off!(r15), SubGpr, Uint),
    // high byte views
    (ah, "ah", -1, 1, gpr_off!(rax) + 1, SubGpr, Uint),
    (dh, "dh", -1, 1, gpr_off!(rdx) + 1, SubGpr, Uint),
    (ch, "ch", -1, 1, gpr_off!(rcx) + 1, SubGpr, Uint),
    (bh, "bh", -1, 1, gpr_off!(rbx) + 1, SubGpr, Uint),
    // x87 / SSE control and status
    (fcw, "fcw", 65, 2, fpr_off!(cwd), Fpr, Uint),
    (fsw, "fsw", 66, 2, fpr_off!(swd), Fpr, Uint),
    (ftw, "ftw", -1, 2, fpr_off!(ftw), Fpr, Uint),
    (fop, "fop", -1, 2, fpr_off!(fop), Fpr, Uint),
    (frip, "frip", -1, 8, fpr_off!(rip), Fpr, Uint),
    (frdp, "frdp", -1, 8, fpr_off!(rdp), Fpr, Uint),
    (mxcsr, "mxcsr", 64, 4, fpr_off!(mxcsr), Fpr, Uint),
    (mxcsrmask, "mxcsrmask", -1, 4, fpr_off!(mxcr_mask), Fpr, Uint),
    // x87 data registers
    (st0, "st0", 33, 16, fpr_off!(st_space), Fpr, LongDouble),
    (st1, "st1", 34, 16, fpr_off!(st_space) + 16, Fpr, LongDouble),
    (st2, "st2", 35, 16, fpr_off!(st_space) + 32, Fpr, LongDouble),
    (st3, "st3", 36, 16, fpr_off!(st_space) + 48, Fpr, LongDouble),
    (st4, "st4", 37, 16, fpr_off!(st_space) + 64, Fpr, LongDouble),
    (st5, "st5", 38, 16, fpr_off!(st_space) + 80, Fpr, LongDouble),
    (st6, "st6", 39, 16, fpr_off!(st_space) + 96, Fpr, LongDouble),
    (st7, "st7", 40, 16, fpr_off!(st_space) + 112, Fpr, LongDouble),
    // MMX aliases of the x87 data registers
    (mm0, "mm0", 41, 8, fpr_off!(st_space), Fpr, Vector),
    (mm1, "mm1", 42, 8, fpr_off!(st_space) + 16, Fpr, Vector),
    (mm2, "mm2", 43, 8, fpr_off!(st_space) + 32, Fpr, Vector),
    (mm3, "mm3", 44, 8, fpr_off!(st_space) + 48, Fpr, Vector),
    (mm4, "mm4", 45, 8, fpr_off!(st_space) + 64, Fpr, Vector),
    (mm5, "mm5", 46, 8, fpr_off!(st_space) + 80, Fpr, Vector),
    (mm6, "mm6", 47, 8, fpr_off!(st_space) + 96, Fpr, Vector),
    (mm7, "mm7", 48, 8, fpr_off!(st_space) + 112, Fpr, Vector),
    // SSE registers
    (xmm0, "xmm0", 17, 16, fpr_off!(xmm_space), Fpr, Vector),
    (xmm1, "xmm1", 18, 16, fpr_off!(xmm_space) + 16, Fpr, Vector),
    (xmm2, "xmm2", 19, 16, fpr_off!(xmm_space) + 32, Fpr, Vector),
    (xmm3, "xmm3", 20, 16, fpr_off!(xmm_space) + 48, Fpr, Vector),
    (xmm4, "xmm4", 21, 16, fpr_off!(xmm_space) + 64, Fpr, Vector),
    (xmm5, "xmm5", 22, 16, fpr_off!(xmm_space) + 80, Fpr, Vector),
    (xmm6, "xmm6", 23, 16, fpr_off!(xmm_space) + 96, Fpr, Vector),
    (xmm7, "xmm7", 24, 16, fpr_off!(xmm_space) + 112, Fpr, Vector),
    (xmm8, "xmm8", 25, 16, fpr_off!(xmm_space) + 128, Fpr, Vector),
    (xmm9, "xmm9", 26, 16, fpr_off!(xmm_space) + 144, Fpr, Vector),
    (xmm10, "xmm10", 27, 16, fpr_off!(xmm_space) + 160, Fpr, Vector),
    (xmm11, "xmm11", 28, 16, fpr_off!(xmm_space) + 176, Fpr, Vector),
    (xmm12, "xmm12", 29, 16, fpr_off!(xmm_space) + 192, Fpr, Vector),
    (xmm13, "xmm13", 30, 16, fpr_off!(xmm_space) + 208, Fpr, Vector),
    (xmm14, "xmm14", 31, 16, fpr_off!(xmm_space) + 224, Fpr, Vector),
    (xmm15, "xmm15", 32, 16, fpr_off!(xmm_space) + 240, Fpr, Vector),
    // debug registers
    (dr0, "dr0", -1, 8, dr_off!(0), Dr, Uint),
    (dr1, "dr1", -1, 8, dr_off!(1), Dr, Uint),
    (dr2, "dr2", -1, 8, dr_off!(2), Dr, Uint),
    (dr3, "dr3", -1, 8, dr_off!(3), Dr, Uint),
    (dr4, "dr4", -1, 8, dr_off!(4), Dr, Uint),
    (dr5, "dr5", -1, 8, dr_off!(5), Dr, Uint),
    (dr6, "dr6", -1, 8, dr_off!(6), Dr, Uint),
    (dr7, "dr7", -1, 8, dr_off!(7), Dr, Uint),
];

impl RegisterId {
    /// Debug register `DRn` for `n` in `0..8`.
    ///
    /// # Panics
    ///
    /// Panics when `n` is out of range; callers derive `n` from the four
    /// DR7 slots or the fixed loop over all eight registers.
    #[must_use]
    pub fn dr(n: usize) -> Self {
        match n {
            0 => RegisterId::dr0,
            1 => RegisterId::dr1,
            2 => RegisterId::dr2,
            3 => RegisterId::dr3,
            4 => RegisterId::dr4,
            5 => RegisterId::dr5,
            6 => RegisterId::dr6,
            7 => RegisterId::dr7,
            _ => panic!("debug register index out of range: {n}"),
        }
    }
}

/// Looks an entry up by its [`RegisterId`].
#[must_use]
pub fn register_info_by_id(id: RegisterId) -> &'static RegisterInfo {
    let info = &REGISTER_INFOS[id as usize];
    debug_assert_eq!(info.id, id);
    info
}

/// Looks an entry up by its user-facing name.
pub fn register_info_by_name(name: &str) -> Result<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.name == name)
        .ok_or_else(|| DebuggerError::NoSuchRegister(name.to_string()))
}

/// Looks an entry up by its DWARF register number.
#[must_use]
pub fn register_info_by_dwarf(dwarf_id: i32) -> Option<&'static RegisterInfo> {
    if dwarf_id < 0 {
        return None;
    }
    REGISTER_INFOS.iter().find(|info| info.dwarf_id == dwarf_id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_id() {
        for (i, info) in REGISTER_INFOS.iter().enumerate() {
            assert_eq!(info.id as usize, i, "entry {} out of order", info.name);
        }
    }

    #[test]
    fn test_gpr_offsets_match_user_regs_layout() {
        // user_regs_struct starts the user area, r15 first, rax eleventh.
        assert_eq!(register_info_by_id(RegisterId::rax).offset, 10 * 8);
        assert_eq!(register_info_by_id(RegisterId::ah).offset, 10 * 8 + 1);
        assert_eq!(
            register_info_by_id(RegisterId::rip).offset,
            register_info_by_id(RegisterId::orig_rax).offset + 8
        );
    }

    #[test]
    fn test_sub_registers_share_offsets() {
        let rax = register_info_by_id(RegisterId::rax);
        for sub in [RegisterId::eax, RegisterId::ax, RegisterId::al] {
            assert_eq!(register_info_by_id(sub).offset, rax.offset);
        }
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(
            register_info_by_name("xmm13").unwrap().id,
            RegisterId::xmm13
        );
        assert!(register_info_by_name("xmm16").is_err());
    }

    #[test]
    fn test_lookup_by_dwarf() {
        assert_eq!(register_info_by_dwarf(16).unwrap().id, RegisterId::rip);
        assert_eq!(register_info_by_dwarf(41).unwrap().id, RegisterId::mm0);
        assert!(register_info_by_dwarf(-1).is_none());
    }

    #[test]
    fn test_debug_register_spacing() {
        let dr0 = register_info_by_id(RegisterId::dr0).offset;
        for n in 0..8 {
            assert_eq!(register_info_by_id(RegisterId::dr(n)).offset, dr0 + 8 * n);
        }
    }
}
