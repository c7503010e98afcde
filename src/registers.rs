//! # Register Facade
//!
//! A cached snapshot of the kernel `user` structure for one inferior, with
//! typed reads and write-through to the kernel.
//!
//! The cache is refreshed by the inferior on every transition into the
//! stopped state; between stops it is stale and must not be consulted.
//! Writes are mirrored into the cache and immediately forwarded: general
//! purpose registers as a whole `user_regs_struct` via `PTRACE_SETREGS`
//! (which is what keeps sub-register writes like `al` from clobbering the
//! rest of `rax`), floating point state as a whole via `PTRACE_SETFPREGS`,
//! and debug registers word-wise via `PTRACE_POKEUSER`.

use std::fmt::{self, Display};
use std::mem;

use nix::libc::{user, user_fpregs_struct, user_regs_struct};
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::{DebuggerError, Result};
use crate::register_info::{
    register_info_by_id, RegisterFormat, RegisterId, RegisterInfo, RegisterType,
};

pub type Byte64 = [u8; 8];
pub type Byte128 = [u8; 16];

/// A typed register value.
///
/// The 80-bit x87 extended format has no native Rust type; `LongDouble`
/// carries the raw 16-byte register slot and is converted through
/// [`f80_to_f64`] / [`f64_to_f80`] at the edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    LongDouble(Byte128),
    Byte64(Byte64),
    Byte128(Byte128),
}

impl RegisterValue {
    /// Width of the payload in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            RegisterValue::U8(_) | RegisterValue::I8(_) => 1,
            RegisterValue::U16(_) | RegisterValue::I16(_) => 2,
            RegisterValue::U32(_) | RegisterValue::I32(_) | RegisterValue::F32(_) => 4,
            RegisterValue::U64(_)
            | RegisterValue::I64(_)
            | RegisterValue::F64(_)
            | RegisterValue::Byte64(_) => 8,
            RegisterValue::LongDouble(_) | RegisterValue::Byte128(_) => 16,
        }
    }

    fn to_le_bytes(self) -> ([u8; 16], usize) {
        let mut buf = [0u8; 16];
        let len = self.byte_len();
        match self {
            RegisterValue::U8(v) => buf[..1].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::U16(v) => buf[..2].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::U32(v) => buf[..4].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::U64(v) => buf[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I8(v) => buf[..1].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I16(v) => buf[..2].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I32(v) => buf[..4].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::I64(v) => buf[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::F32(v) => buf[..4].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::F64(v) => buf[..8].copy_from_slice(&v.to_le_bytes()),
            RegisterValue::LongDouble(v) | RegisterValue::Byte128(v) => buf = v,
            RegisterValue::Byte64(v) => buf[..8].copy_from_slice(&v),
        }
        (buf, len)
    }
}

impl Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::U8(v) => write!(f, "{v:#04x}"),
            RegisterValue::U16(v) => write!(f, "{v:#06x}"),
            RegisterValue::U32(v) => write!(f, "{v:#010x}"),
            RegisterValue::U64(v) => write!(f, "{v:#018x}"),
            RegisterValue::I8(v) => write!(f, "{v}"),
            RegisterValue::I16(v) => write!(f, "{v}"),
            RegisterValue::I32(v) => write!(f, "{v}"),
            RegisterValue::I64(v) => write!(f, "{v}"),
            RegisterValue::F32(v) => write!(f, "{v}"),
            RegisterValue::F64(v) => write!(f, "{v}"),
            RegisterValue::LongDouble(raw) => write!(f, "{}", f80_to_f64(*raw)),
            RegisterValue::Byte64(bytes) => write_byte_list(f, bytes),
            RegisterValue::Byte128(bytes) => write_byte_list(f, bytes),
        }
    }
}

fn write_byte_list(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "[")?;
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{b:#04x}")?;
    }
    write!(f, "]")
}

/// Cached user-area image of one stopped inferior.
pub struct Registers {
    pid: Pid,
    data: user,
}

impl Registers {
    pub(crate) fn new(pid: Pid) -> Self {
        Self {
            pid,
            // the kernel fills the image on the first stop
            data: unsafe { mem::zeroed::<user>() },
        }
    }

    fn as_bytes(&self) -> &[u8] {
        let ptr = std::ptr::from_ref(&self.data).cast::<u8>();
        unsafe { std::slice::from_raw_parts(ptr, mem::size_of::<user>()) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let ptr = std::ptr::from_mut(&mut self.data).cast::<u8>();
        unsafe { std::slice::from_raw_parts_mut(ptr, mem::size_of::<user>()) }
    }

    pub(crate) fn set_gprs(&mut self, regs: user_regs_struct) {
        self.data.regs = regs;
    }

    pub(crate) fn set_fprs(&mut self, fprs: user_fpregs_struct) {
        self.data.i387 = fprs;
    }

    pub(crate) fn set_debug_register(&mut self, n: usize, value: u64) {
        self.data.u_debugreg[n] = value;
    }

    /// Reads a register out of the cached image.
    #[must_use]
    pub fn read(&self, info: &RegisterInfo) -> RegisterValue {
        let bytes = &self.as_bytes()[info.offset..info.offset + info.size];
        match (info.format, info.size) {
            (RegisterFormat::Uint, 1) => RegisterValue::U8(bytes[0]),
            (RegisterFormat::Uint, 2) => {
                RegisterValue::U16(u16::from_le_bytes(bytes.try_into().unwrap()))
            }
            (RegisterFormat::Uint, 4) => {
                RegisterValue::U32(u32::from_le_bytes(bytes.try_into().unwrap()))
            }
            (RegisterFormat::Uint, 8) => {
                RegisterValue::U64(u64::from_le_bytes(bytes.try_into().unwrap()))
            }
            (RegisterFormat::DoubleFloat, 4) => {
                RegisterValue::F32(f32::from_le_bytes(bytes.try_into().unwrap()))
            }
            (RegisterFormat::DoubleFloat, 8) => {
                RegisterValue::F64(f64::from_le_bytes(bytes.try_into().unwrap()))
            }
            (RegisterFormat::LongDouble, 16) => {
                RegisterValue::LongDouble(bytes.try_into().unwrap())
            }
            (RegisterFormat::Vector, 8) => RegisterValue::Byte64(bytes.try_into().unwrap()),
            (RegisterFormat::Vector, 16) => RegisterValue::Byte128(bytes.try_into().unwrap()),
            (format, size) => unreachable!("no register has format {format:?} with size {size}"),
        }
    }

    /// Reads a register by id.
    #[must_use]
    pub fn read_by_id(&self, id: RegisterId) -> RegisterValue {
        self.read(register_info_by_id(id))
    }

    /// Reads an 8-byte unsigned register (GPR, `orig_rax`, debug register).
    pub fn read_by_id_as_u64(&self, id: RegisterId) -> Result<u64> {
        match self.read_by_id(id) {
            RegisterValue::U64(v) => Ok(v),
            other => Err(DebuggerError::InvalidArgument(format!(
                "register {id:?} is not a 64 bit integer register (read {other})"
            ))),
        }
    }

    /// Writes a register into the cache and forwards it to the kernel.
    pub fn write(&mut self, info: &RegisterInfo, value: RegisterValue) -> Result<()> {
        let widened = widen(info, value)?;
        let offset = info.offset;
        self.as_bytes_mut()[offset..offset + info.size].copy_from_slice(&widened[..info.size]);

        match info.reg_type {
            RegisterType::Fpr => ptrace::setregset::<ptrace::regset::NT_PRFPREG>(
                self.pid,
                self.data.i387,
            )
            .map_err(DebuggerError::kernel_call(
                "could not write floating point registers",
            )),
            RegisterType::Dr => {
                let word =
                    u64::from_le_bytes(self.as_bytes()[offset..offset + 8].try_into().unwrap());
                ptrace::write_user(self.pid, offset as ptrace::AddressType, word as i64).map_err(
                    DebuggerError::kernel_call("could not write to debug register user area"),
                )
            }
            RegisterType::Gpr | RegisterType::SubGpr => ptrace::setregs(self.pid, self.data.regs)
                .map_err(DebuggerError::kernel_call(
                    "could not write general purpose registers",
                )),
        }
    }

    /// Writes a register by id.
    pub fn write_by_id(&mut self, id: RegisterId, value: RegisterValue) -> Result<()> {
        self.write(register_info_by_id(id), value)
    }
}

/// Widens `value` to the byte representation `info` expects.
///
/// Unsigned values zero-extend, signed values sign-extend, `f32`/`f64`
/// convert up to the target float format, and anything fits into a vector
/// register as raw little-endian bytes.
fn widen(info: &RegisterInfo, value: RegisterValue) -> Result<[u8; 16]> {
    let mismatch = || {
        DebuggerError::InvalidArgument(format!(
            "cannot write {value:?} to register {}",
            info.name
        ))
    };

    if value.byte_len() > info.size {
        return Err(DebuggerError::InvalidArgument(format!(
            "value is wider than register {} ({} > {} bytes)",
            info.name,
            value.byte_len(),
            info.size
        )));
    }

    let mut buf = [0u8; 16];
    match info.format {
        RegisterFormat::Uint => match value {
            RegisterValue::U8(_)
            | RegisterValue::U16(_)
            | RegisterValue::U32(_)
            | RegisterValue::U64(_) => {
                let (bytes, len) = value.to_le_bytes();
                buf[..len].copy_from_slice(&bytes[..len]);
            }
            RegisterValue::I8(v) => sign_extend(&mut buf, i64::from(v), info.size),
            RegisterValue::I16(v) => sign_extend(&mut buf, i64::from(v), info.size),
            RegisterValue::I32(v) => sign_extend(&mut buf, i64::from(v), info.size),
            RegisterValue::I64(v) => sign_extend(&mut buf, v, info.size),
            _ => return Err(mismatch()),
        },
        RegisterFormat::DoubleFloat => match value {
            RegisterValue::F32(v) => buf[..8].copy_from_slice(&f64::from(v).to_le_bytes()),
            RegisterValue::F64(v) => buf[..8].copy_from_slice(&v.to_le_bytes()),
            _ => return Err(mismatch()),
        },
        RegisterFormat::LongDouble => match value {
            RegisterValue::F32(v) => buf = f64_to_f80(f64::from(v)),
            RegisterValue::F64(v) => buf = f64_to_f80(v),
            RegisterValue::LongDouble(raw) => buf = raw,
            _ => return Err(mismatch()),
        },
        RegisterFormat::Vector => {
            let (bytes, len) = value.to_le_bytes();
            buf[..len].copy_from_slice(&bytes[..len]);
        }
    }
    Ok(buf)
}

fn sign_extend(buf: &mut [u8; 16], value: i64, size: usize) {
    let wide = (i128::from(value)).to_le_bytes();
    buf[..size].copy_from_slice(&wide[..size]);
}

/// Encodes an `f64` as an x87 80-bit extended float in a 16-byte slot.
#[must_use]
pub fn f64_to_f80(value: f64) -> Byte128 {
    let bits = value.to_bits();
    let sign = ((bits >> 63) & 1) as u16;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & 0x000f_ffff_ffff_ffff;

    let (ext_exp, mantissa): (u16, u64) = if exp == 0x7ff {
        // infinity and NaN keep the explicit integer bit set
        (0x7fff, (1 << 63) | (frac << 11))
    } else if exp != 0 {
        ((exp - 1023 + 16383) as u16, (1 << 63) | (frac << 11))
    } else if frac == 0 {
        (0, 0)
    } else {
        // subnormal double, normal in the extended format
        let msb = 63 - frac.leading_zeros() as i32;
        (
            (msb - 1074 + 16383) as u16,
            frac << (63 - msb),
        )
    };

    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&mantissa.to_le_bytes());
    raw[8..10].copy_from_slice(&((sign << 15) | ext_exp).to_le_bytes());
    raw
}

/// Decodes an x87 80-bit extended float into the closest `f64`.
#[must_use]
pub fn f80_to_f64(raw: Byte128) -> f64 {
    let mantissa = u64::from_le_bytes(raw[..8].try_into().unwrap());
    let sign_exp = u16::from_le_bytes(raw[8..10].try_into().unwrap());
    let negative = sign_exp & 0x8000 != 0;
    let exp = i32::from(sign_exp & 0x7fff);

    let magnitude = if exp == 0x7fff {
        if mantissa << 1 == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else if exp == 0 && mantissa == 0 {
        0.0
    } else {
        // value = mantissa * 2^(exp - 16383 - 63); scale in two steps so the
        // intermediate power stays representable for subnormal results
        let e = exp - 16383 - 63;
        (mantissa as f64) * 2f64.powi(e / 2) * 2f64.powi(e - e / 2)
    };

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::register_info::register_info_by_name;

    #[test]
    fn test_f80_round_trip() {
        for value in [0.0, 1.0, -1.5, 42.24, 64.125, 1e-310, f64::INFINITY] {
            let raw = f64_to_f80(value);
            assert_eq!(f80_to_f64(raw), value, "round trip of {value}");
        }
        assert!(f80_to_f64(f64_to_f80(f64::NAN)).is_nan());
    }

    #[test]
    fn test_f80_known_encoding() {
        // 64.125 = 2^6 * (1 + 2^-9)
        let raw = f64_to_f80(64.125);
        assert_eq!(
            u64::from_le_bytes(raw[..8].try_into().unwrap()),
            0x8040_0000_0000_0000
        );
        assert_eq!(
            u16::from_le_bytes(raw[8..10].try_into().unwrap()),
            16383 + 6
        );
    }

    #[test]
    fn test_widen_zero_extends_uints() {
        let rsi = register_info_by_name("rsi").unwrap();
        let buf = widen(rsi, RegisterValue::U32(0xcafe_cafe)).unwrap();
        assert_eq!(u64::from_le_bytes(buf[..8].try_into().unwrap()), 0xcafe_cafe);
    }

    #[test]
    fn test_widen_sign_extends_ints() {
        let rsi = register_info_by_name("rsi").unwrap();
        let buf = widen(rsi, RegisterValue::I8(-1)).unwrap();
        assert_eq!(u64::from_le_bytes(buf[..8].try_into().unwrap()), u64::MAX);
    }

    #[test]
    fn test_widen_rejects_oversized_values() {
        let al = register_info_by_name("al").unwrap();
        assert!(widen(al, RegisterValue::U64(1)).is_err());
    }

    #[test]
    fn test_widen_float_into_vector() {
        let xmm0 = register_info_by_name("xmm0").unwrap();
        let buf = widen(xmm0, RegisterValue::F64(42.24)).unwrap();
        assert_eq!(
            f64::from_le_bytes(buf[..8].try_into().unwrap()),
            42.24
        );
        assert_eq!(&buf[8..], &[0u8; 8]);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(RegisterValue::U64(0xcafe).to_string(), "0x000000000000cafe");
        assert_eq!(RegisterValue::F64(42.24).to_string(), "42.24");
        assert_eq!(
            RegisterValue::Byte64([1, 0, 0, 0, 0, 0, 0, 0]).to_string(),
            "[0x01,0x00,0x00,0x00,0x00,0x00,0x00,0x00]"
        );
        assert_eq!(
            RegisterValue::LongDouble(f64_to_f80(42.24)).to_string(),
            "42.24"
        );
    }
}
