//! Disassembler adapter over [iced_x86].
//!
//! Reads inferior memory with breakpoint traps masked out, so listings show
//! the program's real instructions rather than patched `int3` bytes.

use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

use crate::addr::VirtAddr;
use crate::errors::Result;
use crate::inferior::Inferior;

const CODE_BITNESS: u32 = 64;
/// Longest legal x86-64 instruction.
const MAX_INSTRUCTION_BYTES: usize = 15;

/// One decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub addr: VirtAddr,
    pub text: String,
}

/// Disassembles `n_instructions` starting at `address`, defaulting to the
/// current program counter.
pub fn disassemble(
    inferior: &Inferior,
    n_instructions: usize,
    address: Option<VirtAddr>,
) -> Result<Vec<Instruction>> {
    let address = match address {
        Some(address) => address,
        None => inferior.pc()?,
    };

    let code =
        inferior.read_memory_without_traps(address, n_instructions * MAX_INSTRUCTION_BYTES)?;
    let mut decoder = Decoder::with_ip(CODE_BITNESS, &code, address.addr(), DecoderOptions::NONE);

    let mut formatter = NasmFormatter::new();
    // padding
    formatter.options_mut().set_first_operand_char_index(16);

    // numbers stuff
    formatter.options_mut().set_hex_suffix("");
    formatter.options_mut().set_hex_prefix("0x");
    formatter.options_mut().set_decimal_suffix("");
    formatter.options_mut().set_decimal_prefix("");
    formatter.options_mut().set_octal_suffix("");
    formatter.options_mut().set_octal_prefix("0o");
    formatter.options_mut().set_binary_suffix("");
    formatter.options_mut().set_binary_prefix("0b");

    // memory stuff
    formatter.options_mut().set_show_symbol_address(true);
    formatter.options_mut().set_rip_relative_addresses(false);
    formatter
        .options_mut()
        .set_memory_size_options(iced_x86::MemorySizeOptions::Always);

    let mut out = Vec::with_capacity(n_instructions);
    for _ in 0..n_instructions {
        if !decoder.can_decode() {
            break;
        }
        let instruction = decoder.decode();
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        out.push(Instruction {
            addr: VirtAddr::new(instruction.ip()),
            text,
        });
    }

    Ok(out)
}
