//! # ELF Object
//!
//! Memory-mapped, read-only view of an ELF executable with the section and
//! symbol indices the debugger needs: name lookups, containing-address
//! lookups and the file-address/virtual-address translation through the load
//! bias.
//!
//! The parse follows the on-disk gABI layout directly, including the
//! large-section-count convention: when `e_shnum` is zero but `e_shentsize`
//! is not, the real section count lives in the `sh_size` field of the first
//! section header.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::mem;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::addr::{FileAddr, FileOffset, VirtAddr};
use crate::errors::{DebuggerError, Result};

/// ELF file header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF section header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// ELF symbol table entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

/// Thread-local storage symbol type; excluded from the address index.
const STT_TLS: u8 = 6;

impl Elf64Sym {
    #[must_use]
    pub fn st_type(&self) -> u8 {
        self.st_info & 0xf
    }
}

/// Reads a plain-old-data value out of the mapping.
fn pod_at<T: Copy>(data: &[u8], offset: usize) -> Result<T> {
    let size = mem::size_of::<T>();
    let in_bounds = offset
        .checked_add(size)
        .is_some_and(|end| end <= data.len());
    if !in_bounds {
        return Err(DebuggerError::MalformedElf(format!(
            "structure of {size} bytes at offset {offset:#x} is out of bounds"
        )));
    }
    // the mapping gives no alignment guarantees past the file start
    Ok(unsafe { std::ptr::read_unaligned(data[offset..].as_ptr().cast::<T>()) })
}

/// Key of the symbol address index: `[start, end)` of one symbol.
///
/// Ordering and equality consult only `start`. Containing-address lookup is
/// a lower bound on `start` plus a single step back; interval trees are not
/// needed because symbol ranges do not nest.
#[derive(Debug, Clone, Copy)]
struct SymbolRange {
    start: u64,
    end: u64,
}

impl SymbolRange {
    fn key(start: u64) -> Self {
        Self { start, end: 0 }
    }
}

impl PartialEq for SymbolRange {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for SymbolRange {}

impl PartialOrd for SymbolRange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SymbolRange {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start.cmp(&other.start)
    }
}

/// A parsed, memory-mapped ELF object file.
///
/// Owns the file descriptor and the kernel mapping; both are released on
/// drop. Not clonable.
pub struct Elf {
    path: PathBuf,
    // keeps the descriptor alive for the lifetime of the mapping
    _file: File,
    map: Mmap,
    header: Elf64Ehdr,
    section_headers: Vec<Elf64Shdr>,
    section_name_map: HashMap<String, usize>,
    load_bias: VirtAddr,
    symbol_table: Vec<Elf64Sym>,
    symbol_name_map: HashMap<String, Vec<usize>>,
    symbol_addr_map: BTreeMap<SymbolRange, usize>,
}

impl Elf {
    /// Opens and parses the ELF file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let map = unsafe { Mmap::map(&file)? };

        let header: Elf64Ehdr = pod_at(&map, 0)?;
        if &header.e_ident[..4] != b"\x7fELF" {
            return Err(DebuggerError::MalformedElf(format!(
                "{} does not start with the ELF magic",
                path.display()
            )));
        }

        let mut elf = Self {
            path,
            _file: file,
            map,
            header,
            section_headers: Vec::new(),
            section_name_map: HashMap::new(),
            load_bias: VirtAddr::default(),
            symbol_table: Vec::new(),
            symbol_name_map: HashMap::new(),
            symbol_addr_map: BTreeMap::new(),
        };

        elf.parse_section_headers()?;
        elf.build_section_map()?;
        elf.parse_symbol_table()?;
        elf.build_symbol_maps();

        debug!(
            "parsed {}: {} sections, {} symbols",
            elf.path.display(),
            elf.section_headers.len(),
            elf.symbol_table.len()
        );

        Ok(elf)
    }

    fn parse_section_headers(&mut self) -> Result<()> {
        let mut n_headers = usize::from(self.header.e_shnum);
        if n_headers == 0 && self.header.e_shentsize != 0 {
            // large-section-count convention: the real count lives in the
            // first section header
            let first: Elf64Shdr = pod_at(&self.map, self.header.e_shoff as usize)?;
            n_headers = first.sh_size as usize;
        }

        self.section_headers.reserve(n_headers);
        for i in 0..n_headers {
            let offset = self.header.e_shoff as usize + i * mem::size_of::<Elf64Shdr>();
            self.section_headers.push(pod_at(&self.map, offset)?);
        }
        Ok(())
    }

    /// Reads a zero-terminated string at an absolute offset in the mapping.
    fn cstr_at(&self, offset: usize) -> String {
        let Some(bytes) = self.map.get(offset..) else {
            return String::new();
        };
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Resolves a name index through the section header string table.
    #[must_use]
    pub fn get_section_name(&self, index: usize) -> String {
        let Some(shstrtab) = self.section_headers.get(usize::from(self.header.e_shstrndx)) else {
            return String::new();
        };
        self.cstr_at(shstrtab.sh_offset as usize + index)
    }

    fn build_section_map(&mut self) -> Result<()> {
        for i in 0..self.section_headers.len() {
            let name = self.get_section_name(self.section_headers[i].sh_name as usize);
            self.section_name_map.insert(name, i);
        }
        Ok(())
    }

    /// Resolves a string table index through `.strtab`, falling back to
    /// `.dynstr`. Returns an empty string when neither exists.
    #[must_use]
    pub fn get_string(&self, index: usize) -> String {
        let Some(strtab) = self
            .get_section(".strtab")
            .or_else(|| self.get_section(".dynstr"))
        else {
            return String::new();
        };
        self.cstr_at(strtab.sh_offset as usize + index)
    }

    #[must_use]
    pub fn get_section(&self, name: &str) -> Option<&Elf64Shdr> {
        self.section_name_map
            .get(name)
            .map(|i| &self.section_headers[*i])
    }

    /// Raw bytes of the named section, empty when absent.
    #[must_use]
    pub fn get_section_contents(&self, name: &str) -> &[u8] {
        self.get_section(name).map_or(&[], |section| {
            let start = section.sh_offset as usize;
            let end = start + section.sh_size as usize;
            self.map.get(start..end).unwrap_or(&[])
        })
    }

    #[must_use]
    pub fn get_section_start_address(&self, name: &str) -> Option<FileAddr<'_>> {
        self.get_section(name)
            .map(|section| FileAddr::new(self, section.sh_addr))
    }

    #[must_use]
    pub fn get_section_containing_file_addr(&self, addr: FileAddr<'_>) -> Option<&Elf64Shdr> {
        if !std::ptr::eq(addr.elf_file(), self) {
            return None;
        }
        self.section_headers.iter().find(|section| {
            section.sh_addr <= addr.addr() && addr.addr() < section.sh_addr + section.sh_size
        })
    }

    #[must_use]
    pub fn get_section_containing_virt_addr(&self, addr: VirtAddr) -> Option<&Elf64Shdr> {
        let bias = self.load_bias.addr();
        self.section_headers.iter().find(|section| {
            bias + section.sh_addr <= addr.addr()
                && addr.addr() < bias + section.sh_addr + section.sh_size
        })
    }

    /// Converts an absolute file offset to the file address it is mapped at.
    #[must_use]
    pub fn file_offset_to_file_addr(&self, offset: FileOffset<'_>) -> Option<FileAddr<'_>> {
        if !std::ptr::eq(offset.elf_file(), self) {
            return None;
        }
        let section = self.section_headers.iter().find(|section| {
            section.sh_offset <= offset.off()
                && offset.off() < section.sh_offset + section.sh_size
        })?;
        Some(FileAddr::new(
            self,
            offset.off() - section.sh_offset + section.sh_addr,
        ))
    }

    /// Converts a file address to the absolute offset of its backing bytes.
    #[must_use]
    pub fn file_addr_to_file_offset(&self, addr: FileAddr<'_>) -> Option<FileOffset<'_>> {
        let section = self.get_section_containing_file_addr(addr)?;
        Some(FileOffset::new(
            self,
            addr.addr() - section.sh_addr + section.sh_offset,
        ))
    }

    fn parse_symbol_table(&mut self) -> Result<()> {
        let Some(symtab) = self
            .get_section(".symtab")
            .or_else(|| self.get_section(".dynsym"))
        else {
            // stripped binary, no symbols available
            return Ok(());
        };

        if symtab.sh_entsize == 0 {
            return Err(DebuggerError::MalformedElf(
                "symbol table has zero entry size".to_string(),
            ));
        }

        let n_symbols = (symtab.sh_size / symtab.sh_entsize) as usize;
        let base = symtab.sh_offset as usize;
        let mut symbols = Vec::with_capacity(n_symbols);
        for i in 0..n_symbols {
            symbols.push(pod_at(&self.map, base + i * mem::size_of::<Elf64Sym>())?);
        }
        self.symbol_table = symbols;
        Ok(())
    }

    fn build_symbol_maps(&mut self) {
        for i in 0..self.symbol_table.len() {
            let symbol = self.symbol_table[i];
            let mangled = self.get_string(symbol.st_name as usize);

            if let Some(demangled) = demangle(&mangled) {
                self.symbol_name_map.entry(demangled).or_default().push(i);
            }
            self.symbol_name_map.entry(mangled).or_default().push(i);

            if symbol.st_value != 0 && symbol.st_name != 0 && symbol.st_type() != STT_TLS {
                let range = SymbolRange {
                    start: symbol.st_value,
                    end: symbol.st_value + symbol.st_size,
                };
                // keep the first symbol seen for a given start address
                self.symbol_addr_map.entry(range).or_insert(i);
            }
        }
    }

    /// All symbols matching `name`, mangled or demangled.
    #[must_use]
    pub fn get_symbols_by_name(&self, name: &str) -> Vec<&Elf64Sym> {
        self.symbol_name_map.get(name).map_or_else(Vec::new, |ids| {
            ids.iter().map(|i| &self.symbol_table[*i]).collect()
        })
    }

    /// The symbol whose range starts exactly at `addr`.
    #[must_use]
    pub fn get_symbol_at_file_addr(&self, addr: FileAddr<'_>) -> Option<&Elf64Sym> {
        if !std::ptr::eq(addr.elf_file(), self) {
            return None;
        }
        self.symbol_addr_map
            .get(&SymbolRange::key(addr.addr()))
            .map(|i| &self.symbol_table[*i])
    }

    #[must_use]
    pub fn get_symbol_at_virt_addr(&self, addr: VirtAddr) -> Option<&Elf64Sym> {
        self.get_symbol_at_file_addr(addr.to_file_addr(self)?)
    }

    /// The symbol whose `[start, end)` range contains `addr`.
    #[must_use]
    pub fn get_symbol_containing_file_addr(&self, addr: FileAddr<'_>) -> Option<&Elf64Sym> {
        if !std::ptr::eq(addr.elf_file(), self) || self.symbol_addr_map.is_empty() {
            return None;
        }

        let key = SymbolRange::key(addr.addr());
        if let Some((range, i)) = self.symbol_addr_map.range(key..).next() {
            if range.start == addr.addr() {
                return Some(&self.symbol_table[*i]);
            }
        }

        // step back to the closest earlier symbol and check that it spans
        // past the address
        let (range, i) = self.symbol_addr_map.range(..key).next_back()?;
        (range.start < addr.addr() && addr.addr() < range.end).then(|| &self.symbol_table[*i])
    }

    #[must_use]
    pub fn get_symbol_containing_virt_addr(&self, addr: VirtAddr) -> Option<&Elf64Sym> {
        self.get_symbol_containing_file_addr(addr.to_file_addr(self)?)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &Elf64Ehdr {
        &self.header
    }

    #[must_use]
    pub fn load_bias(&self) -> VirtAddr {
        self.load_bias
    }

    /// Records where the loader actually placed this object.
    pub fn notify_loaded(&mut self, bias: VirtAddr) {
        self.load_bias = bias;
    }
}

/// Tries the C++ Itanium demangler first, then the Rust demangler.
fn demangle(mangled: &str) -> Option<String> {
    if let Ok(symbol) = cpp_demangle::Symbol::new(mangled) {
        if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
            return Some(demangled);
        }
    }
    rustc_demangle::try_demangle(mangled)
        .ok()
        .map(|demangled| format!("{demangled:#}"))
}
