//! Per-instruction-set semantics for interactive debugger front-ends.
//!
//! Given a register layout observed at a debugger stop, this crate picks the
//! matching architecture profile and answers the questions a context view
//! needs: is this instruction a branch, will it be taken and why, where does it
//! go, which registers carry the call arguments, and what does a pointer
//! ultimately refer to.
//!
//! Disassembly, process control and memory access stay with the host: the
//! crate consumes pre-disassembled [`Insn`]s, register values, a
//! [`MemoryReader`] and an optional [`SymbolResolver`].
//!
//! # Basic Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use isaview::{
//!     info::{ArchInfo, RegInfo, RegisterGroup, RegisterSnapshot},
//!     registry::Registry,
//! };
//!
//! // Build the registry once at startup
//! let registry = Registry::with_builtin_profiles();
//!
//! // Describe what the debugger reported at this stop
//! let snapshot = RegisterSnapshot {
//!     triple: "x86_64-apple-darwin".to_string(),
//!     arch_name: "x86_64".to_string(),
//!     ptr_size: 8,
//!     groups: vec![RegisterGroup::new(
//!         "General Purpose Registers",
//!         vec![RegInfo::new("rax", 8), RegInfo::new("rip", 8), RegInfo::new("rsp", 8)],
//!     )],
//!     ..Default::default()
//! };
//! let info = ArchInfo::from_snapshot(&snapshot);
//! let view = registry.detect(info, None);
//! assert_eq!(view.name(), "x86_64");
//!
//! // Ask whether `je` is taken with ZF set
//! let regs: HashMap<String, u64> = HashMap::new();
//! let decision = view.branch_decision("je", "0x1000", &regs, 1 << 6, false, false).unwrap();
//! assert!(decision.taken);
//! assert_eq!(decision.reason, "zf=1");
//! ```

pub mod abi;
pub mod arch;
pub mod deref;
pub mod family;
pub mod flow;
pub mod format;
pub mod info;
pub mod registry;
pub mod settings;
pub mod view;
#[cfg(feature = "extension-module")]
pub mod python;

/// Represents an address in the inspected process
pub type Address = u64;

/// Live register values keyed by lower-cased register name.
pub type Registers = HashMap<String, u64>;

use std::collections::HashMap;
use std::fmt;

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// One disassembled instruction, as handed over by the host disassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Address of the instruction
    pub addr: Address,
    /// Size of the instruction in bytes
    pub size: u8,
    /// Instruction mnemonic (e.g., "je", "b.eq")
    pub mnemonic: String,
    /// Instruction operands as string representation
    pub operands: String,
    /// Raw bytes of the instruction (up to MAX_INSTRUCTION_SIZE)
    pub bytes: [u8; MAX_INSTRUCTION_SIZE],
}

impl Insn {
    /// Build an instruction from its encoding and text. Encodings longer
    /// than `MAX_INSTRUCTION_SIZE` are truncated.
    pub fn new(addr: Address, encoding: &[u8], mnemonic: &str, operands: &str) -> Self {
        let mut bytes = [0u8; MAX_INSTRUCTION_SIZE];
        let size = encoding.len().min(MAX_INSTRUCTION_SIZE);
        bytes[..size].copy_from_slice(&encoding[..size]);
        Self {
            addr,
            size: size as u8,
            mnemonic: mnemonic.to_string(),
            operands: operands.to_string(),
            bytes,
        }
    }

    /// Returns the instruction bytes, up to the actual instruction size.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }

    /// Address of the instruction that follows this one.
    pub fn next_addr(&self) -> Address {
        self.addr.wrapping_add(self.size as Address)
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{}\t{}", self.mnemonic, self.operands)
        }
    }
}

/// A mapped range of the inspected address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// First address of the region
    pub start: Address,
    /// One past the last address of the region
    pub end: Address,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// Backing file or label (e.g. "[stack]"), if the host knows one
    pub name: Option<String>,
}

impl MemoryRegion {
    /// Create a new unnamed region
    pub fn new(start: Address, end: Address, readable: bool, writable: bool, executable: bool) -> Self {
        Self {
            start,
            end,
            readable,
            writable,
            executable,
            name: None,
        }
    }

    /// Attach a name to this region
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Whether `addr` falls inside `[start, end)`
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Permission string in `rwx` form
    pub fn perms(&self) -> String {
        let mut perms = String::with_capacity(3);
        perms.push(if self.readable { 'r' } else { '-' });
        perms.push(if self.writable { 'w' } else { '-' });
        perms.push(if self.executable { 'x' } else { '-' });
        perms
    }
}

/// A symbol that covers some address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    /// Module (file name) the symbol lives in; empty when unknown
    pub module: String,
    /// Distance from the symbol start to the queried address
    pub offset: u64,
}

impl SymbolInfo {
    pub fn new(name: &str, module: &str, offset: u64) -> Self {
        Self {
            name: name.to_string(),
            module: module.to_string(),
            offset,
        }
    }
}

/// Read-only access to the inspected process memory.
pub trait MemoryReader {
    /// Read exactly `size` bytes at `addr`, or `None` if any of them is unreadable.
    fn read(&self, addr: Address, size: usize) -> Option<Vec<u8>>;

    /// Read one little-endian pointer of `ptr_size` bytes (1..=8).
    fn read_pointer(&self, addr: Address, ptr_size: usize) -> Option<u64> {
        if ptr_size == 0 || ptr_size > 8 {
            return None;
        }
        let data = self.read(addr, ptr_size)?;
        if data.len() < ptr_size {
            return None;
        }
        let mut raw = [0u8; 8];
        raw[..ptr_size].copy_from_slice(&data[..ptr_size]);
        Some(u64::from_le_bytes(raw))
    }
}

/// Address-to-symbol lookup supplied by the host.
pub trait SymbolResolver {
    fn resolve(&self, addr: Address) -> Option<SymbolInfo>;
}

/// A `MemoryReader` over captured byte segments.
///
/// Useful for hosts that snapshot memory up front, and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySegments {
    segments: Vec<(Address, Vec<u8>)>,
}

impl MemorySegments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment starting at `start`
    pub fn with_segment(mut self, start: Address, data: Vec<u8>) -> Self {
        self.segments.push((start, data));
        self
    }
}

impl MemoryReader for MemorySegments {
    fn read(&self, addr: Address, size: usize) -> Option<Vec<u8>> {
        for (start, data) in &self.segments {
            let end = start.checked_add(data.len() as Address)?;
            let last = addr.checked_add(size as Address)?;
            if addr >= *start && last <= end {
                let offset = (addr - start) as usize;
                return Some(data[offset..offset + size].to_vec());
            }
        }
        None
    }
}

impl SymbolResolver for HashMap<Address, SymbolInfo> {
    fn resolve(&self, addr: Address) -> Option<SymbolInfo> {
        self.get(&addr).cloned()
    }
}

/// Error type for configuration and output surfaces.
///
/// Architecture queries never fail; they answer `None` instead.
#[derive(Debug, thiserror::Error)]
pub enum IsaError {
    /// Named calling convention is not in the table
    #[error("Unknown ABI: {0}")]
    UnknownAbi(String),

    /// Calling convention exists but belongs to another family
    #[error("ABI {abi} is not compatible with architecture {arch}")]
    IncompatibleAbi { abi: String, arch: String },

    /// Settings failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insn_bytes() {
        let insn = Insn::new(0x1000, &[0x01, 0xd8, 0x90], "add", "eax, ebx");

        assert_eq!(insn.bytes(), &[0x01, 0xd8, 0x90]);
        assert_eq!(insn.next_addr(), 0x1003);
        assert_eq!(insn.to_string(), "add\teax, ebx");
    }

    #[test]
    fn test_insn_truncates_long_encoding() {
        let insn = Insn::new(0, &[0x90; 20], "nop", "");
        assert_eq!(insn.size as usize, MAX_INSTRUCTION_SIZE);
        assert_eq!(insn.to_string(), "nop");
    }

    #[test]
    fn test_region_contains_is_half_open() {
        let region = MemoryRegion::new(0x1000, 0x2000, true, false, true);
        assert!(region.contains(0x1000));
        assert!(region.contains(0x1fff));
        assert!(!region.contains(0x2000));
        assert_eq!(region.perms(), "r-x");
    }

    #[test]
    fn test_segments_read_pointer() {
        let mem = MemorySegments::new()
            .with_segment(0x1000, 0x2000u64.to_le_bytes().to_vec());

        assert_eq!(mem.read_pointer(0x1000, 8), Some(0x2000));
        assert_eq!(mem.read_pointer(0x1000, 4), Some(0x2000));
        // Straddles the end of the segment
        assert_eq!(mem.read_pointer(0x1004, 8), None);
        assert_eq!(mem.read_pointer(0x1000, 0), None);
        assert_eq!(mem.read(0x0, 1), None);
    }
}
