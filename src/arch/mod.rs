//! Architecture profiles and their instruction-set behavior.
//!
//! An [`ArchProfile`] is a process-lifetime constant describing one
//! instruction set: register names, pointer width, trap and no-op encodings,
//! and the default calling convention. Behavior that differs per instruction
//! set (branch classification, condition codes, operand grammar, register
//! aliasing) lives behind the [`ArchBehavior`] trait, with one implementation
//! per family selected through [`Isa`].

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::abi::AbiSpec;
use crate::family::ArchFamily;
use crate::{MemoryReader, Registers};

pub mod cond;
pub mod operand;
pub mod arm32;
pub mod arm64;
pub mod riscv;
pub mod x86;

pub use self::arm32::ARM32;
pub use self::arm64::ARM64;
pub use self::riscv::{RISCV32, RISCV32_X, RISCV64, RISCV64_X};
pub use self::x86::{X86, X86_64};

/// Alias name to canonical register name.
pub type Aliases = HashMap<String, String>;

/// Instruction sets with their own behavior implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Isa {
    /// 32-bit x86
    X86,
    /// 64-bit x86
    X86_64,
    /// ARM (32-bit, including Thumb)
    Arm32,
    /// AArch64
    Arm64,
    /// RISC-V 32-bit
    RiscV32,
    /// RISC-V 64-bit
    RiscV64,
}

impl Isa {
    /// Behavior implementation for this instruction set
    pub fn behavior(&self) -> &'static dyn ArchBehavior {
        match self {
            Isa::X86 | Isa::X86_64 => &x86::X86Behavior,
            Isa::Arm32 => &arm32::Arm32Behavior,
            Isa::Arm64 => &arm64::Arm64Behavior,
            Isa::RiscV32 | Isa::RiscV64 => &riscv::RiscvBehavior,
        }
    }

    pub fn family(&self) -> ArchFamily {
        match self {
            Isa::X86 => ArchFamily::X86,
            Isa::X86_64 => ArchFamily::X86_64,
            Isa::Arm32 => ArchFamily::Arm32,
            Isa::Arm64 => ArchFamily::Arm64,
            Isa::RiscV32 | Isa::RiscV64 => ArchFamily::RiscV,
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isa::X86 => write!(f, "x86-32"),
            Isa::X86_64 => write!(f, "x86-64"),
            Isa::Arm32 => write!(f, "ARM"),
            Isa::Arm64 => write!(f, "AArch64"),
            Isa::RiscV32 => write!(f, "RISC-V 32"),
            Isa::RiscV64 => write!(f, "RISC-V 64"),
        }
    }
}

/// What kind of control transfer a decision describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    Conditional,
    Unconditional,
    Call,
    Return,
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchKind::Conditional => write!(f, "conditional"),
            BranchKind::Unconditional => write!(f, "unconditional"),
            BranchKind::Call => write!(f, "call"),
            BranchKind::Return => write!(f, "return"),
        }
    }
}

/// Verdict for one control-transfer instruction at the current stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchDecision {
    pub taken: bool,
    /// Observed flag or register state behind the verdict; may be empty
    pub reason: String,
    pub kind: BranchKind,
}

impl BranchDecision {
    pub fn new(taken: bool, reason: impl Into<String>, kind: BranchKind) -> Self {
        Self {
            taken,
            reason: reason.into(),
            kind,
        }
    }

    fn always(kind: BranchKind) -> Self {
        Self::new(true, "", kind)
    }
}

/// Static description of one instruction set.
#[derive(Debug, Serialize)]
pub struct ArchProfile {
    /// ISA name; several profiles may share one
    pub name: &'static str,
    pub isa: Isa,
    pub ptr_size: usize,
    pub gpr_names: &'static [&'static str],
    pub pc_reg: &'static str,
    pub sp_reg: &'static str,
    pub flags_reg: Option<&'static str>,
    pub special_regs: &'static [&'static str],
    /// Longest encoding of a single instruction, in bytes
    pub max_inst_bytes: usize,
    pub return_reg: Option<&'static str>,
    pub nop_bytes: &'static [u8],
    pub break_bytes: &'static [u8],
    /// Default calling convention
    pub abi: Option<&'static AbiSpec>,
    /// Mnemonics treated as calls; empty means anything starting with "call"
    pub call_mnemonics: &'static [&'static str],
}

impl ArchProfile {
    pub fn family(&self) -> ArchFamily {
        self.isa.family()
    }

    fn behavior(&self) -> &'static dyn ArchBehavior {
        self.isa.behavior()
    }

    /// Render a flags register value, upper-case letters for set flags.
    pub fn format_flags(&self, value: u64) -> String {
        self.behavior().format_flags(value)
    }

    pub fn is_conditional_branch(&self, mnemonic: &str) -> bool {
        self.behavior().is_conditional_branch(mnemonic)
    }

    pub fn is_unconditional_branch(&self, mnemonic: &str) -> bool {
        self.behavior().is_unconditional_branch(mnemonic)
    }

    pub fn is_call(&self, mnemonic: &str) -> bool {
        self.behavior().is_call(self, mnemonic)
    }

    pub fn is_return(&self, mnemonic: &str) -> bool {
        self.behavior().is_return(mnemonic)
    }

    /// Whether `mnemonic` transfers control in any way.
    pub fn is_branch_like(&self, mnemonic: &str) -> bool {
        self.behavior().is_branch_like(self, mnemonic)
    }

    /// Evaluate the condition code carried by `mnemonic` against `flags`.
    ///
    /// Returns `(false, "")` when there is no condition to evaluate.
    pub fn branch_taken(&self, mnemonic: &str, flags: u64) -> (bool, String) {
        match self.behavior().condition(mnemonic, flags) {
            Some(cond) => (cond.taken, cond.reason),
            None => (false, String::new()),
        }
    }

    /// Numeric target of a control transfer, if it can be determined.
    ///
    /// `reader` is only consulted for memory-relative targets such as the
    /// return address on an x86 stack; `ptr_size` defaults to the profile's.
    pub fn resolve_flow_target(
        &self,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        reader: Option<&dyn MemoryReader>,
        ptr_size: Option<usize>,
    ) -> Option<u64> {
        self.behavior()
            .resolve_flow_target(self, mnemonic, operands, regs, reader, ptr_size)
    }

    /// One verdict for `mnemonic` at the current stop.
    ///
    /// Flag conditions are evaluated first, then counter and compare branches
    /// that read registers; unconditional jumps, returns and calls are only
    /// reported when the caller opts in.
    pub fn branch_decision(
        &self,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        flags: u64,
        include_unconditional: bool,
        include_calls: bool,
    ) -> Option<BranchDecision> {
        let behavior = self.behavior();
        if behavior.is_conditional_branch(mnemonic) {
            if let Some(cond) = behavior.condition(mnemonic, flags) {
                return Some(BranchDecision::new(cond.taken, cond.reason, BranchKind::Conditional));
            }
        }
        if let Some(decision) = behavior.register_branch(self, mnemonic, operands, regs, flags) {
            return Some(decision);
        }
        behavior.always_taken(self, mnemonic, operands, include_unconditional, include_calls)
    }

    /// Alias names derivable from the canonical registers present in `regs`.
    pub fn register_aliases(&self, regs: &Registers) -> Aliases {
        self.behavior().register_aliases(self, regs)
    }

    /// Aliases used to resolve register names in operand text.
    pub fn operand_aliases(&self, regs: &Registers) -> Aliases {
        self.behavior().operand_aliases(self, regs)
    }

    /// Addresses referenced by memory operands with exactly one base register.
    pub fn mem_operand_targets(&self, operands: &str, regs: &Registers) -> Vec<u64> {
        self.behavior().mem_operand_targets(self, operands, regs)
    }
}

impl fmt::Display for ArchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.isa)
    }
}

/// Outcome of evaluating a condition code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub taken: bool,
    pub reason: String,
}

/// Instruction-set specific behavior. Defaults describe an ISA that knows
/// nothing beyond calls and `ret`.
pub trait ArchBehavior: Sync {
    fn format_flags(&self, _value: u64) -> String {
        String::new()
    }

    fn is_conditional_branch(&self, _mnemonic: &str) -> bool {
        false
    }

    fn is_unconditional_branch(&self, _mnemonic: &str) -> bool {
        false
    }

    fn is_call(&self, profile: &ArchProfile, mnemonic: &str) -> bool {
        let mnem = normalize_mnemonic(mnemonic);
        if profile.call_mnemonics.is_empty() {
            return mnem.starts_with("call");
        }
        profile.call_mnemonics.contains(&mnem.as_str())
    }

    fn is_return(&self, mnemonic: &str) -> bool {
        normalize_mnemonic(mnemonic).starts_with("ret")
    }

    fn is_branch_like(&self, profile: &ArchProfile, mnemonic: &str) -> bool {
        self.is_conditional_branch(mnemonic)
            || self.is_unconditional_branch(mnemonic)
            || self.is_call(profile, mnemonic)
            || self.is_return(mnemonic)
    }

    /// Flag-based condition carried by the mnemonic, if any.
    fn condition(&self, _mnemonic: &str, _flags: u64) -> Option<Condition> {
        None
    }

    /// Branches decided by register contents (counters, compare-and-branch).
    fn register_branch(
        &self,
        _profile: &ArchProfile,
        _mnemonic: &str,
        _operands: &str,
        _regs: &Registers,
        _flags: u64,
    ) -> Option<BranchDecision> {
        None
    }

    /// Transfers that always happen, reported only when requested.
    fn always_taken(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        _operands: &str,
        include_unconditional: bool,
        include_calls: bool,
    ) -> Option<BranchDecision> {
        if include_calls && self.is_call(profile, mnemonic) {
            return Some(BranchDecision::always(BranchKind::Call));
        }
        if include_unconditional && self.is_return(mnemonic) {
            return Some(BranchDecision::always(BranchKind::Return));
        }
        if include_unconditional && self.is_unconditional_branch(mnemonic) {
            return Some(BranchDecision::always(BranchKind::Unconditional));
        }
        None
    }

    fn resolve_flow_target(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        _reader: Option<&dyn MemoryReader>,
        _ptr_size: Option<usize>,
    ) -> Option<u64> {
        if !self.is_branch_like(profile, mnemonic) {
            return None;
        }
        let aliases = self.operand_aliases(profile, regs);
        let parts = operand::split_operands(operands);
        operand::parse_target_operand(parts.first()?, regs, &aliases)
    }

    fn register_aliases(&self, _profile: &ArchProfile, _regs: &Registers) -> Aliases {
        Aliases::new()
    }

    /// Names accepted in operand text. Defaults to [`ArchBehavior::register_aliases`];
    /// an ISA whose hosts may report either spelling of a register adds the
    /// reverse direction here.
    fn operand_aliases(&self, profile: &ArchProfile, regs: &Registers) -> Aliases {
        self.register_aliases(profile, regs)
    }

    fn mem_operand_targets(&self, profile: &ArchProfile, operands: &str, regs: &Registers) -> Vec<u64> {
        let aliases = self.operand_aliases(profile, regs);
        operand::mem_operand_targets(operands, regs, &aliases)
    }
}

/// Lower-case, trimmed mnemonic.
pub fn normalize_mnemonic(mnemonic: &str) -> String {
    mnemonic.trim().to_lowercase()
}

/// Render `(letter, bit)` pairs as space-separated letters, upper-case when set.
pub(crate) fn format_flag_bits(value: u64, bits: &[(char, u32)]) -> String {
    bits.iter()
        .map(|(flag, bit)| {
            if value & (1u64 << bit) != 0 {
                flag.to_ascii_uppercase()
            } else {
                flag.to_ascii_lowercase()
            }
        })
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reason text for a register compared against zero.
pub(crate) fn zero_reason(reg: &str, value: u64) -> String {
    if value == 0 {
        format!("{}=0", reg)
    } else {
        format!("{}!=0", reg)
    }
}

pub(crate) fn mask(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

pub(crate) fn to_signed(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let masked = mask(value, bits);
    let shift = 64 - bits;
    ((masked << shift) as i64) >> shift
}

/// Every built-in profile, in registration order.
pub fn builtin_profiles() -> [&'static ArchProfile; 8] {
    [
        &X86_64,
        &X86,
        &ARM64,
        &ARM32,
        &RISCV32,
        &RISCV32_X,
        &RISCV64,
        &RISCV64_X,
    ]
}
