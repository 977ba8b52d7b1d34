//! 32-bit ARM and Thumb.
//!
//! Condition codes are written as a mnemonic suffix (`bne`, `bleq`) or after a
//! dot (`b.ne`); Thumb-2 width qualifiers (`.w`, `.n`) are ignored.

use super::operand::{parse_target_operand, resolve_reg_operand, split_operands};
use super::{
    cond, format_flag_bits, mask, normalize_mnemonic, zero_reason, Aliases, ArchBehavior,
    ArchProfile, BranchDecision, BranchKind, Condition, Isa,
};
use crate::abi::AAPCS32;
use crate::{MemoryReader, Registers};

const FLAG_LETTERS: [(char, u32); 9] = [
    ('N', cond::FLAG_N),
    ('Z', cond::FLAG_Z),
    ('C', cond::FLAG_C),
    ('V', cond::FLAG_V),
    ('Q', 27),
    ('A', 8),
    ('I', 7),
    ('F', 6),
    ('T', 5),
];

const BRANCH_BASES: [&str; 4] = ["b", "bl", "bx", "blx"];
const CALL_BASES: [&str; 2] = ["bl", "blx"];

/// Alternate spelling to canonical register
const REG_ALIASES: [(&str, &str); 7] = [
    ("r13", "sp"),
    ("r14", "lr"),
    ("r15", "pc"),
    ("ip", "r12"),
    ("fp", "r11"),
    ("sl", "r10"),
    ("sb", "r9"),
];

pub static ARM32: ArchProfile = ArchProfile {
    name: "arm32",
    isa: Isa::Arm32,
    ptr_size: 4,
    gpr_names: &[
        "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp",
        "lr", "pc", "r13", "r14", "r15", "cpsr", "psr",
    ],
    pc_reg: "pc",
    sp_reg: "sp",
    flags_reg: Some("cpsr"),
    special_regs: &["sp", "lr", "pc"],
    max_inst_bytes: 4,
    return_reg: Some("r0"),
    nop_bytes: &[0x00, 0x00, 0xa0, 0xe1],
    break_bytes: &[0x70, 0x00, 0x20, 0xe1],
    abi: Some(&AAPCS32),
    call_mnemonics: &["bl", "blx"],
};

/// Split `mnemonic` into base and condition suffix.
pub fn split_condition(mnemonic: &str) -> (String, Option<String>) {
    let mut mnem = normalize_mnemonic(mnemonic);
    for qualifier in [".w", ".n"] {
        if let Some(stripped) = mnem.strip_suffix(qualifier) {
            mnem = stripped.to_string();
        }
    }
    if let Some((base, suffix)) = mnem.split_once('.') {
        if cond::CONDITIONS.contains(&suffix) {
            return (base.to_string(), Some(suffix.to_string()));
        }
    }
    if mnem.len() > 2 && mnem.is_char_boundary(mnem.len() - 2) {
        let (base, suffix) = mnem.split_at(mnem.len() - 2);
        if cond::CONDITIONS.contains(&suffix) {
            return (base.to_string(), Some(suffix.to_string()));
        }
    }
    (mnem, None)
}

pub struct Arm32Behavior;

impl ArchBehavior for Arm32Behavior {
    fn format_flags(&self, value: u64) -> String {
        format_flag_bits(value, &FLAG_LETTERS)
    }

    fn is_conditional_branch(&self, mnemonic: &str) -> bool {
        let (base, cond) = split_condition(mnemonic);
        if base == "cbz" || base == "cbnz" {
            return true;
        }
        cond.is_some() && BRANCH_BASES.contains(&base.as_str())
    }

    fn is_unconditional_branch(&self, mnemonic: &str) -> bool {
        let (base, cond) = split_condition(mnemonic);
        matches!(base.as_str(), "b" | "bx") && cond.as_deref().map_or(true, |c| c == "al")
    }

    fn is_call(&self, _profile: &ArchProfile, mnemonic: &str) -> bool {
        let (base, _) = split_condition(mnemonic);
        CALL_BASES.contains(&base.as_str())
    }

    fn condition(&self, mnemonic: &str, flags: u64) -> Option<Condition> {
        let (_, suffix) = split_condition(mnemonic);
        cond::evaluate(&suffix?, flags)
    }

    fn register_branch(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        _flags: u64,
    ) -> Option<BranchDecision> {
        let (base, _) = split_condition(mnemonic);
        if base != "cbz" && base != "cbnz" {
            return None;
        }
        let parts = split_operands(operands);
        if parts.len() < 2 {
            return None;
        }
        let reg = parts[0];
        let aliases = self.operand_aliases(profile, regs);
        let value = mask(resolve_reg_operand(reg, regs, &aliases)?, Self::width(profile));
        let taken = if base == "cbz" { value == 0 } else { value != 0 };
        Some(BranchDecision::new(taken, zero_reason(reg, value), BranchKind::Conditional))
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
        let (base, _) = split_condition(mnemonic);
        let aliases = self.operand_aliases(profile, regs);
        let parts = split_operands(operands);
        let index = if base == "cbz" || base == "cbnz" { 1 } else { 0 };
        let target = parse_target_operand(parts.get(index)?, regs, &aliases)?;
        Some(mask(target, Self::width(profile)))
    }

    fn register_aliases(&self, _profile: &ArchProfile, regs: &Registers) -> Aliases {
        REG_ALIASES
            .iter()
            .filter(|(_, canonical)| regs.contains_key(*canonical))
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect()
    }

    fn operand_aliases(&self, profile: &ArchProfile, regs: &Registers) -> Aliases {
        let mut aliases = self.register_aliases(profile, regs);
        // Hosts that only report r13/r14/r15 still need sp/lr/pc in operands
        for (alias, canonical) in REG_ALIASES {
            if regs.contains_key(alias) && !regs.contains_key(canonical) {
                aliases
                    .entry(canonical.to_string())
                    .or_insert_with(|| alias.to_string());
            }
        }
        aliases
    }
}

impl Arm32Behavior {
    /// Register width; values from 64-bit hosts are truncated to it.
    fn width(profile: &ArchProfile) -> u32 {
        (profile.ptr_size * 8) as u32
    }
}
