//! AArch64.

use super::operand::{
    normalize_reg, parse_immediate, parse_target_operand, resolve_reg_operand, split_operands,
};
use super::{
    cond, format_flag_bits, mask, normalize_mnemonic, zero_reason, Aliases, ArchBehavior,
    ArchProfile, BranchDecision, BranchKind, Condition, Isa,
};
use crate::abi::AAPCS64;
use crate::{MemoryReader, Registers};

const FLAG_LETTERS: [(char, u32); 7] = [
    ('N', cond::FLAG_N),
    ('Z', cond::FLAG_Z),
    ('C', cond::FLAG_C),
    ('V', cond::FLAG_V),
    ('A', 8),
    ('I', 7),
    ('F', 6),
];

const BRANCH_MNEMONICS: [&str; 9] = ["b", "bl", "blr", "br", "ret", "cbz", "cbnz", "tbz", "tbnz"];

pub static ARM64: ArchProfile = ArchProfile {
    name: "arm64",
    isa: Isa::Arm64,
    ptr_size: 8,
    gpr_names: &[
        "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13",
        "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26",
        "x27", "x28", "fp", "lr", "sp", "pc", "cpsr",
    ],
    pc_reg: "pc",
    sp_reg: "sp",
    flags_reg: Some("cpsr"),
    special_regs: &["fp", "lr"],
    max_inst_bytes: 4,
    return_reg: Some("x0"),
    nop_bytes: &[0x1f, 0x20, 0x03, 0xd5],
    break_bytes: &[0x00, 0x00, 0x20, 0xd4],
    abi: Some(&AAPCS64),
    call_mnemonics: &["bl", "blr"],
};

pub struct Arm64Behavior;

fn numbered(name: &str, prefix: char) -> Option<&str> {
    let digits = name.strip_prefix(prefix)?;
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

impl Arm64Behavior {
    /// Register value, truncated to 32 bits for `w` views.
    fn read_reg(&self, name: &str, regs: &Registers, aliases: &Aliases) -> Option<u64> {
        let key = normalize_reg(name);
        if key == "wzr" || key == "xzr" {
            return Some(0);
        }
        let value = resolve_reg_operand(&key, regs, aliases)?;
        if numbered(&key, 'w').is_some() {
            Some(mask(value, 32))
        } else {
            Some(value)
        }
    }
}

impl ArchBehavior for Arm64Behavior {
    fn format_flags(&self, value: u64) -> String {
        format_flag_bits(value, &FLAG_LETTERS)
    }

    fn is_conditional_branch(&self, mnemonic: &str) -> bool {
        normalize_mnemonic(mnemonic).starts_with("b.")
    }

    fn is_unconditional_branch(&self, mnemonic: &str) -> bool {
        matches!(normalize_mnemonic(mnemonic).as_str(), "b" | "br")
    }

    fn is_branch_like(&self, _profile: &ArchProfile, mnemonic: &str) -> bool {
        let mnem = normalize_mnemonic(mnemonic);
        BRANCH_MNEMONICS.contains(&mnem.as_str()) || self.is_conditional_branch(&mnem)
    }

    fn condition(&self, mnemonic: &str, flags: u64) -> Option<Condition> {
        let mnem = normalize_mnemonic(mnemonic);
        let suffix = mnem.strip_prefix("b.")?;
        cond::evaluate(suffix, flags)
    }

    fn register_branch(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        _flags: u64,
    ) -> Option<BranchDecision> {
        let mnem = normalize_mnemonic(mnemonic);
        let parts = split_operands(operands);
        let aliases = self.operand_aliases(profile, regs);

        match mnem.as_str() {
            "cbz" | "cbnz" => {
                let reg = *parts.first()?;
                let value = self.read_reg(reg, regs, &aliases)?;
                let taken = if mnem == "cbz" { value == 0 } else { value != 0 };
                Some(BranchDecision::new(taken, zero_reason(reg, value), BranchKind::Conditional))
            }
            "tbz" | "tbnz" => {
                if parts.len() < 2 {
                    return None;
                }
                let reg = parts[0];
                let value = self.read_reg(reg, regs, &aliases)?;
                let bit = parse_immediate(parts[1])?;
                if bit >= 64 {
                    return None;
                }
                let bit_set = (value >> bit) & 1;
                let taken = if mnem == "tbz" { bit_set == 0 } else { bit_set == 1 };
                Some(BranchDecision::new(
                    taken,
                    format!("{}[{}]={}", reg, bit, bit_set),
                    BranchKind::Conditional,
                ))
            }
            _ => None,
        }
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
        let mnem = normalize_mnemonic(mnemonic);
        let aliases = self.operand_aliases(profile, regs);
        let parts = split_operands(operands);

        if mnem.starts_with("ret") {
            if let Some(op) = parts.first() {
                return parse_target_operand(op, regs, &aliases);
            }
            return resolve_reg_operand("lr", regs, &aliases)
                .or_else(|| resolve_reg_operand("x30", regs, &aliases));
        }
        let index = match mnem.as_str() {
            "cbz" | "cbnz" => 1,
            "tbz" | "tbnz" => 2,
            _ => 0,
        };
        parse_target_operand(parts.get(index)?, regs, &aliases)
    }

    fn register_aliases(&self, _profile: &ArchProfile, regs: &Registers) -> Aliases {
        let mut aliases = Aliases::new();
        for name in regs.keys() {
            if let Some(digits) = numbered(name, 'x') {
                aliases.insert(format!("w{}", digits), name.clone());
            }
        }
        if aliases.is_empty() {
            return aliases;
        }
        if regs.contains_key("fp") {
            aliases.insert("x29".to_string(), "fp".to_string());
            aliases.insert("w29".to_string(), "fp".to_string());
        }
        if regs.contains_key("lr") {
            aliases.insert("x30".to_string(), "lr".to_string());
            aliases.insert("w30".to_string(), "lr".to_string());
        }
        aliases
    }
}
