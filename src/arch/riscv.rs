//! RISC-V, 32 and 64 bit.
//!
//! Hosts report the integer registers either by ABI name (`a0`, `ra`) or by
//! number (`x10`, `x1`); each width therefore has one profile per naming.
//! There is no flags register: conditional branches compare registers.

use super::operand::{
    normalize_reg, parse_base_offset, parse_immediate, parse_target_operand, resolve_reg_operand,
    split_operands,
};
use super::{
    mask, normalize_mnemonic, to_signed, zero_reason, Aliases, ArchBehavior, ArchProfile,
    BranchDecision, BranchKind, Isa,
};
use crate::abi::{RISCV, RISCV_X};
use crate::{MemoryReader, Registers};

/// ABI name to numbered register
pub const ABI_NAMES: [(&str, &str); 33] = [
    ("zero", "x0"),
    ("ra", "x1"),
    ("sp", "x2"),
    ("gp", "x3"),
    ("tp", "x4"),
    ("t0", "x5"),
    ("t1", "x6"),
    ("t2", "x7"),
    ("s0", "x8"),
    ("fp", "x8"),
    ("s1", "x9"),
    ("a0", "x10"),
    ("a1", "x11"),
    ("a2", "x12"),
    ("a3", "x13"),
    ("a4", "x14"),
    ("a5", "x15"),
    ("a6", "x16"),
    ("a7", "x17"),
    ("s2", "x18"),
    ("s3", "x19"),
    ("s4", "x20"),
    ("s5", "x21"),
    ("s6", "x22"),
    ("s7", "x23"),
    ("s8", "x24"),
    ("s9", "x25"),
    ("s10", "x26"),
    ("s11", "x27"),
    ("t3", "x28"),
    ("t4", "x29"),
    ("t5", "x30"),
    ("t6", "x31"),
];

const X_GPRS: [&str; 33] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "x31", "pc",
];

const ABI_GPRS: [&str; 34] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "fp", "s1", "a0", "a1", "a2", "a3",
    "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3",
    "t4", "t5", "t6", "pc",
];

const CALL_MNEMONICS: [&str; 5] = ["jal", "jalr", "call", "c.jal", "c.jalr"];

const COMPARE_BRANCHES: [&str; 6] = ["beq", "bne", "blt", "bge", "bltu", "bgeu"];
const ZERO_BRANCHES: [&str; 4] = ["beqz", "bnez", "c.beqz", "c.bnez"];
const JUMPS: [&str; 10] = ["b", "j", "jr", "jal", "jalr", "c.j", "c.jr", "c.jal", "c.jalr", "ret"];

const NOP: [u8; 4] = [0x13, 0x00, 0x00, 0x00];
const EBREAK: [u8; 4] = [0x73, 0x00, 0x10, 0x00];

pub static RISCV32: ArchProfile = ArchProfile {
    name: "riscv32",
    isa: Isa::RiscV32,
    ptr_size: 4,
    gpr_names: &ABI_GPRS,
    pc_reg: "pc",
    sp_reg: "sp",
    flags_reg: None,
    special_regs: &[],
    max_inst_bytes: 4,
    return_reg: Some("a0"),
    nop_bytes: &NOP,
    break_bytes: &EBREAK,
    abi: Some(&RISCV),
    call_mnemonics: &CALL_MNEMONICS,
};

pub static RISCV32_X: ArchProfile = ArchProfile {
    name: "riscv32",
    isa: Isa::RiscV32,
    ptr_size: 4,
    gpr_names: &X_GPRS,
    pc_reg: "pc",
    sp_reg: "x2",
    flags_reg: None,
    special_regs: &[],
    max_inst_bytes: 4,
    return_reg: Some("x10"),
    nop_bytes: &NOP,
    break_bytes: &EBREAK,
    abi: Some(&RISCV_X),
    call_mnemonics: &CALL_MNEMONICS,
};

pub static RISCV64: ArchProfile = ArchProfile {
    name: "riscv64",
    isa: Isa::RiscV64,
    ptr_size: 8,
    gpr_names: &ABI_GPRS,
    pc_reg: "pc",
    sp_reg: "sp",
    flags_reg: None,
    special_regs: &[],
    max_inst_bytes: 4,
    return_reg: Some("a0"),
    nop_bytes: &NOP,
    break_bytes: &EBREAK,
    abi: Some(&RISCV),
    call_mnemonics: &CALL_MNEMONICS,
};

pub static RISCV64_X: ArchProfile = ArchProfile {
    name: "riscv64",
    isa: Isa::RiscV64,
    ptr_size: 8,
    gpr_names: &X_GPRS,
    pc_reg: "pc",
    sp_reg: "x2",
    flags_reg: None,
    special_regs: &[],
    max_inst_bytes: 4,
    return_reg: Some("x10"),
    nop_bytes: &NOP,
    break_bytes: &EBREAK,
    abi: Some(&RISCV_X),
    call_mnemonics: &CALL_MNEMONICS,
};

fn is_zero_reg(name: &str) -> bool {
    matches!(normalize_reg(name).as_str(), "x0" | "zero")
}

pub struct RiscvBehavior;

impl RiscvBehavior {
    /// Register value; the hard-wired zero register reads 0 even when absent.
    fn read_reg(&self, name: &str, regs: &Registers, aliases: &Aliases) -> Option<u64> {
        resolve_reg_operand(name, regs, aliases).or_else(|| is_zero_reg(name).then_some(0))
    }

    fn base_or_reg(&self, op: &str, regs: &Registers, aliases: &Aliases) -> Option<u64> {
        parse_base_offset(op, regs, aliases)
            .map(|mem| mem.addr)
            .or_else(|| resolve_reg_operand(op, regs, aliases))
    }
}

impl ArchBehavior for RiscvBehavior {
    fn is_conditional_branch(&self, mnemonic: &str) -> bool {
        let mnem = normalize_mnemonic(mnemonic);
        COMPARE_BRANCHES.contains(&mnem.as_str()) || ZERO_BRANCHES.contains(&mnem.as_str())
    }

    fn is_unconditional_branch(&self, mnemonic: &str) -> bool {
        matches!(normalize_mnemonic(mnemonic).as_str(), "b" | "j" | "jr" | "c.j" | "c.jr")
    }

    fn is_branch_like(&self, profile: &ArchProfile, mnemonic: &str) -> bool {
        let mnem = normalize_mnemonic(mnemonic);
        self.is_conditional_branch(&mnem)
            || JUMPS.contains(&mnem.as_str())
            || self.is_call(profile, &mnem)
            || self.is_return(&mnem)
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

        if ZERO_BRANCHES.contains(&mnem.as_str()) {
            let reg = *parts.first()?;
            let value = self.read_reg(reg, regs, &aliases)?;
            let taken = if mnem.ends_with("beqz") { value == 0 } else { value != 0 };
            return Some(BranchDecision::new(taken, zero_reason(reg, value), BranchKind::Conditional));
        }
        if !COMPARE_BRANCHES.contains(&mnem.as_str()) || parts.len() < 2 {
            return None;
        }

        let (lhs_name, rhs_name) = (parts[0], parts[1]);
        let lhs = self.read_reg(lhs_name, regs, &aliases)?;
        let rhs = self.read_reg(rhs_name, regs, &aliases)?;
        let bits = (profile.ptr_size.max(1) * 8) as u32;

        let (taken, holds, fails) = match mnem.as_str() {
            "beq" => (lhs == rhs, "==", "!="),
            "bne" => (lhs != rhs, "!=", "=="),
            "blt" => (to_signed(lhs, bits) < to_signed(rhs, bits), "<", ">="),
            "bge" => (to_signed(lhs, bits) >= to_signed(rhs, bits), ">=", "<"),
            "bltu" => (mask(lhs, bits) < mask(rhs, bits), "<", ">="),
            "bgeu" => (mask(lhs, bits) >= mask(rhs, bits), ">=", "<"),
            _ => return None,
        };
        let op = if taken { holds } else { fails };
        Some(BranchDecision::new(
            taken,
            format!("{}{}{}", lhs_name, op, rhs_name),
            BranchKind::Conditional,
        ))
    }

    fn always_taken(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        operands: &str,
        include_unconditional: bool,
        include_calls: bool,
    ) -> Option<BranchDecision> {
        let mnem = normalize_mnemonic(mnemonic);
        // A jump-and-link that discards the link register is a plain jump
        if include_unconditional && matches!(mnem.as_str(), "jal" | "jalr" | "c.jal" | "c.jalr") {
            let parts = split_operands(operands);
            if parts.len() > 1 && is_zero_reg(parts[0]) {
                return Some(BranchDecision::new(true, "", BranchKind::Unconditional));
            }
        }
        if include_calls && self.is_call(profile, &mnem) {
            return Some(BranchDecision::new(true, "", BranchKind::Call));
        }
        if include_unconditional && self.is_return(&mnem) {
            return Some(BranchDecision::new(true, "", BranchKind::Return));
        }
        if include_unconditional && self.is_unconditional_branch(&mnem) {
            return Some(BranchDecision::new(true, "", BranchKind::Unconditional));
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
        let mnem = normalize_mnemonic(mnemonic);
        let aliases = self.operand_aliases(profile, regs);
        let parts = split_operands(operands);

        match mnem.as_str() {
            "ret" => resolve_reg_operand("ra", regs, &aliases),
            m if ZERO_BRANCHES.contains(&m) => parse_target_operand(parts.get(1)?, regs, &aliases),
            m if COMPARE_BRANCHES.contains(&m) => parse_target_operand(parts.get(2)?, regs, &aliases),
            "jal" | "c.jal" | "call" if parts.len() > 1 => {
                parse_target_operand(parts[1], regs, &aliases)
            }
            "jr" | "c.jr" | "c.jalr" => self.base_or_reg(parts.first()?, regs, &aliases),
            "jalr" => {
                if parts.len() == 1 {
                    return self.base_or_reg(parts[0], regs, &aliases);
                }
                let base = self.base_or_reg(parts.get(1)?, regs, &aliases)?;
                let offset = parts.get(2).and_then(|op| parse_immediate(op)).unwrap_or(0);
                Some(base.wrapping_add(offset))
            }
            _ => parse_target_operand(parts.first()?, regs, &aliases),
        }
    }

    fn register_aliases(&self, profile: &ArchProfile, regs: &Registers) -> Aliases {
        let numbered = profile.gpr_names.contains(&"x0");
        let mut aliases = Aliases::new();
        for (abi_name, x_name) in ABI_NAMES {
            if numbered {
                if regs.contains_key(x_name) {
                    aliases.insert(abi_name.to_string(), x_name.to_string());
                }
            } else if abi_name != "fp" && regs.contains_key(abi_name) {
                aliases.insert(x_name.to_string(), abi_name.to_string());
            }
        }
        if !numbered && regs.contains_key("s0") {
            aliases.insert("fp".to_string(), "s0".to_string());
        }
        aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn regs(pairs: &[(&str, u64)]) -> Registers {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_classification() {
        assert!(RISCV64.is_conditional_branch("bgeu"));
        assert!(RISCV64.is_conditional_branch("c.beqz"));
        assert!(RISCV64.is_unconditional_branch("j"));
        assert!(RISCV64.is_call("jal"));
        assert!(RISCV64.is_call("call"));
        assert!(RISCV64.is_return("ret"));
        assert!(RISCV64.is_branch_like("c.jr"));
        assert!(!RISCV64.is_branch_like("addi"));
        assert_eq!(RISCV64.format_flags(0xffff), "");
        assert_eq!(RISCV64.branch_taken("beq", 0), (false, String::new()));
    }

    #[rstest]
    #[case("beq", 5, 5, true, "a0==a1")]
    #[case("beq", 5, 6, false, "a0!=a1")]
    #[case("bne", 5, 6, true, "a0!=a1")]
    #[case("blt", u64::MAX, 0, true, "a0<a1")]
    #[case("bltu", u64::MAX, 0, false, "a0>=a1")]
    #[case("bge", 0, u64::MAX, true, "a0>=a1")]
    #[case("bgeu", 0, u64::MAX, false, "a0<a1")]
    fn test_compare_branches(
        #[case] mnem: &str,
        #[case] a0: u64,
        #[case] a1: u64,
        #[case] taken: bool,
        #[case] reason: &str,
    ) {
        let regs = regs(&[("a0", a0), ("a1", a1)]);
        let d = RISCV64.branch_decision(mnem, "a0, a1, 0x1000", &regs, 0, false, false).unwrap();
        assert_eq!(d, BranchDecision::new(taken, reason, BranchKind::Conditional));
    }

    #[test]
    fn test_compare_is_signed_at_profile_width() {
        // 0xffff_ffff is -1 on rv32 but positive on rv64
        let regs = regs(&[("a0", 0xffff_ffff), ("a1", 0)]);
        assert!(RISCV32.branch_decision("blt", "a0, a1, 0x10", &regs, 0, false, false).unwrap().taken);
        assert!(!RISCV64.branch_decision("blt", "a0, a1, 0x10", &regs, 0, false, false).unwrap().taken);
    }

    #[test]
    fn test_zero_branches_and_zero_register() {
        let regs = regs(&[("a0", 0)]);
        let d = RISCV64.branch_decision("beqz", "a0, 0x10", &regs, 0, false, false).unwrap();
        assert_eq!(d, BranchDecision::new(true, "a0=0", BranchKind::Conditional));
        let d = RISCV64.branch_decision("bne", "a0, zero, 0x10", &regs, 0, false, false).unwrap();
        assert!(!d.taken);
        assert!(RISCV64.branch_decision("beqz", "a5, 0x10", &regs, 0, false, false).is_none());
    }

    #[test]
    fn test_jal_to_zero_is_a_jump() {
        let regs = Registers::new();
        let d = RISCV64.branch_decision("jal", "zero, 0x1000", &regs, 0, true, true).unwrap();
        assert_eq!(d.kind, BranchKind::Unconditional);
        let d = RISCV64.branch_decision("jalr", "x0, 0(ra)", &regs, 0, true, true).unwrap();
        assert_eq!(d.kind, BranchKind::Unconditional);
        let d = RISCV64.branch_decision("jal", "ra, 0x1000", &regs, 0, true, true).unwrap();
        assert_eq!(d.kind, BranchKind::Call);
        let d = RISCV64.branch_decision("jal", "0x1000", &regs, 0, true, true).unwrap();
        assert_eq!(d.kind, BranchKind::Call);
        assert_eq!(
            RISCV64.branch_decision("jal", "zero, 0x1000", &regs, 0, false, true).map(|d| d.kind),
            Some(BranchKind::Call)
        );
    }

    #[test]
    fn test_resolve_targets() {
        let regs = regs(&[("ra", 0x2000), ("sp", 0x8000), ("a5", 0x3000), ("a0", 0)]);
        assert_eq!(RISCV64.resolve_flow_target("ret", "", &regs, None, None), Some(0x2000));
        assert_eq!(RISCV64.resolve_flow_target("beqz", "a0, 0x1010", &regs, None, None), Some(0x1010));
        assert_eq!(RISCV64.resolve_flow_target("bne", "a0, a5, 0x1020", &regs, None, None), Some(0x1020));
        assert_eq!(RISCV64.resolve_flow_target("jal", "0x1030", &regs, None, None), Some(0x1030));
        assert_eq!(RISCV64.resolve_flow_target("jal", "ra, 0x1040 <f>", &regs, None, None), Some(0x1040));
        assert_eq!(RISCV64.resolve_flow_target("jr", "a5", &regs, None, None), Some(0x3000));
        assert_eq!(RISCV64.resolve_flow_target("jalr", "ra, 8(a5)", &regs, None, None), Some(0x3008));
        assert_eq!(RISCV64.resolve_flow_target("jalr", "ra, a5, -8", &regs, None, None), Some(0x2ff8));
        assert_eq!(RISCV64.resolve_flow_target("c.jalr", "a5", &regs, None, None), Some(0x3000));
        assert_eq!(RISCV64.resolve_flow_target("bne", "a0, a5", &regs, None, None), None);
    }

    #[test]
    fn test_numbered_profile_aliases() {
        let regs = regs(&[("x1", 0x2000), ("x2", 0x8000), ("x8", 0x10)]);
        let aliases = RISCV64_X.register_aliases(&regs);
        assert_eq!(aliases.get("ra").map(String::as_str), Some("x1"));
        assert_eq!(aliases.get("fp").map(String::as_str), Some("x8"));
        assert_eq!(RISCV64_X.resolve_flow_target("ret", "", &regs, None, None), Some(0x2000));
        assert_eq!(RISCV64_X.mem_operand_targets("a0, 16(sp)", &regs), vec![0x8010]);
    }

    #[test]
    fn test_abi_profile_aliases() {
        let aliases = RISCV64.register_aliases(&regs(&[("ra", 1), ("s0", 2)]));
        assert_eq!(aliases.get("x1").map(String::as_str), Some("ra"));
        assert_eq!(aliases.get("x8").map(String::as_str), Some("s0"));
        assert_eq!(aliases.get("fp").map(String::as_str), Some("s0"));
    }
}
