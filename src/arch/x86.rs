//! x86 and x86-64.
//!
//! Both widths share mnemonics and EFLAGS layout; the profile's pointer size
//! picks the counter register and wrap-around width for `loop` and `jcxz`.

use log::debug;

use super::operand::{self, parse_target_operand, resolve_reg_operand};
use super::{
    format_flag_bits, mask, normalize_mnemonic, zero_reason, Aliases, ArchBehavior, ArchProfile,
    BranchDecision, BranchKind, Condition, Isa,
};
use crate::abi::{CDECL, SYSV_X64};
use crate::{MemoryReader, Registers};

pub const FLAG_CF: u32 = 0;
pub const FLAG_PF: u32 = 2;
pub const FLAG_AF: u32 = 4;
pub const FLAG_ZF: u32 = 6;
pub const FLAG_SF: u32 = 7;
pub const FLAG_TF: u32 = 8;
pub const FLAG_IF: u32 = 9;
pub const FLAG_DF: u32 = 10;
pub const FLAG_OF: u32 = 11;

const FLAG_LETTERS: [(char, u32); 9] = [
    ('O', FLAG_OF),
    ('D', FLAG_DF),
    ('I', FLAG_IF),
    ('T', FLAG_TF),
    ('S', FLAG_SF),
    ('Z', FLAG_ZF),
    ('A', FLAG_AF),
    ('P', FLAG_PF),
    ('C', FLAG_CF),
];

/// Jcc mnemonics, synonyms included
pub const CONDITIONAL_MNEMONICS: [&str; 30] = [
    "jo", "jno", "js", "jns", "je", "jz", "jne", "jnz", "jb", "jc", "jnae", "jnb", "jnc", "jae",
    "jbe", "jna", "ja", "jnbe", "jp", "jpe", "jnp", "jpo", "jl", "jnge", "jge", "jnl", "jle",
    "jng", "jg", "jnle",
];

const LOOP_MNEMONICS: [&str; 5] = ["loop", "loope", "loopz", "loopne", "loopnz"];

pub static X86_64: ArchProfile = ArchProfile {
    name: "x86_64",
    isa: Isa::X86_64,
    ptr_size: 8,
    gpr_names: &[
        "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15", "rip", "rflags",
    ],
    pc_reg: "rip",
    sp_reg: "rsp",
    flags_reg: Some("rflags"),
    special_regs: &["cs", "ss", "ds", "es", "fs", "gs"],
    max_inst_bytes: 15,
    return_reg: Some("rax"),
    nop_bytes: &[0x90],
    break_bytes: &[0xcc],
    abi: Some(&SYSV_X64),
    call_mnemonics: &["call", "callq"],
};

pub static X86: ArchProfile = ArchProfile {
    name: "i386",
    isa: Isa::X86,
    ptr_size: 4,
    gpr_names: &["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip", "eflags"],
    pc_reg: "eip",
    sp_reg: "esp",
    flags_reg: Some("eflags"),
    special_regs: &["cs", "ss", "ds", "es", "fs", "gs"],
    max_inst_bytes: 15,
    return_reg: Some("eax"),
    nop_bytes: &[0x90],
    break_bytes: &[0xcc],
    abi: Some(&CDECL),
    call_mnemonics: &["call", "calll"],
};

const X64_ALIASES: [(&str, &str); 9] = [
    ("eax", "rax"),
    ("ebx", "rbx"),
    ("ecx", "rcx"),
    ("edx", "rdx"),
    ("esi", "rsi"),
    ("edi", "rdi"),
    ("ebp", "rbp"),
    ("esp", "rsp"),
    ("eip", "rip"),
];

const X86_ALIASES: [(&str, &str); 9] = [
    ("ax", "eax"),
    ("bx", "ebx"),
    ("cx", "ecx"),
    ("dx", "edx"),
    ("si", "esi"),
    ("di", "edi"),
    ("bp", "ebp"),
    ("sp", "esp"),
    ("ip", "eip"),
];

pub struct X86Behavior;

impl X86Behavior {
    /// Width of a narrower view of a full-width register: `eax`/`r8d` on
    /// x86-64, `ax` on x86.
    fn sub_register_bits(profile: &ArchProfile, name: &str) -> Option<u32> {
        if profile.ptr_size == 8 {
            let dword = X64_ALIASES.iter().any(|(alias, _)| *alias == name)
                || name
                    .strip_prefix('r')
                    .and_then(|rest| rest.strip_suffix('d'))
                    .and_then(|idx| idx.parse::<u8>().ok())
                    .is_some_and(|idx| (8..16).contains(&idx));
            dword.then_some(32)
        } else {
            X86_ALIASES
                .iter()
                .any(|(alias, _)| *alias == name)
                .then_some(16)
        }
    }

    /// Counter register name and width for the profile
    fn counter(profile: &ArchProfile) -> (&'static str, u32) {
        if profile.ptr_size == 8 {
            ("rcx", 64)
        } else {
            ("ecx", 32)
        }
    }
}

fn flag(flags: u64, bit: u32) -> bool {
    flags & (1u64 << bit) != 0
}

fn show(name: &str, set: bool) -> String {
    format!("{}={}", name, set as u8)
}

impl ArchBehavior for X86Behavior {
    fn format_flags(&self, value: u64) -> String {
        format_flag_bits(value, &FLAG_LETTERS)
    }

    fn is_conditional_branch(&self, mnemonic: &str) -> bool {
        CONDITIONAL_MNEMONICS.contains(&normalize_mnemonic(mnemonic).as_str())
    }

    fn is_unconditional_branch(&self, mnemonic: &str) -> bool {
        normalize_mnemonic(mnemonic).starts_with("jmp")
    }

    fn is_branch_like(&self, profile: &ArchProfile, mnemonic: &str) -> bool {
        let mnem = normalize_mnemonic(mnemonic);
        mnem.starts_with("ret")
            || LOOP_MNEMONICS.contains(&mnem.as_str())
            || matches!(mnem.as_str(), "jcxz" | "jecxz" | "jrcxz")
            || self.is_conditional_branch(&mnem)
            || self.is_unconditional_branch(&mnem)
            || self.is_call(profile, &mnem)
    }

    fn condition(&self, mnemonic: &str, flags: u64) -> Option<Condition> {
        let cf = flag(flags, FLAG_CF);
        let pf = flag(flags, FLAG_PF);
        let zf = flag(flags, FLAG_ZF);
        let sf = flag(flags, FLAG_SF);
        let of = flag(flags, FLAG_OF);
        let sof = if sf == of { "sf=of" } else { "sf!=of" }.to_string();

        let (taken, reason) = match normalize_mnemonic(mnemonic).as_str() {
            "jo" => (of, show("of", of)),
            "jno" => (!of, show("of", of)),
            "js" => (sf, show("sf", sf)),
            "jns" => (!sf, show("sf", sf)),
            "je" | "jz" => (zf, show("zf", zf)),
            "jne" | "jnz" => (!zf, show("zf", zf)),
            "jb" | "jc" | "jnae" => (cf, show("cf", cf)),
            "jnb" | "jnc" | "jae" => (!cf, show("cf", cf)),
            "jbe" | "jna" => (cf || zf, format!("{}, {}", show("cf", cf), show("zf", zf))),
            "ja" | "jnbe" => (!cf && !zf, format!("{}, {}", show("cf", cf), show("zf", zf))),
            "jp" | "jpe" => (pf, show("pf", pf)),
            "jnp" | "jpo" => (!pf, show("pf", pf)),
            "jl" | "jnge" => (sf != of, sof),
            "jge" | "jnl" => (sf == of, sof),
            "jle" | "jng" => (zf || sf != of, format!("{}, {}", show("zf", zf), sof)),
            "jg" | "jnle" => (!zf && sf == of, format!("{}, {}", show("zf", zf), sof)),
            _ => return None,
        };
        Some(Condition { taken, reason })
    }

    fn register_branch(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        _operands: &str,
        regs: &Registers,
        flags: u64,
    ) -> Option<BranchDecision> {
        let mnem = normalize_mnemonic(mnemonic);
        let (counter, width) = Self::counter(profile);
        let aliases = self.operand_aliases(profile, regs);

        let zero_test = match mnem.as_str() {
            "jcxz" => Some(("cx", 16)),
            "jecxz" => Some(("ecx", 32)),
            "jrcxz" if profile.ptr_size == 8 => Some(("rcx", 64)),
            _ => None,
        };
        if let Some((label, bits)) = zero_test {
            let value = mask(resolve_reg_operand(counter, regs, &aliases)?, bits);
            return Some(BranchDecision::new(
                value == 0,
                zero_reason(label, value),
                BranchKind::Conditional,
            ));
        }

        if LOOP_MNEMONICS.contains(&mnem.as_str()) {
            let value = resolve_reg_operand(counter, regs, &aliases)?;
            let next = mask(value.wrapping_sub(1), width);
            let mut taken = next != 0;
            let mut reason = if taken {
                format!("{}-1!=0", counter)
            } else {
                format!("{}-1=0", counter)
            };
            let zf = flag(flags, FLAG_ZF);
            match mnem.as_str() {
                "loope" | "loopz" => {
                    taken = taken && zf;
                    reason = format!("{}, {}", reason, show("zf", zf));
                }
                "loopne" | "loopnz" => {
                    taken = taken && !zf;
                    reason = format!("{}, {}", reason, show("zf", zf));
                }
                _ => {}
            }
            return Some(BranchDecision::new(taken, reason, BranchKind::Conditional));
        }
        None
    }

    fn resolve_flow_target(
        &self,
        profile: &ArchProfile,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        reader: Option<&dyn MemoryReader>,
        ptr_size: Option<usize>,
    ) -> Option<u64> {
        if !self.is_branch_like(profile, mnemonic) {
            return None;
        }
        let ptr_size = ptr_size.unwrap_or(profile.ptr_size);
        let aliases = self.operand_aliases(profile, regs);

        if normalize_mnemonic(mnemonic).starts_with("ret") {
            let sp = resolve_reg_operand(profile.sp_reg, regs, &aliases)?;
            return reader?.read_pointer(sp, ptr_size);
        }

        let parts = operand::split_operands(operands);
        let op = *parts.first()?;
        if let Some(target) = parse_target_operand(op, regs, &aliases) {
            return Some(match Self::sub_register_bits(profile, &operand::normalize_reg(op)) {
                Some(bits) => mask(target, bits),
                None => target,
            });
        }

        // Indirect through memory: `call qword ptr [rax + 0x10]`, `jmp *0x8(%rbx)`
        let mems = operand::mem_operands(op, regs, &aliases);
        let [mem] = mems.as_slice() else {
            return None;
        };
        let pc_alias = aliases.get(&mem.base).map(String::as_str);
        if mem.base == profile.pc_reg || pc_alias == Some(profile.pc_reg) {
            debug!("Not resolving pc-relative target {}", op);
            return None;
        }
        reader?.read_pointer(mem.addr, ptr_size)
    }

    fn register_aliases(&self, profile: &ArchProfile, regs: &Registers) -> Aliases {
        let mut aliases = Aliases::new();
        if profile.ptr_size == 8 {
            if !regs.contains_key("rax") {
                return aliases;
            }
            for (alias, reg) in X64_ALIASES {
                if regs.contains_key(reg) {
                    aliases.insert(alias.to_string(), reg.to_string());
                }
            }
            for idx in 8..16 {
                let reg = format!("r{}", idx);
                if regs.contains_key(&reg) {
                    aliases.insert(format!("r{}d", idx), reg);
                }
            }
        } else {
            if !regs.contains_key("eax") {
                return aliases;
            }
            for (alias, reg) in X86_ALIASES {
                if regs.contains_key(reg) {
                    aliases.insert(alias.to_string(), reg.to_string());
                }
            }
        }
        aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySegments;
    use rstest::rstest;

    fn regs(pairs: &[(&str, u64)]) -> Registers {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    const ZF: u64 = 1 << FLAG_ZF;
    const CF: u64 = 1 << FLAG_CF;
    const SF: u64 = 1 << FLAG_SF;
    const OF: u64 = 1 << FLAG_OF;

    #[test]
    fn test_format_flags() {
        assert_eq!(X86_64.format_flags(ZF | CF), "o d i t s Z a p C");
        assert_eq!(X86.format_flags(0), "o d i t s z a p c");
    }

    #[rstest]
    #[case("je", ZF, true, "zf=1")]
    #[case("JZ", 0, false, "zf=0")]
    #[case("jne", ZF, false, "zf=1")]
    #[case("jb", CF, true, "cf=1")]
    #[case("jae", CF, false, "cf=1")]
    #[case("ja", 0, true, "cf=0, zf=0")]
    #[case("jbe", ZF, true, "cf=0, zf=1")]
    #[case("jl", SF, true, "sf!=of")]
    #[case("jge", SF | OF, true, "sf=of")]
    #[case("jg", SF | OF, true, "zf=0, sf=of")]
    #[case("jle", ZF, true, "zf=1, sf=of")]
    #[case("jo", OF, true, "of=1")]
    #[case("jnp", 0, true, "pf=0")]
    fn test_branch_taken(#[case] mnem: &str, #[case] flags: u64, #[case] taken: bool, #[case] reason: &str) {
        assert_eq!(X86_64.branch_taken(mnem, flags), (taken, reason.to_string()));
    }

    #[test]
    fn test_branch_taken_without_condition() {
        assert_eq!(X86_64.branch_taken("jmp", ZF), (false, String::new()));
        assert_eq!(X86_64.branch_taken("mov", ZF), (false, String::new()));
    }

    #[test]
    fn test_classification() {
        assert!(X86_64.is_conditional_branch("jne"));
        assert!(!X86_64.is_conditional_branch("jmp"));
        assert!(X86_64.is_unconditional_branch("jmpq"));
        assert!(X86_64.is_call("callq"));
        assert!(!X86_64.is_call("calll"));
        assert!(X86.is_call("calll"));
        assert!(X86_64.is_return("retq"));
        assert!(X86_64.is_branch_like("loopne"));
        assert!(X86_64.is_branch_like("jrcxz"));
        assert!(!X86_64.is_branch_like("mov"));
    }

    #[rstest]
    #[case("jrcxz", 0, true, "rcx=0")]
    #[case("jrcxz", 1, false, "rcx!=0")]
    #[case("jecxz", 0x1_0000_0000, true, "ecx=0")]
    #[case("jcxz", 0x10000, true, "cx=0")]
    fn test_counter_zero_test(#[case] mnem: &str, #[case] rcx: u64, #[case] taken: bool, #[case] reason: &str) {
        let decision = X86_64
            .branch_decision(mnem, "0x1000", &regs(&[("rcx", rcx)]), 0, false, false)
            .unwrap();
        assert_eq!(decision, BranchDecision::new(taken, reason, BranchKind::Conditional));
    }

    #[test]
    fn test_loop_variants() {
        let two = regs(&[("rcx", 2)]);
        let one = regs(&[("rcx", 1)]);
        let zero = regs(&[("rcx", 0)]);

        let d = X86_64.branch_decision("loop", "0x10", &two, 0, false, false).unwrap();
        assert_eq!((d.taken, d.reason.as_str()), (true, "rcx-1!=0"));
        let d = X86_64.branch_decision("loop", "0x10", &one, 0, false, false).unwrap();
        assert_eq!((d.taken, d.reason.as_str()), (false, "rcx-1=0"));
        // Counter wraps instead of stopping
        let d = X86_64.branch_decision("loop", "0x10", &zero, 0, false, false).unwrap();
        assert!(d.taken);

        let d = X86_64.branch_decision("loope", "0x10", &two, 0, false, false).unwrap();
        assert_eq!((d.taken, d.reason.as_str()), (false, "rcx-1!=0, zf=0"));
        let d = X86_64.branch_decision("loopnz", "0x10", &two, 0, false, false).unwrap();
        assert_eq!((d.taken, d.reason.as_str()), (true, "rcx-1!=0, zf=0"));
    }

    #[test]
    fn test_loop_on_i386_wraps_at_32_bits() {
        let regs = regs(&[("ecx", 0x1_0000_0001)]);
        let d = X86.branch_decision("loop", "0x10", &regs, 0, false, false).unwrap();
        assert!(!d.taken);
        assert_eq!(d.reason, "ecx-1=0");
    }

    #[test]
    fn test_missing_counter_gives_nothing() {
        assert!(X86_64.branch_decision("loop", "0x10", &Registers::new(), 0, true, true).is_none());
    }

    #[test]
    fn test_always_taken_needs_opt_in() {
        let regs = Registers::new();
        assert!(X86_64.branch_decision("jmp", "0x10", &regs, 0, false, false).is_none());
        assert_eq!(
            X86_64.branch_decision("jmp", "0x10", &regs, 0, true, false).map(|d| d.kind),
            Some(BranchKind::Unconditional)
        );
        assert_eq!(
            X86_64.branch_decision("ret", "", &regs, 0, true, false).map(|d| d.kind),
            Some(BranchKind::Return)
        );
        assert!(X86_64.branch_decision("call", "0x10", &regs, 0, true, false).is_none());
        assert_eq!(
            X86_64.branch_decision("call", "0x10", &regs, 0, false, true).map(|d| d.kind),
            Some(BranchKind::Call)
        );
    }

    #[test]
    fn test_resolve_direct_and_register_targets() {
        let regs = regs(&[("rax", 0x4000)]);
        assert_eq!(X86_64.resolve_flow_target("jmp", "0x1000", &regs, None, None), Some(0x1000));
        assert_eq!(
            X86_64.resolve_flow_target("call", "0x100003f50 <puts>", &regs, None, None),
            Some(0x100003f50)
        );
        assert_eq!(X86_64.resolve_flow_target("callq", "*%rax", &regs, None, None), Some(0x4000));
        assert_eq!(X86_64.resolve_flow_target("call", "eax", &regs, None, None), Some(0x4000));
        assert_eq!(X86_64.resolve_flow_target("mov", "0x1000", &regs, None, None), None);
    }

    #[test]
    fn test_sub_register_targets_are_truncated() {
        let wide = regs(&[("rax", 0x1_0000_4000), ("r9", 0xdead_0000_5000)]);
        assert_eq!(X86_64.resolve_flow_target("call", "eax", &wide, None, None), Some(0x4000));
        assert_eq!(X86_64.resolve_flow_target("jmp", "*%r9d", &wide, None, None), Some(0x5000));
        assert_eq!(X86_64.resolve_flow_target("call", "rax", &wide, None, None), Some(0x1_0000_4000));

        let narrow = regs(&[("eax", 0x0012_3456)]);
        assert_eq!(X86.resolve_flow_target("jmp", "ax", &narrow, None, None), Some(0x3456));
        assert_eq!(X86.resolve_flow_target("jmp", "eax", &narrow, None, None), Some(0x0012_3456));
    }

    #[test]
    fn test_resolve_return_reads_stack() {
        let regs = regs(&[("rsp", 0x7000)]);
        let mem = MemorySegments::new().with_segment(0x7000, 0x401000u64.to_le_bytes().to_vec());
        assert_eq!(X86_64.resolve_flow_target("ret", "", &regs, Some(&mem), Some(8)), Some(0x401000));
        assert_eq!(X86_64.resolve_flow_target("ret", "", &regs, None, Some(8)), None);
        assert_eq!(X86_64.resolve_flow_target("ret", "", &Registers::new(), Some(&mem), Some(8)), None);
    }

    #[test]
    fn test_resolve_memory_indirect() {
        let regs = regs(&[("rax", 0x5000), ("rip", 0x1000)]);
        let mem = MemorySegments::new().with_segment(0x5010, 0x402000u64.to_le_bytes().to_vec());
        assert_eq!(
            X86_64.resolve_flow_target("call", "qword ptr [rax + 0x10]", &regs, Some(&mem), None),
            Some(0x402000)
        );
        assert_eq!(
            X86_64.resolve_flow_target("call", "qword ptr [rax + 0x10]", &regs, None, None),
            None
        );
        assert_eq!(
            X86_64.resolve_flow_target("jmp", "qword ptr [rip + 0x10]", &regs, Some(&mem), None),
            None
        );
    }

    #[test]
    fn test_aliases_need_canonical_register() {
        let aliases = X86_64.register_aliases(&regs(&[("rax", 1), ("rcx", 2), ("r8", 3)]));
        assert_eq!(aliases.get("eax").map(String::as_str), Some("rax"));
        assert_eq!(aliases.get("r8d").map(String::as_str), Some("r8"));
        assert!(!aliases.contains_key("ebx"));
        assert!(X86_64.register_aliases(&Registers::new()).is_empty());

        let aliases = X86.register_aliases(&regs(&[("eax", 1), ("esp", 2)]));
        assert_eq!(aliases.get("sp").map(String::as_str), Some("esp"));
    }
}
