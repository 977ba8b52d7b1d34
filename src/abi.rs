//! Calling-convention table.
//!
//! Every ABI is a process-lifetime constant. Argument register order is the
//! argument index: `int_arg_regs[0]` carries the first integer argument.

use serde::Serialize;

use crate::family::{explicit_family, ArchFamily};
use crate::IsaError;

/// Register conventions of one ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiSpec {
    /// Table key, lower-case
    pub name: &'static str,
    /// Family this convention applies to
    pub family: ArchFamily,
    /// Integer/pointer argument registers, in argument order
    pub int_arg_regs: &'static [&'static str],
    /// Floating-point argument registers, in argument order
    pub float_arg_regs: &'static [&'static str],
    pub return_reg: Option<&'static str>,
    pub return_float_reg: Option<&'static str>,
    /// Required stack alignment at call sites, in bytes
    pub stack_alignment: Option<u32>,
    /// Bytes below the stack pointer a leaf may use without adjusting it
    pub red_zone: Option<u32>,
    pub callee_saved: &'static [&'static str],
    pub caller_saved: &'static [&'static str],
}

impl AbiSpec {
    /// Integer argument register at `index`, if the ABI passes it in a register.
    pub fn arg_reg(&self, index: usize) -> Option<&'static str> {
        self.int_arg_regs.get(index).copied()
    }

    /// Floating-point argument register at `index`.
    pub fn float_arg_reg(&self, index: usize) -> Option<&'static str> {
        self.float_arg_regs.get(index).copied()
    }

    pub fn is_callee_saved(&self, reg: &str) -> bool {
        let reg = reg.trim().to_lowercase();
        self.callee_saved.iter().any(|r| *r == reg)
    }
}

/// x86-64 System V (Linux, macOS, BSD)
pub static SYSV_X64: AbiSpec = AbiSpec {
    name: "sysv",
    family: ArchFamily::X86_64,
    int_arg_regs: &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
    float_arg_regs: &["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"],
    return_reg: Some("rax"),
    return_float_reg: Some("xmm0"),
    stack_alignment: Some(16),
    red_zone: Some(128),
    callee_saved: &["rbx", "rbp", "r12", "r13", "r14", "r15", "rsp"],
    caller_saved: &["rax", "rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11"],
};

/// Windows x64
pub static WIN64: AbiSpec = AbiSpec {
    name: "win64",
    family: ArchFamily::X86_64,
    int_arg_regs: &["rcx", "rdx", "r8", "r9"],
    float_arg_regs: &["xmm0", "xmm1", "xmm2", "xmm3"],
    return_reg: Some("rax"),
    return_float_reg: Some("xmm0"),
    stack_alignment: Some(16),
    red_zone: None,
    callee_saved: &["rbx", "rbp", "rdi", "rsi", "r12", "r13", "r14", "r15", "rsp"],
    caller_saved: &["rax", "rcx", "rdx", "r8", "r9", "r10", "r11"],
};

/// 32-bit x86 cdecl: every argument on the stack
pub static CDECL: AbiSpec = AbiSpec {
    name: "cdecl",
    family: ArchFamily::X86,
    int_arg_regs: &[],
    float_arg_regs: &[],
    return_reg: Some("eax"),
    return_float_reg: None,
    stack_alignment: Some(4),
    red_zone: None,
    callee_saved: &["ebx", "esi", "edi", "ebp", "esp"],
    caller_saved: &["eax", "ecx", "edx"],
};

/// 32-bit x86 fastcall: first two integer arguments in ecx, edx
pub static FASTCALL: AbiSpec = AbiSpec {
    name: "fastcall",
    family: ArchFamily::X86,
    int_arg_regs: &["ecx", "edx"],
    float_arg_regs: &[],
    return_reg: Some("eax"),
    return_float_reg: None,
    stack_alignment: Some(4),
    red_zone: None,
    callee_saved: &["ebx", "esi", "edi", "ebp", "esp"],
    caller_saved: &["eax", "ecx", "edx"],
};

/// ARM 64-bit procedure call standard
pub static AAPCS64: AbiSpec = AbiSpec {
    name: "aapcs64",
    family: ArchFamily::Arm64,
    int_arg_regs: &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"],
    float_arg_regs: &["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"],
    return_reg: Some("x0"),
    return_float_reg: Some("v0"),
    stack_alignment: Some(16),
    red_zone: None,
    callee_saved: &[
        "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "fp", "sp",
    ],
    caller_saved: &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8"],
};

/// ARM 32-bit procedure call standard
pub static AAPCS32: AbiSpec = AbiSpec {
    name: "aapcs32",
    family: ArchFamily::Arm32,
    int_arg_regs: &["r0", "r1", "r2", "r3"],
    float_arg_regs: &[],
    return_reg: Some("r0"),
    return_float_reg: None,
    stack_alignment: Some(8),
    red_zone: None,
    callee_saved: &["r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "sp"],
    caller_saved: &["r0", "r1", "r2", "r3", "r12", "lr"],
};

/// RISC-V with ABI register names
pub static RISCV: AbiSpec = AbiSpec {
    name: "riscv",
    family: ArchFamily::RiscV,
    int_arg_regs: &["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"],
    float_arg_regs: &["fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7"],
    return_reg: Some("a0"),
    return_float_reg: Some("fa0"),
    stack_alignment: Some(16),
    red_zone: None,
    callee_saved: &[
        "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "sp",
    ],
    caller_saved: &[
        "ra", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "a0", "a1", "a2", "a3", "a4", "a5",
        "a6", "a7",
    ],
};

/// RISC-V with numeric register names
pub static RISCV_X: AbiSpec = AbiSpec {
    name: "riscv-x",
    family: ArchFamily::RiscV,
    int_arg_regs: &["x10", "x11", "x12", "x13", "x14", "x15", "x16", "x17"],
    float_arg_regs: &["f10", "f11", "f12", "f13", "f14", "f15", "f16", "f17"],
    return_reg: Some("x10"),
    return_float_reg: Some("f10"),
    stack_alignment: Some(16),
    red_zone: None,
    callee_saved: &[
        "x8", "x9", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x2",
    ],
    caller_saved: &[
        "x1", "x5", "x6", "x7", "x28", "x29", "x30", "x31", "x10", "x11", "x12", "x13", "x14",
        "x15", "x16", "x17",
    ],
};

/// Every known ABI, keyed by `name`
pub static ALL_ABIS: &[&AbiSpec] = &[
    &SYSV_X64, &WIN64, &CDECL, &FASTCALL, &AAPCS64, &AAPCS32, &RISCV, &RISCV_X,
];

const WINDOWS_TOKENS: [&str; 4] = ["windows", "mingw", "msvc", "win32"];

/// Exact, case-insensitive lookup by name.
pub fn lookup(name: &str) -> Option<&'static AbiSpec> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    ALL_ABIS.iter().copied().find(|abi| abi.name == key)
}

/// Infer the convention from a target triple and an architecture name.
///
/// The family comes from the arch name, or from the triple when the arch name
/// is silent; an OS/toolchain token in the triple then picks between the
/// conventions of that family.
pub fn select(triple: &str, arch_name: &str) -> Option<&'static AbiSpec> {
    let triple = triple.to_lowercase();
    let family = explicit_family(arch_name).or_else(|| explicit_family(&triple))?;
    let windows = WINDOWS_TOKENS.iter().any(|token| triple.contains(token));

    let abi = match family {
        ArchFamily::X86_64 if windows => &WIN64,
        ArchFamily::X86_64 => &SYSV_X64,
        ArchFamily::X86 => &CDECL,
        ArchFamily::Arm64 => &AAPCS64,
        ArchFamily::Arm32 => &AAPCS32,
        ArchFamily::RiscV => &RISCV,
    };
    Some(abi)
}

/// Whether `abi` may be applied to the architecture called `arch_name`.
pub fn matches(abi: &AbiSpec, arch_name: &str) -> bool {
    explicit_family(arch_name) == Some(abi.family)
}

/// Look up `name` and check it against the architecture called `arch_name`.
pub fn checked(name: &str, arch_name: &str) -> Result<&'static AbiSpec, IsaError> {
    let spec = lookup(name).ok_or_else(|| IsaError::UnknownAbi(name.trim().to_string()))?;
    if matches(spec, arch_name) {
        Ok(spec)
    } else {
        Err(IsaError::IncompatibleAbi {
            abi: spec.name.to_string(),
            arch: arch_name.to_string(),
        })
    }
}

/// Integer argument register at `index` of an optional ABI.
pub fn arg_reg(abi: Option<&AbiSpec>, index: usize) -> Option<&'static str> {
    abi?.arg_reg(index)
}
