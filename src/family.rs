//! Instruction-set families and the text tokens that name them.
//!
//! Target triples and architecture names are free-form strings; these helpers
//! decide which family a string names, and whether it rules a family out.

use std::fmt;

use serde::Serialize;

/// A group of instruction sets sharing register and mnemonic vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchFamily {
    /// 64-bit x86
    X86_64,
    /// 32-bit x86
    X86,
    /// AArch64
    Arm64,
    /// 32-bit ARM and Thumb
    Arm32,
    /// RISC-V, both widths
    RiscV,
}

impl ArchFamily {
    /// Every family, in matching order
    pub fn all() -> &'static [ArchFamily] {
        &[
            ArchFamily::X86_64,
            ArchFamily::X86,
            ArchFamily::Arm64,
            ArchFamily::Arm32,
            ArchFamily::RiscV,
        ]
    }

    /// Lower-case substrings that identify this family in a triple or arch name.
    pub fn tokens(&self) -> &'static [&'static str] {
        match self {
            ArchFamily::X86_64 => &["x86_64", "amd64", "x64"],
            ArchFamily::X86 => &["i386", "i486", "i586", "i686", "i86pc"],
            ArchFamily::Arm64 => &["arm64", "aarch64"],
            ArchFamily::Arm32 => &["armv", "arm32", "arm-", "thumb"],
            ArchFamily::RiscV => &["riscv", "rv32", "rv64"],
        }
    }

    /// Whether `text` mentions this family.
    pub fn in_text(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.tokens().iter().any(|token| {
            if WORD_TOKENS.contains(token) {
                contains_word(&lowered, token)
            } else {
                lowered.contains(token)
            }
        })
    }
}

/// Tokens too short to match inside other words (`linux64` is not `x64`)
const WORD_TOKENS: [&str; 1] = ["x64"];

/// Whether `token` occurs in `text` between `-`, `_`, `.`, whitespace or the ends.
fn contains_word(text: &str, token: &str) -> bool {
    text.split(|c: char| matches!(c, '-' | '_' | '.') || c.is_whitespace())
        .any(|word| word == token)
}

impl fmt::Display for ArchFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchFamily::X86_64 => write!(f, "x86_64"),
            ArchFamily::X86 => write!(f, "x86"),
            ArchFamily::Arm64 => write!(f, "arm64"),
            ArchFamily::Arm32 => write!(f, "arm32"),
            ArchFamily::RiscV => write!(f, "riscv"),
        }
    }
}

/// The single family `text` names, or `None` if it names zero or several.
pub fn explicit_family(text: &str) -> Option<ArchFamily> {
    let mut found = ArchFamily::all().iter().filter(|family| family.in_text(text));
    let first = *found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(first)
}

/// Whether the triple and arch name leave room for `family`.
///
/// The triple is consulted first: if it names `family` the answer is yes, if it
/// names some other family the answer is no. The arch name is consulted the
/// same way only when the triple is silent. Two silent strings allow anything.
pub fn allows_family(triple: &str, arch_name: &str, family: ArchFamily) -> bool {
    for text in [triple, arch_name] {
        if text.is_empty() {
            continue;
        }
        if family.in_text(text) {
            return true;
        }
        if ArchFamily::all()
            .iter()
            .any(|other| *other != family && other.in_text(text))
        {
            return false;
        }
    }
    true
}
