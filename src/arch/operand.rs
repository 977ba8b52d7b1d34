//! Operand text parsing shared by every instruction set.
//!
//! Disassemblers differ in punctuation (`#0x10`, `$0x10`, `*%rax`) but agree
//! on the shapes that matter here: immediates, registers, `[base + off]`
//! memory references and `off(base)` memory references. Numbers are decimal
//! or `0x` hex, optionally negative, and wrap to 64-bit two's complement.

use log::trace;

use super::Aliases;
use crate::Registers;

/// Split an operand list on commas that are not nested in brackets,
/// parentheses or braces.
pub fn split_operands(operands: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in operands.char_indices() {
        match ch {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(operands[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = operands[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn strip_markers(text: &str) -> &str {
    text.trim().trim_start_matches(['#', '$', '*', '%'])
}

/// Parse a decimal or `0x` hex immediate, with optional `#`/`$` marker and sign.
pub fn parse_immediate(text: &str) -> Option<u64> {
    let text = strip_markers(text);
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = digits.trim_start_matches(['#', '$']);
    if digits.is_empty() {
        return None;
    }
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None if digits.chars().all(|c| c.is_ascii_digit()) => digits.parse::<u64>().ok()?,
        None => return None,
    };
    Some(if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    })
}

/// Parse the first whitespace-delimited token as an integer, so that
/// `0x1000 <main+16>` yields `0x1000`.
pub fn parse_leading_int(text: &str) -> Option<u64> {
    let token = text.split_whitespace().next()?;
    parse_immediate(token.trim_end_matches([',', ';', ':']))
}

/// Canonical spelling of a register operand.
pub fn normalize_reg(name: &str) -> String {
    strip_markers(name).to_lowercase()
}

/// Value of a register operand, looked up directly or through `aliases`.
pub fn resolve_reg_operand(name: &str, regs: &Registers, aliases: &Aliases) -> Option<u64> {
    let key = normalize_reg(name);
    if key.is_empty() {
        return None;
    }
    if let Some(value) = regs.get(&key) {
        return Some(*value);
    }
    let canonical = aliases.get(&key)?;
    regs.get(canonical).copied()
}

/// Numeric value of a jump or call target operand.
///
/// Tries an immediate, then a leading integer followed by annotation text,
/// then a register.
pub fn parse_target_operand(op: &str, regs: &Registers, aliases: &Aliases) -> Option<u64> {
    let op = op.trim();
    if op.is_empty() {
        return None;
    }
    parse_immediate(op)
        .or_else(|| parse_leading_int(op))
        .or_else(|| resolve_reg_operand(op, regs, aliases))
}

/// A memory reference reduced to its one base register and a constant offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemOperand {
    /// Register name as written, normalized
    pub base: String,
    /// Offset in two's complement
    pub offset: u64,
    /// Effective address
    pub addr: u64,
}

fn is_register(term: &str, regs: &Registers, aliases: &Aliases) -> bool {
    let key = normalize_reg(term);
    regs.contains_key(&key) || aliases.get(&key).is_some_and(|canon| regs.contains_key(canon))
}

/// Evaluate `base [+|- imm]...` with exactly one register term.
fn eval_address_expr(expr: &str, regs: &Registers, aliases: &Aliases) -> Option<MemOperand> {
    // ARM writes `[x0, #-8]`; fold it into `x0 + -8`
    let expr = expr.replace(',', " + ").replace('#', "");
    let mut base: Option<(String, u64)> = None;
    let mut offset = 0u64;
    let mut negate = false;
    let mut term = String::new();

    let mut flush = |term: &mut String, negate: bool| -> Option<()> {
        let text = term.trim();
        if text.is_empty() {
            return Some(());
        }
        if is_register(text, regs, aliases) {
            if negate || base.is_some() {
                return None;
            }
            let value = resolve_reg_operand(text, regs, aliases)?;
            base = Some((normalize_reg(text), value));
        } else {
            let value = parse_immediate(text)?;
            offset = if negate {
                offset.wrapping_sub(value)
            } else {
                offset.wrapping_add(value)
            };
        }
        term.clear();
        Some(())
    };

    for ch in expr.chars() {
        match ch {
            '+' | '-' if !term.trim().is_empty() => {
                flush(&mut term, negate)?;
                negate = ch == '-';
            }
            '+' => {}
            '-' => negate = !negate,
            _ => term.push(ch),
        }
    }
    flush(&mut term, negate)?;

    let (name, value) = base?;
    Some(MemOperand {
        base: name,
        offset,
        addr: value.wrapping_add(offset),
    })
}

/// Parse an `off(reg)` operand such as `8(sp)` or `-0x10(%rbp)`.
pub fn parse_base_offset(op: &str, regs: &Registers, aliases: &Aliases) -> Option<MemOperand> {
    let op = strip_markers(op);
    let open = op.find('(')?;
    let close = op[open..].find(')')? + open;
    let inner = &op[open + 1..close];
    if inner.contains(',') {
        // Scaled index forms like (%rax,%rcx,4)
        return None;
    }
    let prefix = op[..open].trim();
    let mut mem = eval_address_expr(inner, regs, aliases)?;
    if !prefix.is_empty() {
        let offset = parse_immediate(prefix)?;
        mem.offset = mem.offset.wrapping_add(offset);
        mem.addr = mem.addr.wrapping_add(offset);
    }
    Some(mem)
}

/// Every memory reference in `operands` with exactly one register.
///
/// Expressions that name several registers, or that contain terms this
/// grammar cannot evaluate, are skipped rather than guessed.
pub fn mem_operands(operands: &str, regs: &Registers, aliases: &Aliases) -> Vec<MemOperand> {
    let mut found = Vec::new();
    let mut rest = operands;
    while let Some(open) = rest.find('[') {
        let Some(len) = rest[open..].find(']') else {
            break;
        };
        let inner = &rest[open + 1..open + len];
        match eval_address_expr(inner, regs, aliases) {
            Some(mem) => found.push(mem),
            None => trace!("Skipping memory operand [{}]", inner),
        }
        rest = &rest[open + len + 1..];
    }
    for part in split_operands(operands) {
        if part.contains('[') || !part.contains('(') {
            continue;
        }
        match parse_base_offset(part, regs, aliases) {
            Some(mem) => found.push(mem),
            None => trace!("Skipping memory operand {}", part),
        }
    }
    found
}

/// Effective addresses of [`mem_operands`].
pub fn mem_operand_targets(operands: &str, regs: &Registers, aliases: &Aliases) -> Vec<u64> {
    mem_operands(operands, regs, aliases)
        .into_iter()
        .map(|mem| mem.addr)
        .collect()
}
