//! Pointer-chain walker.
//!
//! Starting from an address, keep treating the value found there as a pointer
//! until the chain lands on something a human can read: a C string, a symbol,
//! a code or stack region, a cycle, or memory that cannot be read. Every step
//! is bounded by [`DerefLimits`], so the walk terminates for any reader.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, MemoryReader, MemoryRegion, SymbolInfo, SymbolResolver};

/// Marker appended when the walk revisits an address
pub const LOOP_MARKER: &str = "[loop]";

/// Structural bounds for one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerefLimits {
    /// Maximum number of dereferences
    pub max_depth: usize,
    /// Maximum number of bytes read for a string
    pub max_string_length: usize,
}

impl Default for DerefLimits {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_string_length: 64,
        }
    }
}

/// What a chain token represents, judged by its surface form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    String,
    Symbol,
    Region,
    Loop,
    Address,
    Other,
}

pub fn classify_token(token: &str) -> TokenKind {
    if token == LOOP_MARKER {
        TokenKind::Loop
    } else if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        TokenKind::String
    } else if token.contains('!') {
        TokenKind::Symbol
    } else if token.starts_with('[') && token.ends_with(']') {
        TokenKind::Region
    } else if token.starts_with("0x") {
        TokenKind::Address
    } else {
        TokenKind::Other
    }
}

/// Ordered tokens produced by one walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DerefChain {
    tokens: Vec<String>,
}

impl DerefChain {
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Most informative token after the start address.
    ///
    /// Strings beat symbols, symbols beat regions, and otherwise the last
    /// token wins. Returns `None` for a chain that never left its start.
    pub fn summarize(&self) -> Option<&str> {
        let (first, rest) = self.tokens.split_first()?;
        if rest.is_empty() {
            return None;
        }
        let best = [TokenKind::String, TokenKind::Symbol, TokenKind::Region]
            .iter()
            .find_map(|kind| rest.iter().rev().find(|token| classify_token(token) == *kind))
            .or_else(|| rest.last())?;
        if best == first {
            None
        } else {
            Some(best.as_str())
        }
    }

    /// Value of the last address token.
    pub fn last_addr(&self) -> Option<Address> {
        self.tokens
            .iter()
            .rev()
            .filter(|token| classify_token(token) == TokenKind::Address)
            .find_map(|token| u64::from_str_radix(&token[2..], 16).ok())
    }

    fn push(&mut self, token: String) {
        self.tokens.push(token);
    }
}

impl fmt::Display for DerefChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" -> "))
    }
}

/// Follow pointers from `addr`.
pub fn deref_chain(
    addr: Address,
    reader: &dyn MemoryReader,
    regions: &[MemoryRegion],
    resolver: Option<&dyn SymbolResolver>,
    limits: &DerefLimits,
    ptr_size: usize,
) -> DerefChain {
    let mut chain = DerefChain::default();
    if ptr_size == 0 {
        chain.push(format_addr(addr, 1));
        return chain;
    }
    chain.push(format_addr(addr, ptr_size));
    if addr == 0 {
        return chain;
    }

    let mut seen = HashSet::new();
    let mut current = addr;
    for _ in 0..limits.max_depth {
        seen.insert(current);

        let Some(region) = find_region(current, regions) else {
            log::trace!("deref stopped: {:#x} is unmapped", current);
            break;
        };
        if region.executable {
            match resolver.and_then(|resolver| resolver.resolve(current)) {
                Some(symbol) => chain.push(format_symbol(&symbol)),
                None => chain.push(format_region(region)),
            }
            break;
        }
        if !region.readable {
            log::trace!("deref stopped: {:#x} is not readable", current);
            break;
        }
        let Some(ptr) = reader.read_pointer(current, ptr_size) else {
            log::trace!("deref stopped: read failed at {:#x}", current);
            break;
        };

        chain.push(format_addr(ptr, ptr_size));
        if ptr == 0 {
            break;
        }
        if seen.contains(&ptr) {
            chain.push(LOOP_MARKER.to_string());
            break;
        }
        if let Some(symbol) = resolver.and_then(|resolver| resolver.resolve(ptr)) {
            chain.push(format_symbol(&symbol));
            break;
        }
        if let Some(target) = find_region(ptr, regions) {
            if target.readable && !target.executable {
                let max_len = limits
                    .max_string_length
                    .min(target.end.saturating_sub(ptr) as usize);
                if let Some(text) = read_cstring(reader, ptr, max_len) {
                    chain.push(format!("\"{}\"", text));
                    break;
                }
            }
        }
        current = ptr;
    }
    log::debug!("deref chain: {}", chain);
    chain
}

/// Printable ASCII text at `addr`, up to the first NUL or `max_len` bytes.
///
/// Reads that fail in full are retried byte by byte so a string near the end
/// of readable memory is still found.
pub fn read_cstring(reader: &dyn MemoryReader, addr: Address, max_len: usize) -> Option<String> {
    if max_len == 0 {
        return None;
    }
    let data = match reader.read(addr, max_len) {
        Some(data) => data,
        None => read_bytewise(reader, addr, max_len),
    };
    let end = data.iter().position(|&byte| byte == 0).unwrap_or(data.len());
    let text = &data[..end];
    if text.is_empty() || !is_printable_ascii(text) {
        return None;
    }
    String::from_utf8(text.to_vec()).ok()
}

fn read_bytewise(reader: &dyn MemoryReader, addr: Address, max_len: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for offset in 0..max_len as u64 {
        match reader.read(addr.wrapping_add(offset), 1) {
            Some(byte) if byte.len() == 1 => {
                data.push(byte[0]);
                if byte[0] == 0 {
                    break;
                }
            }
            _ => break,
        }
    }
    data
}

pub fn is_printable_ascii(data: &[u8]) -> bool {
    data.iter().all(|byte| (0x20..=0x7e).contains(byte))
}

pub fn find_region(addr: Address, regions: &[MemoryRegion]) -> Option<&MemoryRegion> {
    regions.iter().find(|region| region.contains(addr))
}

/// `0x`-prefixed hex, zero-padded to two digits per pointer byte.
pub fn format_addr(addr: Address, ptr_size: usize) -> String {
    let width = (ptr_size * 2).max(1);
    format!("0x{:0width$x}", addr, width = width)
}

pub fn format_symbol(symbol: &SymbolInfo) -> String {
    let mut out = String::new();
    if !symbol.module.is_empty() {
        out.push_str(&symbol.module);
        out.push('!');
    }
    out.push_str(&symbol.name);
    if symbol.offset != 0 {
        out.push_str(&format!("+{:#x}", symbol.offset));
    }
    out
}

pub fn format_region(region: &MemoryRegion) -> String {
    match region.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("[{} {}]", region.perms(), name),
        _ => format!("[{}]", region.perms()),
    }
}

/// Tag for an address in code or on a stack; `None` for anything else.
pub fn region_tag(addr: Option<Address>, regions: &[MemoryRegion]) -> Option<String> {
    let region = find_region(addr?, regions)?;
    let on_stack = region
        .name
        .as_deref()
        .is_some_and(|name| name.to_lowercase().contains("stack"));
    if region.executable || on_stack {
        Some(format_region(region))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySegments;
    use rstest::rstest;
    use std::collections::HashMap;

    fn data_region(start: Address, end: Address) -> MemoryRegion {
        MemoryRegion::new(start, end, true, true, false)
    }

    fn hello_memory() -> MemorySegments {
        let mut text = b"hello\0".to_vec();
        text.resize(0x80, 0);
        MemorySegments::new()
            .with_segment(0x1000, 0x2000u64.to_le_bytes().to_vec())
            .with_segment(0x2000, text)
    }

    #[test]
    fn test_string_at_full_width() {
        let regions = [data_region(0x1000, 0x3000)];
        let chain = deref_chain(0x1000, &hello_memory(), &regions, None, &DerefLimits::default(), 8);
        assert_eq!(
            chain.tokens(),
            &["0x0000000000001000", "0x0000000000002000", "\"hello\""]
        );
        assert_eq!(chain.summarize(), Some("\"hello\""));
        assert_eq!(chain.last_addr(), Some(0x2000));
    }

    #[test]
    fn test_string_at_two_byte_pointers() {
        let regions = [data_region(0x1000, 0x3000)];
        let chain = deref_chain(0x1000, &hello_memory(), &regions, None, &DerefLimits::default(), 2);
        assert_eq!(chain.tokens(), &["0x1000", "0x2000", "\"hello\""]);
        assert_eq!(chain.to_string(), "0x1000 -> 0x2000 -> \"hello\"");
    }

    #[test]
    fn test_symbol_target() {
        let mem = MemorySegments::new().with_segment(0x1000, 0x2000u64.to_le_bytes().to_vec());
        let regions = [data_region(0x1000, 0x3000)];
        let symbols: HashMap<Address, SymbolInfo> =
            [(0x2000, SymbolInfo::new("func", "mod", 0x10))].into_iter().collect();
        let chain = deref_chain(0x1000, &mem, &regions, Some(&symbols), &DerefLimits::default(), 8);
        assert_eq!(
            chain.tokens(),
            &["0x0000000000001000", "0x0000000000002000", "mod!func+0x10"]
        );
        assert_eq!(chain.summarize(), Some("mod!func+0x10"));
    }

    #[test]
    fn test_self_loop() {
        let mem = MemorySegments::new().with_segment(0x1000, 0x1000u64.to_le_bytes().to_vec());
        let regions = [data_region(0x1000, 0x2000)];
        let chain = deref_chain(0x1000, &mem, &regions, None, &DerefLimits::default(), 8);
        assert_eq!(
            chain.tokens(),
            &["0x0000000000001000", "0x0000000000001000", LOOP_MARKER]
        );
    }

    #[test]
    fn test_two_cycle() {
        let mem = MemorySegments::new()
            .with_segment(0x1000, 0x1008u32.to_le_bytes().to_vec())
            .with_segment(0x1008, 0x1000u32.to_le_bytes().to_vec());
        let regions = [data_region(0x1000, 0x2000)];
        let chain = deref_chain(0x1000, &mem, &regions, None, &DerefLimits::default(), 4);
        assert_eq!(chain.tokens(), &["0x00001000", "0x00001008", "0x00001000", LOOP_MARKER]);
        assert_eq!(chain.summarize(), Some(LOOP_MARKER));
    }

    #[test]
    fn test_code_region_is_not_dereferenced() {
        let mem = MemorySegments::new().with_segment(0x1000, vec![0x90; 8]);
        let regions = [MemoryRegion::new(0x1000, 0x2000, true, false, true).with_name("a.out")];
        let chain = deref_chain(0x1000, &mem, &regions, None, &DerefLimits::default(), 8);
        assert_eq!(chain.tokens(), &["0x0000000000001000", "[r-x a.out]"]);
        assert_eq!(chain.summarize(), Some("[r-x a.out]"));
    }

    #[rstest]
    #[case::zero_address(0x0, 8, &["0x0000000000000000"])]
    #[case::unmapped(0x9000, 8, &["0x0000000000009000"])]
    #[case::no_pointer_width(0x1000, 0, &["0x1000"])]
    fn test_stops_immediately(#[case] addr: Address, #[case] ptr_size: usize, #[case] expected: &[&str]) {
        let regions = [data_region(0x1000, 0x3000)];
        let chain = deref_chain(addr, &hello_memory(), &regions, None, &DerefLimits::default(), ptr_size);
        assert_eq!(chain.tokens(), expected);
        assert_eq!(chain.summarize(), None);
    }

    #[test]
    fn test_unreadable_region_stops() {
        let regions = [MemoryRegion::new(0x1000, 0x3000, false, false, false)];
        let chain = deref_chain(0x1000, &hello_memory(), &regions, None, &DerefLimits::default(), 8);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_null_pointer_ends_chain() {
        let mem = MemorySegments::new().with_segment(0x1000, vec![0; 8]);
        let regions = [data_region(0x1000, 0x2000)];
        let chain = deref_chain(0x1000, &mem, &regions, None, &DerefLimits::default(), 8);
        assert_eq!(chain.tokens(), &["0x0000000000001000", "0x0000000000000000"]);
    }

    #[test]
    fn test_depth_bounds_chain() {
        // 0x1000 -> 0x1008 -> 0x1010 -> ...
        let mut data = Vec::new();
        for i in 1..=16u64 {
            data.extend_from_slice(&(0x1000 + 8 * i).to_le_bytes());
        }
        let mem = MemorySegments::new().with_segment(0x1000, data);
        let regions = [data_region(0x1000, 0x1000 + 8 * 16)];
        let limits = DerefLimits {
            max_depth: 3,
            max_string_length: 64,
        };
        let chain = deref_chain(0x1000, &mem, &regions, None, &limits, 8);
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.last_addr(), Some(0x1018));

        let limits = DerefLimits { max_depth: 0, ..limits };
        assert_eq!(deref_chain(0x1000, &mem, &regions, None, &limits, 8).len(), 1);
    }

    #[test]
    fn test_string_read_stops_at_region_end() {
        let mem = MemorySegments::new()
            .with_segment(0x1000, 0x2000u64.to_le_bytes().to_vec())
            .with_segment(0x2000, b"hey".to_vec());
        let regions = [data_region(0x1000, 0x1008), data_region(0x2000, 0x2003)];
        let chain = deref_chain(0x1000, &mem, &regions, None, &DerefLimits::default(), 8);
        assert_eq!(chain.tokens().last().map(String::as_str), Some("\"hey\""));
    }

    #[test]
    fn test_read_cstring() {
        let mem = MemorySegments::new().with_segment(0x10, b"ab\x01cd\0".to_vec());
        assert_eq!(read_cstring(&mem, 0x13, 3), Some("cd".to_string()));
        assert_eq!(read_cstring(&mem, 0x10, 6), None);
        assert_eq!(read_cstring(&mem, 0x15, 1), None);
        assert_eq!(read_cstring(&mem, 0x10, 0), None);
        // Longer than the segment: falls back to byte reads
        assert_eq!(read_cstring(&mem, 0x13, 64), Some("cd".to_string()));
    }

    #[rstest]
    #[case("[loop]", TokenKind::Loop)]
    #[case("\"hi\"", TokenKind::String)]
    #[case("libc.so!puts", TokenKind::Symbol)]
    #[case("[rw- [stack]]", TokenKind::Region)]
    #[case("0x10", TokenKind::Address)]
    #[case("\"", TokenKind::Other)]
    #[case("hello", TokenKind::Other)]
    fn test_classify_token(#[case] token: &str, #[case] kind: TokenKind) {
        assert_eq!(classify_token(token), kind);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_symbol(&SymbolInfo::new("main", "", 0)), "main");
        assert_eq!(format_symbol(&SymbolInfo::new("main", "a.out", 4)), "a.out!main+0x4");
        assert_eq!(format_region(&MemoryRegion::new(0, 1, true, true, false)), "[rw-]");
        assert_eq!(format_addr(0x1f, 4), "0x0000001f");
    }

    #[test]
    fn test_region_tag() {
        let regions = [
            MemoryRegion::new(0x1000, 0x2000, true, false, true).with_name("libc.so"),
            MemoryRegion::new(0x7000, 0x8000, true, true, false).with_name("[stack]"),
            data_region(0x3000, 0x4000),
        ];
        assert_eq!(region_tag(Some(0x1800), &regions), Some("[r-x libc.so]".to_string()));
        assert_eq!(region_tag(Some(0x7ff0), &regions), Some("[rw- [stack]]".to_string()));
        assert_eq!(region_tag(Some(0x3000), &regions), None);
        assert_eq!(region_tag(None, &regions), None);
    }
}
