//! ARM condition codes evaluated against N, Z, C and V.
//!
//! AArch64 NZCV and AArch32 CPSR keep these flags at the same bit positions.

use super::Condition;

pub const FLAG_N: u32 = 31;
pub const FLAG_Z: u32 = 30;
pub const FLAG_C: u32 = 29;
pub const FLAG_V: u32 = 28;

/// Every condition suffix, including the synonyms `hs` and `lo`.
pub const CONDITIONS: [&str; 17] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
    "al",
];

/// Flags decoded from a status register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nzcv {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl Nzcv {
    pub fn from_bits(flags: u64) -> Self {
        let bit = |b: u32| flags & (1u64 << b) != 0;
        Self {
            n: bit(FLAG_N),
            z: bit(FLAG_Z),
            c: bit(FLAG_C),
            v: bit(FLAG_V),
        }
    }
}

fn show(name: &str, set: bool) -> String {
    format!("{}={}", name, set as u8)
}

/// Evaluate condition suffix `cond`. The reason names the observed state of
/// the flags the condition reads.
pub fn evaluate(cond: &str, flags: u64) -> Option<Condition> {
    let Nzcv { n, z, c, v } = Nzcv::from_bits(flags);
    let zs = show("z", z);
    let cs = show("c", c);
    let nv = if n == v { "n=v" } else { "n!=v" }.to_string();

    let (taken, reason) = match cond {
        "eq" => (z, zs),
        "ne" => (!z, zs),
        "cs" | "hs" => (c, cs),
        "cc" | "lo" => (!c, cs),
        "mi" => (n, show("n", n)),
        "pl" => (!n, show("n", n)),
        "vs" => (v, show("v", v)),
        "vc" => (!v, show("v", v)),
        "hi" => (c && !z, format!("{}, {}", cs, zs)),
        "ls" => (!c || z, format!("{}, {}", cs, zs)),
        "ge" => (n == v, nv),
        "lt" => (n != v, nv),
        "gt" => (!z && n == v, format!("{}, {}", zs, nv)),
        "le" => (z || n != v, format!("{}, {}", zs, nv)),
        "al" => (true, String::new()),
        _ => return None,
    };
    Some(Condition { taken, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const N: u64 = 1 << FLAG_N;
    const Z: u64 = 1 << FLAG_Z;
    const C: u64 = 1 << FLAG_C;
    const V: u64 = 1 << FLAG_V;

    #[rstest]
    #[case("eq", Z, true, "z=1")]
    #[case("eq", N | C, false, "z=0")]
    #[case("ne", Z, false, "z=1")]
    #[case("hs", C, true, "c=1")]
    #[case("lo", C, false, "c=1")]
    #[case("mi", N, true, "n=1")]
    #[case("vc", V, false, "v=1")]
    #[case("hi", C, true, "c=1, z=0")]
    #[case("ls", C | Z, true, "c=1, z=1")]
    #[case("ge", N | V, true, "n=v")]
    #[case("lt", N, true, "n!=v")]
    #[case("gt", 0, true, "z=0, n=v")]
    #[case("le", V, true, "z=0, n!=v")]
    #[case("al", 0, true, "")]
    fn test_evaluate(#[case] cond: &str, #[case] flags: u64, #[case] taken: bool, #[case] reason: &str) {
        let result = evaluate(cond, flags).unwrap();
        assert_eq!(result.taken, taken);
        assert_eq!(result.reason, reason);
    }

    #[test]
    fn test_unknown_condition() {
        assert!(evaluate("nv", 0).is_none());
        assert!(evaluate("", 0).is_none());
    }

    #[test]
    fn test_opposite_pairs_disagree() {
        let pairs = [("eq", "ne"), ("cs", "cc"), ("mi", "pl"), ("vs", "vc"), ("hi", "ls"), ("ge", "lt"), ("gt", "le")];
        for bits in 0..16u64 {
            let flags = bits << FLAG_V;
            for (a, b) in pairs {
                let a = evaluate(a, flags).unwrap().taken;
                let b = evaluate(b, flags).unwrap().taken;
                assert_ne!(a, b, "flags {:#x}", flags);
            }
        }
    }
}
