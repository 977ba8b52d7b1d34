//! Normalized view of the register layout observed at a debugger stop.

use std::collections::HashSet;

use crate::Registers;

const PC_CANDIDATES: [&str; 3] = ["pc", "rip", "eip"];
const SP_CANDIDATES: [&str; 3] = ["sp", "rsp", "esp"];
const FLAGS_CANDIDATES: [&str; 5] = ["cpsr", "rflags", "eflags", "flags", "psr"];

/// One hardware register: lower-cased name and width in bytes (0 = unknown).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegInfo {
    pub name: String,
    pub byte_size: u32,
}

impl RegInfo {
    pub fn new(name: &str, byte_size: u32) -> Self {
        Self {
            name: normalize_reg_name(name),
            byte_size,
        }
    }
}

/// A named register group as the host debugger reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterGroup {
    pub name: String,
    pub regs: Vec<RegInfo>,
}

impl RegisterGroup {
    /// Create a group, normalizing register names and dropping nameless ones.
    pub fn new(name: &str, regs: Vec<RegInfo>) -> Self {
        let regs = regs
            .into_iter()
            .map(|reg| RegInfo::new(&reg.name, reg.byte_size))
            .filter(|reg| !reg.name.is_empty())
            .collect();
        Self {
            name: name.to_string(),
            regs,
        }
    }

    /// Shorthand for groups whose register widths are all `byte_size`.
    pub fn uniform(name: &str, names: &[&str], byte_size: u32) -> Self {
        Self::new(
            name,
            names.iter().map(|reg| RegInfo::new(reg, byte_size)).collect(),
        )
    }

    fn has(&self, name: &str) -> bool {
        self.regs.iter().any(|reg| reg.name == name)
    }
}

/// Everything the host knows about registers at one stop.
#[derive(Debug, Clone, Default)]
pub struct RegisterSnapshot {
    /// Target triple, e.g. "x86_64-apple-darwin"
    pub triple: String,
    /// Architecture name as reported by the host
    pub arch_name: String,
    /// Pointer width in bytes (0 = unknown)
    pub ptr_size: usize,
    /// Register groups in declaration order
    pub groups: Vec<RegisterGroup>,
    pub pc_value: Option<u64>,
    pub sp_value: Option<u64>,
    /// Names the host already resolved, if any
    pub pc_reg_name: Option<String>,
    pub sp_reg_name: Option<String>,
    pub flags_reg_name: Option<String>,
    /// Live register values
    pub values: Registers,
}

/// Architecture facts derived from a [`RegisterSnapshot`].
///
/// Built once per stop; never talks back to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchInfo {
    pub triple: String,
    pub arch_name: String,
    pub ptr_size: usize,
    /// The register group selected as general purpose
    pub gpr: Vec<RegInfo>,
    pub gpr_names: Vec<String>,
    pub groups: Vec<RegisterGroup>,
    pub pc_value: Option<u64>,
    pub sp_value: Option<u64>,
    pub pc_reg_name: Option<String>,
    pub sp_reg_name: Option<String>,
    pub flags_reg_name: Option<String>,
}

impl ArchInfo {
    /// Normalize a snapshot into architecture facts.
    pub fn from_snapshot(snapshot: &RegisterSnapshot) -> Self {
        let groups: Vec<RegisterGroup> = snapshot
            .groups
            .iter()
            .map(|group| RegisterGroup::new(&group.name, group.regs.clone()))
            .collect();
        let ptr_size = snapshot.ptr_size;
        let gpr = select_gpr_group(&groups, ptr_size)
            .map(|idx| groups[idx].regs.clone())
            .unwrap_or_default();
        let gpr_names: Vec<String> = gpr.iter().map(|reg| reg.name.clone()).collect();
        let values = normalize_reg_values(&snapshot.values);

        let pc_reg_name = explicit_name(&snapshot.pc_reg_name)
            .or_else(|| find_named_reg(&gpr_names, &groups, &PC_CANDIDATES))
            .or_else(|| {
                let pc = snapshot.pc_value?;
                find_reg_by_value(&groups, &values, ptr_size, pc)
            });
        let sp_reg_name = explicit_name(&snapshot.sp_reg_name)
            .or_else(|| find_named_reg(&gpr_names, &groups, &SP_CANDIDATES))
            .or_else(|| {
                let sp = snapshot.sp_value?;
                find_reg_by_value(&groups, &values, ptr_size, sp)
            });
        let flags_reg_name = explicit_name(&snapshot.flags_reg_name)
            .or_else(|| find_named_reg(&gpr_names, &groups, &FLAGS_CANDIDATES));

        let mut arch_name = snapshot.arch_name.trim().to_string();
        if arch_name.is_empty() {
            if let Some(head) = snapshot.triple.split('-').next() {
                arch_name = head.trim().to_string();
            }
        }

        Self {
            triple: snapshot.triple.trim().to_string(),
            arch_name,
            ptr_size,
            gpr,
            gpr_names,
            groups,
            pc_value: snapshot.pc_value,
            sp_value: snapshot.sp_value,
            pc_reg_name,
            sp_reg_name,
            flags_reg_name,
        }
    }

    /// Whether the general purpose group has a register called `name`.
    pub fn has_gpr(&self, name: &str) -> bool {
        self.gpr_names.iter().any(|reg| reg == name)
    }

    /// Whether the general purpose group has every register in `names`.
    pub fn has_all_gprs(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.has_gpr(name))
    }

    /// Whether the general purpose group has any register in `names`.
    pub fn has_any_gpr(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.has_gpr(name))
    }
}

/// Lower-case, trimmed register name.
pub fn normalize_reg_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Lower-case every key of a register value map.
pub fn normalize_reg_values(values: &Registers) -> Registers {
    values
        .iter()
        .map(|(name, value)| (normalize_reg_name(name), *value))
        .collect()
}

/// Score a register group for "general purpose"-ness. Empty groups score -1.
pub fn score_reg_group(group: &RegisterGroup, ptr_size: usize) -> i64 {
    if group.regs.is_empty() {
        return -1;
    }
    let mut score = 0i64;
    let lower = group.name.to_lowercase();
    if (lower.contains("general") && lower.contains("purpose")) || lower.contains("gpr") {
        score += 100;
    }
    if ptr_size > 0 {
        let sized = group
            .regs
            .iter()
            .filter(|reg| reg.byte_size as usize == ptr_size)
            .count();
        score += 2 * sized as i64;
    }
    if PC_CANDIDATES.iter().any(|name| group.has(name)) {
        score += 5;
    }
    if SP_CANDIDATES.iter().any(|name| group.has(name)) {
        score += 5;
    }
    score + group.regs.len() as i64
}

/// Index of the best general purpose group; ties go to the earlier group.
pub fn select_gpr_group(groups: &[RegisterGroup], ptr_size: usize) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (idx, group) in groups.iter().enumerate() {
        let score = score_reg_group(group, ptr_size);
        log::trace!("register group '{}' scored {}", group.name, score);
        if score < 0 {
            continue;
        }
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((idx, score));
        }
    }
    if let Some((idx, score)) = best {
        log::debug!("selected register group '{}' (score {})", groups[idx].name, score);
    }
    best.map(|(idx, _)| idx)
}

fn explicit_name(name: &Option<String>) -> Option<String> {
    name.as_deref()
        .map(normalize_reg_name)
        .filter(|name| !name.is_empty())
}

fn find_candidate(names: &[String], candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|candidate| names.iter().any(|name| name == *candidate))
        .map(|candidate| candidate.to_string())
}

/// First candidate present in the GPR names, then in any group.
fn find_named_reg(gpr_names: &[String], groups: &[RegisterGroup], candidates: &[&str]) -> Option<String> {
    if let Some(found) = find_candidate(gpr_names, candidates) {
        return Some(found);
    }
    groups.iter().find_map(|group| {
        let names: Vec<String> = group.regs.iter().map(|reg| reg.name.clone()).collect();
        find_candidate(&names, candidates)
    })
}

/// The unique pointer-sized register whose value equals `target`.
///
/// Two or more matches mean the answer is unknown.
pub fn find_reg_by_value(
    groups: &[RegisterGroup],
    values: &Registers,
    ptr_size: usize,
    target: u64,
) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let mut seen = HashSet::new();
    let mut found: Option<&str> = None;
    for reg in groups.iter().flat_map(|group| group.regs.iter()) {
        if !seen.insert(reg.name.as_str()) {
            continue;
        }
        if ptr_size > 0 && reg.byte_size > 0 && reg.byte_size as usize != ptr_size {
            continue;
        }
        if values.get(&reg.name) != Some(&target) {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(reg.name.as_str());
    }
    found.map(str::to_string)
}
