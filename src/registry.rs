//! Profile registry and architecture detection.
//!
//! The registry is an ordinary value built once at startup and passed to
//! whoever needs detection. Each profile comes with a matcher that scores an
//! [`ArchInfo`]; the best strictly positive score wins and ties go to the
//! profile registered first.

use log::{debug, trace, warn};

use crate::abi::{self, AbiSpec};
use crate::arch::{ArchProfile, ARM32, ARM64, RISCV32, RISCV32_X, RISCV64, RISCV64_X, X86, X86_64};
use crate::family::{allows_family, ArchFamily};
use crate::info::ArchInfo;
use crate::settings::Settings;
use crate::view::ArchView;

/// Scores how well an observed layout fits one profile; 0 or less means no fit.
pub type Matcher = fn(&ArchInfo) -> i32;

struct Entry {
    profile: &'static ArchProfile,
    matcher: Matcher,
}

/// Ordered set of candidate profiles.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in profile with its matcher.
    pub fn with_builtin_profiles() -> Self {
        let mut registry = Self::new();
        for (profile, matcher) in builtin_entries() {
            registry.register(profile, matcher);
        }
        registry
    }

    /// Add `profile` with its matcher. Registering the same profile again is a
    /// no-op and returns `false`.
    pub fn register(&mut self, profile: &'static ArchProfile, matcher: Matcher) -> bool {
        if self.entries.iter().any(|entry| std::ptr::eq(entry.profile, profile)) {
            trace!("Profile {} already registered", profile.name);
            return false;
        }
        self.entries.push(Entry { profile, matcher });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered profiles in registration order
    pub fn profiles(&self) -> impl Iterator<Item = &'static ArchProfile> + '_ {
        self.entries.iter().map(|entry| entry.profile)
    }

    /// First registered profile called `name`, ignoring case.
    pub fn find(&self, name: &str) -> Option<&'static ArchProfile> {
        let name = name.trim();
        self.profiles().find(|profile| profile.name.eq_ignore_ascii_case(name))
    }

    /// Score of every profile the snapshot's triple and arch name allow.
    pub fn scores(&self, info: &ArchInfo) -> Vec<(&'static ArchProfile, i32)> {
        self.entries
            .iter()
            .filter(|entry| allows_family(&info.triple, &info.arch_name, entry.profile.family()))
            .map(|entry| {
                let score = (entry.matcher)(info);
                trace!("Profile {} scored {}", entry.profile.name, score);
                (entry.profile, score)
            })
            .collect()
    }

    /// The best matching profile, if any scores above zero.
    pub fn best_profile(&self, info: &ArchInfo) -> Option<&'static ArchProfile> {
        let mut best: Option<(&'static ArchProfile, i32)> = None;
        for (profile, score) in self.scores(info) {
            if score <= 0 {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((profile, score)),
            }
        }
        match best {
            Some((profile, score)) => {
                debug!("Detected {} (score {})", profile.name, score);
                Some(profile)
            }
            None => {
                debug!(
                    "No profile matches triple '{}' arch '{}'",
                    info.triple, info.arch_name
                );
                None
            }
        }
    }

    /// Match `info` to a profile and attach a calling convention.
    ///
    /// `abi_override` of `None` or `"auto"` selects automatically.
    pub fn detect(&self, info: ArchInfo, abi_override: Option<&str>) -> ArchView {
        let profile = self.best_profile(&info);
        let abi = match profile {
            Some(profile) => resolve_abi(profile, &info, abi_override),
            None => resolve_unknown_abi(&info, abi_override),
        };
        ArchView::new(info, profile, abi)
    }

    /// [`Registry::detect`] with the ABI named in `settings`.
    pub fn detect_with_settings(&self, info: ArchInfo, settings: &Settings) -> ArchView {
        self.detect(info, settings.abi_override())
    }
}

fn override_name(abi_override: Option<&str>) -> Option<&str> {
    abi_override
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case("auto"))
}

/// Calling convention for a matched profile.
///
/// A compatible override wins; then the convention implied by the triple, if
/// it belongs to the profile's family and uses its register names; then the
/// profile's default.
pub fn resolve_abi(
    profile: &ArchProfile,
    info: &ArchInfo,
    abi_override: Option<&str>,
) -> Option<&'static AbiSpec> {
    if let Some(name) = override_name(abi_override) {
        match abi::checked(name, profile.name) {
            Ok(spec) => return Some(spec),
            Err(err) => warn!("{}, ignoring override", err),
        }
    }

    let arch_name = if info.arch_name.is_empty() {
        profile.name
    } else {
        info.arch_name.as_str()
    };
    if let Some(spec) = abi::select(&info.triple, arch_name) {
        let speaks_profile = spec
            .int_arg_regs
            .iter()
            .all(|reg| profile.gpr_names.contains(reg));
        if spec.family == profile.family() && speaks_profile {
            return Some(spec);
        }
        trace!("Inferred ABI {} does not fit {}", spec.name, profile.name);
    }
    profile.abi
}

fn resolve_unknown_abi(info: &ArchInfo, abi_override: Option<&str>) -> Option<&'static AbiSpec> {
    if let Some(name) = override_name(abi_override) {
        match abi::checked(name, &info.arch_name) {
            Ok(spec) => return Some(spec),
            Err(err) => warn!("{}, ignoring override", err),
        }
    }
    abi::select(&info.triple, &info.arch_name)
}

/// Built-in profiles paired with their matchers, in registration order.
pub fn builtin_entries() -> [(&'static ArchProfile, Matcher); 8] {
    [
        (&X86_64, match_x86_64),
        (&X86, match_x86),
        (&ARM64, match_arm64),
        (&ARM32, match_arm32),
        (&RISCV32, match_riscv32),
        (&RISCV32_X, match_riscv32_x),
        (&RISCV64, match_riscv64),
        (&RISCV64_X, match_riscv64_x),
    ]
}

fn lowered(info: &ArchInfo) -> (String, String) {
    (info.triple.to_lowercase(), info.arch_name.to_lowercase())
}

pub fn match_x86_64(info: &ArchInfo) -> i32 {
    let (triple, arch_name) = lowered(info);
    let mut score = 0;
    if triple.contains("x86_64") || triple.contains("amd64") {
        score += 100;
    }
    if arch_name.contains("x86_64") || arch_name.contains("amd64") || arch_name == "x64" {
        score += 50;
    }
    if info.has_all_gprs(&["rax", "rip", "rsp"]) {
        score += 40;
    } else if info.has_any_gpr(&["rax", "rip"]) {
        score += 20;
    }
    if info.ptr_size == 8 {
        score += 5;
    }
    score
}

pub fn match_x86(info: &ArchInfo) -> i32 {
    let (triple, arch_name) = lowered(info);
    if ArchFamily::X86_64.in_text(&triple) || ArchFamily::X86_64.in_text(&arch_name) {
        return 0;
    }
    let mut score = 0;
    if ArchFamily::X86.in_text(&triple) {
        score += 100;
    }
    if ArchFamily::X86.in_text(&arch_name) {
        score += 50;
    }
    if info.has_all_gprs(&["eax", "eip", "esp"]) {
        score += 40;
    } else if info.has_any_gpr(&["eax", "eip"]) {
        score += 20;
    }
    if info.has_gpr("eflags") {
        score += 5;
    }
    if info.ptr_size == 4 {
        score += 5;
    }
    score
}

pub fn match_arm64(info: &ArchInfo) -> i32 {
    let (triple, arch_name) = lowered(info);
    let mut score = 0;
    if ArchFamily::Arm64.in_text(&triple) {
        score += 100;
    }
    if ArchFamily::Arm64.in_text(&arch_name) {
        score += 50;
    }
    if info.has_all_gprs(&["x0", "x1", "sp", "pc"]) {
        score += 40;
    } else if info.has_any_gpr(&["x0", "sp"]) {
        score += 20;
    }
    if info.ptr_size == 8 {
        score += 5;
    }
    score
}

pub fn match_arm32(info: &ArchInfo) -> i32 {
    let (triple, arch_name) = lowered(info);
    if ArchFamily::Arm64.in_text(&triple) || ArchFamily::Arm64.in_text(&arch_name) {
        return 0;
    }
    let mut score = 0;
    if triple.contains("armv") || triple.contains("thumb") {
        score += 80;
    }
    if arch_name.contains("armv") || arch_name.contains("arm") {
        score += 50;
    }
    if arch_name.contains("thumb") {
        score += 30;
    }
    if info.has_all_gprs(&["r0", "r1"]) {
        score += 30;
    } else if info.has_any_gpr(&["r0", "r1"]) {
        score += 15;
    }
    let has_sp = info.has_any_gpr(&["sp", "r13"]);
    let has_pc = info.has_any_gpr(&["pc", "r15"]);
    if has_sp && has_pc {
        score += 25;
    } else if has_sp || has_pc {
        score += 10;
    }
    if info.has_any_gpr(&["lr", "r14"]) {
        score += 5;
    }
    if info.has_any_gpr(&["cpsr", "psr"]) {
        score += 5;
    }
    if info.ptr_size == 4 {
        score += 5;
    }
    score
}

/// RISC-V scoring shared by the four naming/width variants.
fn match_riscv(info: &ArchInfo, bits: usize, abi_names: bool) -> i32 {
    let (triple, arch_name) = lowered(info);
    let mut score = 0;
    if ArchFamily::RiscV.in_text(&triple) || ArchFamily::RiscV.in_text(&arch_name) {
        score += 40;
    }
    let width_tokens: [&str; 2] = if bits == 64 {
        ["riscv64", "rv64"]
    } else {
        ["riscv32", "rv32"]
    };
    if width_tokens
        .iter()
        .any(|token| triple.contains(token) || arch_name.contains(token))
    {
        score += 60;
    }
    if info.ptr_size * 8 == bits {
        score += 5;
    }
    if abi_names {
        if info.has_any_gpr(&["a0", "a1", "ra", "gp", "tp", "zero"]) {
            score += 30;
        } else if info.has_gpr("sp") {
            score += 5;
        } else if info.has_any_gpr(&["x10", "x1", "x2"]) {
            score -= 5;
        }
    } else if info.has_any_gpr(&["x0", "x1", "x10"]) {
        score += 30;
    } else if info.has_gpr("x2") {
        score += 5;
    } else if info.has_any_gpr(&["a0", "ra"]) {
        score -= 5;
    }
    score
}

pub fn match_riscv32(info: &ArchInfo) -> i32 {
    match_riscv(info, 32, true)
}

pub fn match_riscv32_x(info: &ArchInfo) -> i32 {
    match_riscv(info, 32, false)
}

pub fn match_riscv64(info: &ArchInfo) -> i32 {
    match_riscv(info, 64, true)
}

pub fn match_riscv64_x(info: &ArchInfo) -> i32 {
    match_riscv(info, 64, false)
}
