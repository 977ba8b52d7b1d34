//! Read-only façade over a detected profile and the observed snapshot.
//!
//! Every accessor prefers the profile's static knowledge and falls back to
//! what was observed when no profile matched. Behavior queries answer with
//! neutral values (`false`, `None`, empty) for an unknown architecture.

use crate::abi::{self, AbiSpec};
use crate::arch::{Aliases, ArchProfile, BranchDecision};
use crate::deref::{deref_chain, DerefChain};
use crate::family::ArchFamily;
use crate::info::ArchInfo;
use crate::settings::Settings;
use crate::{Address, MemoryReader, MemoryRegion, Registers, SymbolResolver};

const PC_FALLBACKS: [&str; 3] = ["pc", "rip", "eip"];
const SP_FALLBACKS: [&str; 3] = ["sp", "rsp", "esp"];

#[derive(Debug, Clone)]
pub struct ArchView {
    info: ArchInfo,
    profile: Option<&'static ArchProfile>,
    abi: Option<&'static AbiSpec>,
}

impl ArchView {
    pub fn new(
        info: ArchInfo,
        profile: Option<&'static ArchProfile>,
        abi: Option<&'static AbiSpec>,
    ) -> Self {
        Self { info, profile, abi }
    }

    /// A view over observed data only
    pub fn unknown(info: ArchInfo) -> Self {
        Self::new(info, None, None)
    }

    pub fn info(&self) -> &ArchInfo {
        &self.info
    }

    pub fn profile(&self) -> Option<&'static ArchProfile> {
        self.profile
    }

    pub fn abi(&self) -> Option<&'static AbiSpec> {
        self.abi
    }

    pub fn family(&self) -> Option<ArchFamily> {
        self.profile.map(ArchProfile::family)
    }

    /// Profile name, else the observed arch name, else "unknown".
    pub fn name(&self) -> &str {
        match self.profile {
            Some(profile) => profile.name,
            None if !self.info.arch_name.is_empty() => &self.info.arch_name,
            None => "unknown",
        }
    }

    /// Observed pointer width, else the profile's; 0 when neither knows.
    pub fn ptr_size(&self) -> usize {
        if self.info.ptr_size > 0 {
            return self.info.ptr_size;
        }
        self.profile.map_or(0, |profile| profile.ptr_size)
    }

    pub fn gpr_names(&self) -> Vec<String> {
        match self.profile {
            Some(profile) if !profile.gpr_names.is_empty() => {
                profile.gpr_names.iter().map(|name| name.to_string()).collect()
            }
            _ => self.info.gpr_names.clone(),
        }
    }

    pub fn pc_reg(&self) -> Option<&str> {
        match self.profile {
            Some(profile) => Some(profile.pc_reg),
            None => self.info.pc_reg_name.as_deref(),
        }
    }

    pub fn sp_reg(&self) -> Option<&str> {
        match self.profile {
            Some(profile) => Some(profile.sp_reg),
            None => self.info.sp_reg_name.as_deref(),
        }
    }

    pub fn flags_reg(&self) -> Option<&str> {
        self.profile
            .and_then(|profile| profile.flags_reg)
            .or(self.info.flags_reg_name.as_deref())
    }

    pub fn special_regs(&self) -> &'static [&'static str] {
        self.profile.map_or(&[], |profile| profile.special_regs)
    }

    pub fn max_inst_bytes(&self) -> usize {
        self.profile.map_or(0, |profile| profile.max_inst_bytes)
    }

    /// Return-value register: the profile's, else the ABI's.
    pub fn return_reg(&self) -> Option<&'static str> {
        self.profile
            .and_then(|profile| profile.return_reg)
            .or_else(|| self.abi.and_then(|abi| abi.return_reg))
    }

    pub fn nop_bytes(&self) -> &'static [u8] {
        self.profile.map_or(&[], |profile| profile.nop_bytes)
    }

    pub fn break_bytes(&self) -> &'static [u8] {
        self.profile.map_or(&[], |profile| profile.break_bytes)
    }

    pub fn call_mnemonics(&self) -> &'static [&'static str] {
        self.profile.map_or(&[], |profile| profile.call_mnemonics)
    }

    pub fn pc_value(&self) -> Option<u64> {
        self.info.pc_value
    }

    pub fn sp_value(&self) -> Option<u64> {
        self.info.sp_value
    }

    /// Integer argument register at `index` under the attached ABI.
    pub fn arg_reg(&self, index: usize) -> Option<&'static str> {
        abi::arg_reg(self.abi, index)
    }

    /// Live program counter: the view's PC register, then the usual names.
    pub fn pc_from(&self, regs: &Registers) -> Option<u64> {
        lookup_first(regs, self.pc_reg(), &PC_FALLBACKS)
    }

    /// Live stack pointer: the view's SP register, then the usual names.
    pub fn sp_from(&self, regs: &Registers) -> Option<u64> {
        lookup_first(regs, self.sp_reg(), &SP_FALLBACKS)
    }

    /// Live flags value, if the view knows a flags register and it is present.
    pub fn flags_from(&self, regs: &Registers) -> Option<u64> {
        regs.get(self.flags_reg()?).copied()
    }

    pub fn format_flags(&self, value: u64) -> String {
        self.profile
            .map(|profile| profile.format_flags(value))
            .unwrap_or_default()
    }

    pub fn is_conditional_branch(&self, mnemonic: &str) -> bool {
        self.profile
            .is_some_and(|profile| profile.is_conditional_branch(mnemonic))
    }

    pub fn is_unconditional_branch(&self, mnemonic: &str) -> bool {
        self.profile
            .is_some_and(|profile| profile.is_unconditional_branch(mnemonic))
    }

    pub fn is_call(&self, mnemonic: &str) -> bool {
        self.profile.is_some_and(|profile| profile.is_call(mnemonic))
    }

    pub fn is_return(&self, mnemonic: &str) -> bool {
        self.profile.is_some_and(|profile| profile.is_return(mnemonic))
    }

    pub fn is_branch_like(&self, mnemonic: &str) -> bool {
        self.profile
            .is_some_and(|profile| profile.is_branch_like(mnemonic))
    }

    pub fn branch_taken(&self, mnemonic: &str, flags: u64) -> (bool, String) {
        match self.profile {
            Some(profile) => profile.branch_taken(mnemonic, flags),
            None => (false, String::new()),
        }
    }

    /// Flow target; `ptr_size` defaults to the view's pointer width.
    pub fn resolve_flow_target(
        &self,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        reader: Option<&dyn MemoryReader>,
        ptr_size: Option<usize>,
    ) -> Option<u64> {
        let ptr_size = ptr_size.or(Some(self.ptr_size()).filter(|size| *size > 0));
        self.profile?
            .resolve_flow_target(mnemonic, operands, regs, reader, ptr_size)
    }

    pub fn branch_decision(
        &self,
        mnemonic: &str,
        operands: &str,
        regs: &Registers,
        flags: u64,
        include_unconditional: bool,
        include_calls: bool,
    ) -> Option<BranchDecision> {
        self.profile?.branch_decision(
            mnemonic,
            operands,
            regs,
            flags,
            include_unconditional,
            include_calls,
        )
    }

    pub fn register_aliases(&self, regs: &Registers) -> Aliases {
        self.profile
            .map(|profile| profile.register_aliases(regs))
            .unwrap_or_default()
    }

    pub fn mem_operand_targets(&self, operands: &str, regs: &Registers) -> Vec<u64> {
        self.profile
            .map(|profile| profile.mem_operand_targets(operands, regs))
            .unwrap_or_default()
    }

    /// Pointer chain from `addr` at this view's pointer width, bounded by
    /// the limits in `settings`.
    pub fn deref(
        &self,
        addr: Address,
        reader: &dyn MemoryReader,
        regions: &[MemoryRegion],
        resolver: Option<&dyn SymbolResolver>,
        settings: &Settings,
    ) -> DerefChain {
        deref_chain(addr, reader, regions, resolver, &settings.deref_limits(), self.ptr_size())
    }
}

fn lookup_first(regs: &Registers, preferred: Option<&str>, fallbacks: &[&str]) -> Option<u64> {
    preferred
        .into_iter()
        .chain(fallbacks.iter().copied())
        .find_map(|name| regs.get(name).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::SYSV_X64;
    use crate::arch::{ARM64, X86_64};
    use crate::MemorySegments;

    fn regs(pairs: &[(&str, u64)]) -> Registers {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn observed() -> ArchInfo {
        ArchInfo {
            triple: "mystery-unknown-none".to_string(),
            arch_name: "mystery".to_string(),
            ptr_size: 4,
            gpr_names: vec!["r0".to_string(), "pc".to_string()],
            pc_reg_name: Some("pc".to_string()),
            sp_reg_name: Some("sp".to_string()),
            flags_reg_name: Some("status".to_string()),
            pc_value: Some(0x100),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_view_degrades_to_observed_data() {
        let view = ArchView::unknown(observed());
        assert_eq!(view.name(), "mystery");
        assert_eq!(view.ptr_size(), 4);
        assert_eq!(view.gpr_names(), vec!["r0".to_string(), "pc".to_string()]);
        assert_eq!(view.pc_reg(), Some("pc"));
        assert_eq!(view.flags_reg(), Some("status"));
        assert_eq!(view.pc_value(), Some(0x100));
        assert_eq!(view.max_inst_bytes(), 0);
        assert!(view.nop_bytes().is_empty());
        assert!(view.return_reg().is_none());
        assert!(view.arg_reg(0).is_none());
        assert_eq!(view.format_flags(0xff), "");
        assert!(!view.is_branch_like("jmp"));
        assert_eq!(view.branch_taken("je", 1 << 6), (false, String::new()));
        assert!(view.branch_decision("jmp", "0x10", &Registers::new(), 0, true, true).is_none());
        assert!(view.resolve_flow_target("jmp", "0x10", &Registers::new(), None, None).is_none());
        assert!(view.register_aliases(&regs(&[("rax", 1)])).is_empty());
        assert!(view.mem_operand_targets("[rax]", &regs(&[("rax", 1)])).is_empty());
    }

    #[test]
    fn test_empty_info_is_unknown() {
        let view = ArchView::unknown(ArchInfo::default());
        assert_eq!(view.name(), "unknown");
        assert_eq!(view.ptr_size(), 0);
        assert!(view.pc_reg().is_none());
    }

    #[test]
    fn test_profile_wins_over_observed() {
        let view = ArchView::new(observed(), Some(&X86_64), Some(&SYSV_X64));
        assert_eq!(view.name(), "x86_64");
        assert_eq!(view.pc_reg(), Some("rip"));
        assert_eq!(view.flags_reg(), Some("rflags"));
        assert_eq!(view.return_reg(), Some("rax"));
        assert_eq!(view.break_bytes(), &[0xcc]);
        assert_eq!(view.arg_reg(1), Some("rsi"));
        // Observed pointer size is kept even when the profile disagrees
        assert_eq!(view.ptr_size(), 4);
    }

    #[test]
    fn test_profile_fills_missing_ptr_size() {
        let view = ArchView::new(ArchInfo::default(), Some(&ARM64), None);
        assert_eq!(view.ptr_size(), 8);
        assert!(view.arg_reg(0).is_none());
    }

    #[test]
    fn test_deref_follows_settings() {
        // 0x1000 -> 0x1008 -> 0x1010 -> ...
        let mut data = Vec::new();
        for i in 1..=16u64 {
            data.extend_from_slice(&(0x1000 + 8 * i).to_le_bytes());
        }
        let mem = MemorySegments::new().with_segment(0x1000, data);
        let regions = [MemoryRegion::new(0x1000, 0x1080, true, true, false)];
        let view = ArchView::new(ArchInfo::default(), Some(&X86_64), Some(&SYSV_X64));

        let chain = view.deref(0x1000, &mem, &regions, None, &Settings::default());
        assert_eq!(chain.len(), 7);
        assert_eq!(chain.tokens()[0], "0x0000000000001000");

        let shallow = Settings {
            max_deref_depth: 2,
            ..Default::default()
        };
        let chain = view.deref(0x1000, &mem, &regions, None, &shallow);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.last_addr(), Some(0x1010));
    }

    #[test]
    fn test_live_register_lookups() {
        let view = ArchView::new(ArchInfo::default(), Some(&X86_64), Some(&SYSV_X64));
        let live = regs(&[("rip", 0x401000), ("rsp", 0x7000), ("rflags", 0x46)]);
        assert_eq!(view.pc_from(&live), Some(0x401000));
        assert_eq!(view.sp_from(&live), Some(0x7000));
        assert_eq!(view.flags_from(&live), Some(0x46));
        assert_eq!(view.pc_from(&regs(&[("pc", 5)])), Some(5));
        assert_eq!(view.flags_from(&Registers::new()), None);
    }
}
