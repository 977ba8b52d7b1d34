//! Per-instruction control-flow annotations for a code listing.

use serde::Serialize;

use crate::arch::{BranchDecision, BranchKind};
use crate::settings::Settings;
use crate::view::ArchView;
use crate::{Address, Insn, IsaError, MemoryReader, Registers};

/// What a listing shows next to one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowAnnotation {
    pub address: Address,
    pub mnemonic: String,
    pub operands: String,
    /// Whether this is the instruction at the program counter
    pub current: bool,
    pub kind: Option<BranchKind>,
    pub decision: Option<BranchDecision>,
    pub target: Option<Address>,
    pub comment: String,
}

/// One integer argument register and its live value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallArgument {
    pub index: usize,
    pub reg: &'static str,
    pub value: u64,
}

/// Static branch kind from the mnemonic alone.
pub fn branch_kind(view: &ArchView, mnemonic: &str) -> Option<BranchKind> {
    if view.is_conditional_branch(mnemonic) {
        Some(BranchKind::Conditional)
    } else if view.is_return(mnemonic) {
        Some(BranchKind::Return)
    } else if view.is_call(mnemonic) {
        Some(BranchKind::Call)
    } else if view.is_unconditional_branch(mnemonic) {
        Some(BranchKind::Unconditional)
    } else if view.is_branch_like(mnemonic) {
        // compare-and-branch and counted forms
        Some(BranchKind::Conditional)
    } else {
        None
    }
}

/// `; taken (reason)` for a conditional decision, empty otherwise.
pub fn decision_comment(decision: &BranchDecision) -> String {
    if decision.kind != BranchKind::Conditional {
        return String::new();
    }
    let verdict = if decision.taken { "taken" } else { "not taken" };
    if decision.reason.is_empty() {
        format!("; {}", verdict)
    } else {
        format!("; {} ({})", verdict, decision.reason)
    }
}

/// Annotate one instruction.
///
/// Live register state only describes the instruction at the program
/// counter, so other instructions get a static kind and an immediate target
/// at most. `settings` decides whether jumps and calls at the program counter
/// get an always-taken decision.
pub fn annotate(
    view: &ArchView,
    insn: &Insn,
    regs: &Registers,
    reader: Option<&dyn MemoryReader>,
    is_current: bool,
    settings: &Settings,
) -> FlowAnnotation {
    let mut annotation = FlowAnnotation {
        address: insn.addr,
        mnemonic: insn.mnemonic.clone(),
        operands: insn.operands.clone(),
        current: is_current,
        kind: branch_kind(view, &insn.mnemonic),
        decision: None,
        target: None,
        comment: String::new(),
    };
    if annotation.kind.is_none() {
        return annotation;
    }

    if is_current {
        let flags = view.flags_from(regs).unwrap_or(0);
        annotation.decision = view.branch_decision(
            &insn.mnemonic,
            &insn.operands,
            regs,
            flags,
            settings.include_unconditional,
            settings.include_calls,
        );
        annotation.target = view.resolve_flow_target(&insn.mnemonic, &insn.operands, regs, reader, None);
    } else {
        let empty = Registers::new();
        annotation.target = view.resolve_flow_target(&insn.mnemonic, &insn.operands, &empty, None, None);
    }
    if let Some(decision) = &annotation.decision {
        annotation.kind = Some(decision.kind);
        annotation.comment = decision_comment(decision);
    }
    annotation
}

/// Annotate a listing, marking the instruction at the live program counter.
pub fn annotate_listing(
    view: &ArchView,
    insns: &[Insn],
    regs: &Registers,
    reader: Option<&dyn MemoryReader>,
    settings: &Settings,
) -> Vec<FlowAnnotation> {
    let pc = view.pc_from(regs).or(view.pc_value());
    insns
        .iter()
        .map(|insn| annotate(view, insn, regs, reader, Some(insn.addr) == pc, settings))
        .collect()
}

/// Annotate a listing and render it in the configured output format.
pub fn render_listing(
    view: &ArchView,
    insns: &[Insn],
    regs: &Registers,
    reader: Option<&dyn MemoryReader>,
    settings: &Settings,
) -> Result<String, IsaError> {
    let annotations = annotate_listing(view, insns, regs, reader, settings);
    let formatter = settings.output_format.get_formatter();
    formatter.format(&annotations, view.ptr_size())
}

/// Argument registers of the attached ABI that are present in `regs`.
pub fn call_arguments(view: &ArchView, regs: &Registers) -> Vec<CallArgument> {
    let Some(abi) = view.abi() else {
        return Vec::new();
    };
    abi.int_arg_regs
        .iter()
        .enumerate()
        .filter_map(|(index, &reg)| {
            regs.get(reg).map(|value| CallArgument {
                index,
                reg,
                value: *value,
            })
        })
        .collect()
}
