//! Python bindings for debugger front-ends written in Python

use std::collections::HashMap;
use std::sync::OnceLock;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::arch::ArchProfile;
use crate::info::{ArchInfo, RegInfo, RegisterGroup, RegisterSnapshot};
use crate::registry::Registry;
use crate::{abi, Address, MemoryReader};

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_builtin_profiles)
}

fn profile(arch: &str) -> PyResult<&'static ArchProfile> {
    registry()
        .find(arch)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown architecture: {}", arch)))
}

fn lowered(regs: HashMap<String, u64>) -> HashMap<String, u64> {
    crate::info::normalize_reg_values(&regs)
}

/// Memory reader backed by a Python callable `read(addr, size) -> bytes | None`.
struct PyReader<'py> {
    read: Bound<'py, PyAny>,
}

impl MemoryReader for PyReader<'_> {
    fn read(&self, addr: Address, size: usize) -> Option<Vec<u8>> {
        let data = self.read.call1((addr, size)).ok()?;
        data.extract::<Option<Vec<u8>>>().ok()?
    }
}

/// Detect the profile for a register layout and return its name
#[pyfunction]
#[pyo3(signature = (triple, arch_name, ptr_size, gpr_names, abi=None))]
fn detect(
    triple: &str,
    arch_name: &str,
    ptr_size: usize,
    gpr_names: Vec<String>,
    abi: Option<&str>,
) -> (String, Option<&'static str>) {
    let regs = gpr_names
        .iter()
        .map(|name| RegInfo::new(name, ptr_size as u32))
        .collect();
    let snapshot = RegisterSnapshot {
        triple: triple.to_string(),
        arch_name: arch_name.to_string(),
        ptr_size,
        groups: vec![RegisterGroup::new("General Purpose Registers", regs)],
        ..Default::default()
    };
    let view = registry().detect(ArchInfo::from_snapshot(&snapshot), abi);
    (view.name().to_string(), view.abi().map(|abi| abi.name))
}

/// Evaluate a branch; returns `(taken, reason, kind)` or `None`
#[pyfunction]
#[pyo3(signature = (arch, mnemonic, operands, regs, flags, include_unconditional=true, include_calls=true))]
fn branch_decision(
    arch: &str,
    mnemonic: &str,
    operands: &str,
    regs: HashMap<String, u64>,
    flags: u64,
    include_unconditional: bool,
    include_calls: bool,
) -> PyResult<Option<(bool, String, String)>> {
    let regs = lowered(regs);
    let decision = profile(arch)?.branch_decision(
        mnemonic,
        operands,
        &regs,
        flags,
        include_unconditional,
        include_calls,
    );
    Ok(decision.map(|decision| (decision.taken, decision.reason, decision.kind.to_string())))
}

#[pyfunction]
fn branch_taken(arch: &str, mnemonic: &str, flags: u64) -> PyResult<(bool, String)> {
    Ok(profile(arch)?.branch_taken(mnemonic, flags))
}

/// Resolve a flow target; `read` is an optional `read(addr, size) -> bytes | None`
#[pyfunction]
#[pyo3(signature = (arch, mnemonic, operands, regs, read=None, ptr_size=None))]
fn resolve_flow_target(
    arch: &str,
    mnemonic: &str,
    operands: &str,
    regs: HashMap<String, u64>,
    read: Option<Bound<'_, PyAny>>,
    ptr_size: Option<usize>,
) -> PyResult<Option<u64>> {
    let profile = profile(arch)?;
    let regs = lowered(regs);
    let reader = read.map(|read| PyReader { read });
    let reader = reader.as_ref().map(|reader| reader as &dyn MemoryReader);
    Ok(profile.resolve_flow_target(mnemonic, operands, &regs, reader, ptr_size))
}

#[pyfunction]
fn arg_reg(abi_name: &str, index: usize) -> Option<&'static str> {
    abi::arg_reg(abi::lookup(abi_name), index)
}

/// Python module initialization
#[pymodule]
fn isaview(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(detect, m)?)?;
    m.add_function(wrap_pyfunction!(branch_decision, m)?)?;
    m.add_function(wrap_pyfunction!(branch_taken, m)?)?;
    m.add_function(wrap_pyfunction!(resolve_flow_target, m)?)?;
    m.add_function(wrap_pyfunction!(arg_reg, m)?)?;

    // Expose the output formats as a dict
    let py = m.py();
    let output_format = PyDict::new(py);
    output_format.set_item("TEXT", "text")?;
    output_format.set_item("JSON", "json")?;
    output_format.set_item("JSONL", "jsonl")?;
    output_format.set_item("CSV", "csv")?;
    m.setattr("OutputFormat", output_format)?;

    let architectures: Vec<&str> = registry().profiles().map(|profile| profile.name).collect();
    m.setattr("ARCHITECTURES", architectures)?;

    Ok(())
}
