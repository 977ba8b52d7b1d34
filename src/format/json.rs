//! JSON and JSON Lines output formatters

use serde::Serialize;

use super::{display_width, AnnotationFormatter};
use crate::arch::BranchKind;
use crate::deref::format_addr;
use crate::flow::FlowAnnotation;
use crate::IsaError;

/// Serializable instruction for JSON output
#[derive(Serialize)]
struct InstructionJson<'a> {
    /// Address of the instruction
    address: String,
    mnemonic: &'a str,
    operands: &'a str,
    current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<BranchKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    taken: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    /// Resolved branch target
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    comment: &'a str,
}

/// Serializable listing for JSON output
#[derive(Serialize)]
struct ListingJson<'a> {
    instructions: Vec<InstructionJson<'a>>,
}

impl AnnotationFormatter for super::JsonFormatter {
    fn format(&self, annotations: &[FlowAnnotation], ptr_size: usize) -> Result<String, IsaError> {
        let width = display_width(ptr_size);
        let listing = ListingJson {
            instructions: annotations.iter().map(|note| instruction_to_json(note, width)).collect(),
        };
        Ok(serde_json::to_string_pretty(&listing)?)
    }
}

impl AnnotationFormatter for super::JsonLinesFormatter {
    fn format(&self, annotations: &[FlowAnnotation], ptr_size: usize) -> Result<String, IsaError> {
        let width = display_width(ptr_size);
        let mut output = String::new();

        for note in annotations {
            output.push_str(&serde_json::to_string(&instruction_to_json(note, width))?);
            output.push('\n');
        }

        Ok(output)
    }
}

/// Convert an annotation to its JSON form
fn instruction_to_json(note: &FlowAnnotation, width: usize) -> InstructionJson<'_> {
    InstructionJson {
        address: format_addr(note.address, width),
        mnemonic: &note.mnemonic,
        operands: &note.operands,
        current: note.current,
        kind: note.kind,
        taken: note.decision.as_ref().map(|decision| decision.taken),
        reason: note
            .decision
            .as_ref()
            .map(|decision| decision.reason.as_str())
            .filter(|reason| !reason.is_empty()),
        target: note.target.map(|target| format_addr(target, width)),
        comment: &note.comment,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample;
    use super::super::{JsonFormatter, JsonLinesFormatter};
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_json_document() -> anyhow::Result<()> {
        let rendered = JsonFormatter.format(&sample(), 4)?;
        let doc: Value = serde_json::from_str(&rendered)?;
        let insns = doc["instructions"].as_array().expect("instructions array");
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[1]["address"], "0x00001003");
        assert_eq!(insns[1]["kind"], "conditional");
        assert_eq!(insns[1]["taken"], true);
        assert_eq!(insns[1]["reason"], "zf=1");
        assert_eq!(insns[1]["target"], "0x00001010");
        assert!(insns[0].get("kind").is_none());
        assert_eq!(insns[2]["kind"], "return");
        assert!(insns[2].get("taken").is_none());
        Ok(())
    }

    #[test]
    fn test_json_lines() -> anyhow::Result<()> {
        let rendered = JsonLinesFormatter.format(&sample(), 8)?;
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let _: Value = serde_json::from_str(line)?;
        }
        let current: Value = serde_json::from_str(lines[1])?;
        assert_eq!(current["current"], true);
        assert_eq!(current["comment"], "; taken (zf=1)");
        Ok(())
    }

    #[test]
    fn test_empty_listing() -> anyhow::Result<()> {
        assert_eq!(JsonLinesFormatter.format(&[], 8)?, "");
        let doc: Value = serde_json::from_str(&JsonFormatter.format(&[], 8)?)?;
        assert_eq!(doc["instructions"].as_array().map(Vec::len), Some(0));
        Ok(())
    }
}
