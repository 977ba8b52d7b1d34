//! CSV output formatter

use serde::Serialize;

use super::{display_width, AnnotationFormatter};
use crate::arch::BranchKind;
use crate::deref::format_addr;
use crate::flow::FlowAnnotation;
use crate::IsaError;

#[derive(Serialize)]
struct CsvRow<'a> {
    address: String,
    mnemonic: &'a str,
    operands: &'a str,
    kind: Option<BranchKind>,
    taken: Option<bool>,
    reason: &'a str,
    target: Option<String>,
}

impl AnnotationFormatter for super::CsvFormatter {
    fn format(&self, annotations: &[FlowAnnotation], ptr_size: usize) -> Result<String, IsaError> {
        let width = display_width(ptr_size);
        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(["address", "mnemonic", "operands", "kind", "taken", "reason", "target"])?;

        for note in annotations {
            writer.serialize(CsvRow {
                address: format_addr(note.address, width),
                mnemonic: &note.mnemonic,
                operands: &note.operands,
                kind: note.kind,
                taken: note.decision.as_ref().map(|decision| decision.taken),
                reason: note.decision.as_ref().map_or("", |decision| decision.reason.as_str()),
                target: note.target.map(|target| format_addr(target, width)),
            })?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|err| IsaError::IoError(err.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|err| IsaError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample;
    use super::super::CsvFormatter;
    use super::*;

    #[test]
    fn test_csv_rows() -> anyhow::Result<()> {
        let rendered = CsvFormatter.format(&sample(), 4)?;
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "address,mnemonic,operands,kind,taken,reason,target");
        assert_eq!(lines[1], "0x00001000,cmp,\"eax, 1\",,,,");
        assert_eq!(lines[2], "0x00001003,je,0x1010,conditional,true,zf=1,0x00001010");
        assert_eq!(lines[3], "0x00001005,ret,,return,,,");
        Ok(())
    }

    #[test]
    fn test_csv_header_only() -> anyhow::Result<()> {
        let rendered = CsvFormatter.format(&[], 8)?;
        assert_eq!(rendered, "address,mnemonic,operands,kind,taken,reason,target\n");
        Ok(())
    }
}
