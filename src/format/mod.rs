//! Output formats for annotated listings

mod csv;
mod json;

pub use self::csv::*;
pub use self::json::*;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::deref::format_addr;
use crate::flow::FlowAnnotation;
use crate::IsaError;

/// Supported output formats for annotated listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON format (one document)
    Json,
    /// JSON Lines format (one JSON object per line)
    #[value(name = "jsonl", alias = "jsonlines")]
    #[serde(rename = "jsonl", alias = "jsonlines")]
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn AnnotationFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Renders a slice of annotations.
pub trait AnnotationFormatter {
    /// `ptr_size` sets the zero-padding of addresses; 0 means 8.
    fn format(&self, annotations: &[FlowAnnotation], ptr_size: usize) -> Result<String, IsaError>;
}

/// Format annotations as a code listing
pub struct TextFormatter;

/// Format annotations as one JSON document
pub struct JsonFormatter;

/// Format annotations in JSON Lines
pub struct JsonLinesFormatter;

/// Format annotations in CSV
pub struct CsvFormatter;

fn display_width(ptr_size: usize) -> usize {
    if ptr_size == 0 {
        8
    } else {
        ptr_size
    }
}

impl AnnotationFormatter for TextFormatter {
    fn format(&self, annotations: &[FlowAnnotation], ptr_size: usize) -> Result<String, IsaError> {
        let width = display_width(ptr_size);
        let mut output = String::new();

        for note in annotations {
            let prefix = if note.current { "=>" } else { "  " };
            output.push_str(&format!("{} {} {}", prefix, format_addr(note.address, width), note.mnemonic));
            if !note.operands.is_empty() {
                output.push(' ');
                output.push_str(&note.operands);
            }
            if !note.comment.is_empty() {
                output.push(' ');
                output.push_str(&note.comment);
            }
            output.push('\n');
        }

        Ok(output)
    }
}
