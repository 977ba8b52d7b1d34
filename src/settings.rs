//! Front-end settings that steer detection, annotation and pointer chasing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::abi;
use crate::deref::DerefLimits;
use crate::format::OutputFormat;
use crate::IsaError;

/// Name that selects the calling convention automatically
pub const AUTO_ABI: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `"auto"` or the name of a calling convention
    pub abi: String,
    pub max_deref_depth: usize,
    pub max_string_length: usize,
    pub include_unconditional: bool,
    pub include_calls: bool,
    pub output_format: OutputFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            abi: AUTO_ABI.to_string(),
            max_deref_depth: 6,
            max_string_length: 64,
            include_unconditional: true,
            include_calls: true,
            output_format: OutputFormat::Text,
        }
    }
}

impl Settings {
    /// Parse and validate settings from JSON text. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, IsaError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, IsaError> {
        let settings: Settings = serde_json::from_reader(reader)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, IsaError> {
        let file = File::open(path.as_ref())?;
        log::debug!("loading settings from {}", path.as_ref().display());
        Self::from_reader(BufReader::new(file))
    }

    pub fn to_json(&self) -> Result<String, IsaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), IsaError> {
        if self.max_string_length == 0 {
            return Err(IsaError::InvalidConfig(
                "max_string_length must be at least 1".to_string(),
            ));
        }
        if self.abi_override().is_some_and(|name| abi::lookup(name).is_none()) {
            return Err(IsaError::InvalidConfig(format!("unknown ABI '{}'", self.abi)));
        }
        Ok(())
    }

    /// The named ABI, or `None` for automatic selection.
    pub fn abi_override(&self) -> Option<&str> {
        let name = self.abi.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(AUTO_ABI) {
            None
        } else {
            Some(name)
        }
    }

    pub fn deref_limits(&self) -> DerefLimits {
        DerefLimits {
            max_depth: self.max_deref_depth,
            max_string_length: self.max_string_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.abi_override(), None);
        assert_eq!(settings.deref_limits(), DerefLimits::default());
        assert_eq!(settings.output_format, OutputFormat::Text);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() -> anyhow::Result<()> {
        let settings = Settings::from_json(r#"{"abi": "win64", "output_format": "jsonlines"}"#)?;
        assert_eq!(settings.abi_override(), Some("win64"));
        assert_eq!(settings.output_format, OutputFormat::JsonLines);
        assert_eq!(settings.max_deref_depth, 6);
        assert!(settings.include_calls);
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = Settings::from_json(r#"{"max_string_length": 0}"#).unwrap_err();
        assert!(matches!(err, IsaError::InvalidConfig(_)));
        let err = Settings::from_json(r#"{"abi": "pascal"}"#).unwrap_err();
        assert!(err.to_string().contains("pascal"));
        let err = Settings::from_json(r#"{"max_deref_depth": -1}"#).unwrap_err();
        assert!(matches!(err, IsaError::Json(_)));
    }

    #[test]
    fn test_auto_is_case_insensitive() -> anyhow::Result<()> {
        let settings = Settings::from_json(r#"{"abi": "AUTO"}"#)?;
        assert_eq!(settings.abi_override(), None);
        Ok(())
    }

    #[test]
    fn test_round_trip_through_file() -> anyhow::Result<()> {
        let settings = Settings {
            abi: "aapcs64".to_string(),
            max_deref_depth: 3,
            output_format: OutputFormat::Csv,
            ..Default::default()
        };
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(settings.to_json()?.as_bytes())?;
        file.flush()?;

        let loaded = Settings::from_file(file.path())?;
        assert_eq!(loaded, settings);
        assert_eq!(loaded.deref_limits().max_depth, 3);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Settings::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, IsaError::IoError(_)));
    }
}
