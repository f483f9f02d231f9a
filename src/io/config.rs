use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::case::view::{view_by_name, View};

/// Analysis settings, read from a TOML file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// name of the view both readers are compared in
    pub view: String,
    /// compare reader 2 at the phase reader 1 chose
    pub fixed_phase_first_reader: bool,
    /// z value of confidence intervals and limits of agreement
    pub confidence_z: f64,
    pub csv: CsvConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            view: "SAX CINE".to_string(),
            fixed_phase_first_reader: true,
            confidence_z: 1.96,
            csv: CsvConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub delimiter: char,
    pub decimal: char,
}

impl Default for CsvConfig {
    fn default() -> Self {
        CsvConfig {
            delimiter: ';',
            decimal: ',',
        }
    }
}

impl CsvConfig {
    pub fn delimiter_byte(&self) -> Result<u8> {
        if !self.delimiter.is_ascii() {
            return Err(anyhow!("csv delimiter must be an ASCII character, got {:?}", self.delimiter));
        }
        Ok(self.delimiter as u8)
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(text).context("failed to parse analysis config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config file {:?}", path.as_ref()))
    }

    pub fn view(&self) -> Result<&'static View> {
        Ok(view_by_name(&self.view)?)
    }

    fn validate(&self) -> Result<()> {
        self.view()?;
        self.csv.delimiter_byte()?;
        if self.csv.delimiter == self.csv.decimal {
            return Err(anyhow!(
                "csv delimiter and decimal separator are both {:?}",
                self.csv.delimiter
            ));
        }
        if !(self.confidence_z.is_finite() && self.confidence_z > 0.0) {
            return Err(anyhow!("confidence_z must be positive, got {}", self.confidence_z));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() -> anyhow::Result<()> {
        let config = AnalysisConfig::from_toml_str("")?;
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.csv.delimiter_byte()?, b';');
        assert_eq!(config.view()?.name, "SAX CINE");
        Ok(())
    }

    #[test]
    fn test_partial_config() -> anyhow::Result<()> {
        let config = AnalysisConfig::from_toml_str(
            r#"
            view = "SAX T1 MAP"
            fixed_phase_first_reader = false

            [csv]
            delimiter = ","
            decimal = "."
            "#,
        )?;
        assert!(!config.fixed_phase_first_reader);
        assert_eq!(config.confidence_z, 1.96);
        assert_eq!(config.view()?.name, "SAX T1 MAP");
        assert_eq!(config.csv.decimal, '.');
        Ok(())
    }

    #[test]
    fn test_invalid_configs() {
        assert!(AnalysisConfig::from_toml_str(r#"view = "LAX CINE""#).is_err());
        assert!(AnalysisConfig::from_toml_str("confidence_z = -1.0").is_err());
        assert!(AnalysisConfig::from_toml_str("[csv]\ndelimiter = \",\"").is_err());
        assert!(AnalysisConfig::from_toml_str("[csv]\ndelimiter = \"→\"\ndecimal = \".\"").is_err());
    }

    #[test]
    fn test_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("analysis.toml");
        std::fs::write(&path, "confidence_z = 2.58\n")?;
        assert_eq!(AnalysisConfig::from_file(&path)?.confidence_z, 2.58);
        assert!(AnalysisConfig::from_file(dir.path().join("missing.toml")).is_err());
        Ok(())
    }
}
