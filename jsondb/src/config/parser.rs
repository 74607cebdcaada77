use super::types::Options;
use crate::error::Result;
use std::path::Path;

/// Parse an options YAML file
pub fn parse_options(path: &Path) -> Result<Options> {
    let content = std::fs::read_to_string(path)?;
    parse_options_str(&content)
}

/// Parse options from a YAML string. Missing keys keep their defaults.
pub fn parse_options_str(content: &str) -> Result<Options> {
    if content.trim().is_empty() {
        return Ok(Options::default());
    }
    let options: Options = serde_yaml::from_str(content)?;
    Ok(options)
}

impl Options {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        parse_options(path)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        parse_options_str(content)
    }
}
