//! JSON form data documents

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// The values of one content form, stored as a JSON object on disk
#[derive(Debug, Clone)]
pub struct FormData {
    path: PathBuf,
    fields: Map<String, Value>,
}

impl FormData {
    /// Load a form data file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read form data {}", path.display()))?;
        Self::parse(path, &content)
    }

    /// Parse form data; the document must be a JSON object
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .with_context(|| format!("Form data {} is not valid JSON", path.display()))?;
        let Value::Object(fields) = value else {
            bail!("Form data {} must be a JSON object", path.display());
        };
        Ok(Self {
            path: path.to_path_buf(),
            fields,
        })
    }

    /// A field's value as editable text: strings verbatim, other values as
    /// JSON, missing or null as empty.
    pub fn text_value(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }

    /// The whole form, sent to the agent as context
    pub fn as_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the form back to where it was loaded from
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.fields)?;
        fs::write(&self.path, content + "\n")
            .with_context(|| format!("Failed to write form data {}", self.path.display()))
    }
}
