//! Harness generation.
//!
//! A harness is the program actually handed to the interpreter: injected
//! variables, optional plotting setup, the user code carried as a string
//! literal, the entry-point convention and the result-collection epilogue
//! that prints exactly one JSON line.

mod javascript;
mod python;
pub mod template;

use serde_json::{Map, Value};

use crate::config::Language;
use crate::error::{Result, SnipboxError};

/// Per-request generation settings.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// File name without extension
    pub file_stem: String,
    /// Emit the plotting backend and font setup (Python)
    pub plotting: bool,
    /// In-process execution timeout (JavaScript `vm`)
    pub timeout_ms: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            file_stem: "subProcess".to_string(),
            plotting: false,
            timeout_ms: 60_000,
        }
    }
}

/// A generated program, ready to be written into the work directory.
#[derive(Debug, Clone)]
pub struct HarnessUnit {
    pub language: Language,
    pub file_name: String,
    pub source: String,
}

/// Reject variable names that cannot be injected.
pub fn validate_variables(variables: &Map<String, Value>) -> Result<()> {
    if let Some(key) = variables.keys().find(|k| k.trim().is_empty()) {
        return Err(SnipboxError::MalformedRequest(format!(
            "variable names must not be blank (got {:?})",
            key
        )));
    }
    Ok(())
}

/// Build the harness for `code` in `language`.
pub fn build(
    language: Language,
    code: &str,
    variables: &Map<String, Value>,
    options: &HarnessOptions,
) -> Result<HarnessUnit> {
    validate_variables(variables)?;

    let (extension, source) = match language {
        Language::Python => ("py", python::render(code, variables, options.plotting)),
        Language::JavaScript => ("js", javascript::render(code, variables, options.timeout_ms)),
    };

    Ok(HarnessUnit {
        language,
        file_name: format!("{}.{}", options.file_stem, extension),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_variable_key_is_malformed() {
        let variables = json!({" ": 1}).as_object().cloned().unwrap();
        let err = build(Language::Python, "x = 1", &variables, &HarnessOptions::default())
            .unwrap_err();
        assert!(matches!(err, SnipboxError::MalformedRequest(_)));
    }

    #[test]
    fn test_file_names() {
        let options = HarnessOptions::default();
        let py = build(Language::Python, "x = 1", &Map::new(), &options).unwrap();
        assert_eq!(py.file_name, "subProcess.py");
        let js = build(Language::JavaScript, "x = 1", &Map::new(), &options).unwrap();
        assert_eq!(js.file_name, "subProcess.js");
        assert_eq!(js.language, Language::JavaScript);
    }
}
