//! Static security analysis of submitted code.
//!
//! Each language has an [`Analyzer`] that extracts the modules a snippet
//! references and produces a [`SecurityVerdict`]. The pipeline asks for the
//! imports first (dependency resolution needs them) and for the verdict only
//! after resolution succeeded, so the reported error follows a fixed order:
//! resolution, dangerous imports, file-write patterns.

pub mod javascript;
pub mod patterns;
pub mod python;

use std::collections::BTreeSet;

use crate::config::{Language, SnipboxConfig};
use crate::error::{Result, SnipboxError};

pub use javascript::JavaScriptAnalyzer;
pub use patterns::FileWritePolicy;
pub use python::PythonAnalyzer;

/// Distinct module identifiers referenced by a snippet.
pub type ImportSet = BTreeSet<String>;

/// Outcome of the static security checks for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityVerdict {
    Allowed,
    DeniedImport(String),
    DeniedFileOp(String),
}

impl SecurityVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SecurityVerdict::Allowed)
    }

    /// Convert a denial into the matching error.
    pub fn into_result(self) -> Result<()> {
        match self {
            SecurityVerdict::Allowed => Ok(()),
            SecurityVerdict::DeniedImport(name) => Err(SnipboxError::DeniedImport { name }),
            SecurityVerdict::DeniedFileOp(pattern) => Err(SnipboxError::DeniedFileOp { pattern }),
        }
    }
}

/// Imports together with the verdict computed from them.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub imports: ImportSet,
    pub verdict: SecurityVerdict,
}

/// Per-language static analyzer.
pub trait Analyzer: Send + Sync {
    fn language(&self) -> Language;

    /// Collect every referenced module. Never fails: unparsable code yields
    /// an empty set.
    fn extract_imports(&self, code: &str) -> ImportSet;

    /// Modules that may not be imported.
    fn denylist(&self) -> &[String];

    /// Textual file-write policy for this language.
    fn file_policy(&self) -> &FileWritePolicy;

    /// First import whose name, or any dotted prefix of it, is denylisted.
    fn denied_import(&self, imports: &ImportSet) -> Option<String> {
        let denylist = self.denylist();
        imports
            .iter()
            .find(|name| {
                module_prefixes(name).any(|prefix| denylist.iter().any(|d| d == prefix))
            })
            .cloned()
    }

    /// Dangerous-import check, then file-write check.
    fn verdict(&self, code: &str, imports: &ImportSet) -> SecurityVerdict {
        if let Some(name) = self.denied_import(imports) {
            return SecurityVerdict::DeniedImport(name);
        }
        if let Some(pattern) = self.file_policy().scan(code) {
            return SecurityVerdict::DeniedFileOp(pattern.to_string());
        }
        SecurityVerdict::Allowed
    }

    fn analyze(&self, code: &str) -> Analysis {
        let imports = self.extract_imports(code);
        let verdict = self.verdict(code, &imports);
        Analysis { imports, verdict }
    }
}

/// Root package of a dotted module path (`matplotlib.pyplot` -> `matplotlib`).
pub fn root_module(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// `a`, `a.b`, `a.b.c` for `a.b.c`.
fn module_prefixes(name: &str) -> impl Iterator<Item = &str> {
    name.match_indices('.')
        .map(move |(idx, _)| &name[..idx])
        .chain(std::iter::once(name))
}

/// Create the analyzer for a language.
pub fn analyzer_for(language: Language, config: &SnipboxConfig) -> Box<dyn Analyzer> {
    match language {
        Language::Python => Box::new(PythonAnalyzer::new(&config.python.extra_denied_imports)),
        Language::JavaScript => Box::new(JavaScriptAnalyzer::default()),
    }
}
