use std::sync::OnceLock;

use regex::Regex;

use crate::analyzer::patterns::FileWritePolicy;
use crate::analyzer::{Analyzer, ImportSet};
use crate::config::Language;

/// Node core modules that expose filesystem, process, network or isolate
/// escape hatches.
pub const DENIED_MODULES: &[&str] = &[
    "child_process",
    "fs",
    "fs/promises",
    "net",
    "dgram",
    "http",
    "https",
    "http2",
    "tls",
    "cluster",
    "worker_threads",
    "vm",
    "os",
    "v8",
    "inspector",
    "module",
    "process",
];

/// Static analyzer for JavaScript snippets.
///
/// JavaScript has no parser in this crate; module specifiers are collected
/// from `require(...)`, static `import` declarations and dynamic `import(...)`.
pub struct JavaScriptAnalyzer {
    denied: Vec<String>,
    file_policy: FileWritePolicy,
}

impl Default for JavaScriptAnalyzer {
    fn default() -> Self {
        Self {
            denied: DENIED_MODULES.iter().map(|m| m.to_string()).collect(),
            file_policy: FileWritePolicy::javascript(),
        }
    }
}

fn module_specifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:\brequire\s*\(\s*|\bimport\s*\(\s*|\bfrom\s+|\bimport\s+)['"`]([^'"`\s]+)['"`]"#,
        )
        .expect("module specifier regex is valid")
    })
}

impl Analyzer for JavaScriptAnalyzer {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn extract_imports(&self, code: &str) -> ImportSet {
        module_specifier_regex()
            .captures_iter(code)
            .map(|caps| {
                let spec = &caps[1];
                spec.strip_prefix("node:").unwrap_or(spec).to_string()
            })
            .collect()
    }

    fn denylist(&self) -> &[String] {
        &self.denied
    }

    fn file_policy(&self) -> &FileWritePolicy {
        &self.file_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::SecurityVerdict;

    #[test]
    fn test_extract_specifiers() {
        let code = r#"
const cp = require('child_process');
import fs from "node:fs";
import "./side-effect.js";
const lazy = await import(`lodash`);
"#;
        let found: Vec<String> = JavaScriptAnalyzer::default()
            .extract_imports(code)
            .into_iter()
            .collect();
        assert_eq!(found, vec!["./side-effect.js", "child_process", "fs", "lodash"]);
    }

    #[test]
    fn test_denied_require() {
        let analyzer = JavaScriptAnalyzer::default();
        let verdict = analyzer
            .analyze("const { execSync } = require('child_process');")
            .verdict;
        assert_eq!(
            verdict,
            SecurityVerdict::DeniedImport("child_process".to_string())
        );
    }

    #[test]
    fn test_plain_code_allowed() {
        let analyzer = JavaScriptAnalyzer::default();
        let verdict = analyzer
            .analyze("function main(variables) { return { sum: variables.a + 1 }; }")
            .verdict;
        assert_eq!(verdict, SecurityVerdict::Allowed);
    }
}
