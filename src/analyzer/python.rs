use std::sync::OnceLock;

use regex::Regex;
use rustpython_parser::{ast, Parse};
use tracing::debug;

use crate::analyzer::patterns::FileWritePolicy;
use crate::analyzer::{Analyzer, ImportSet};
use crate::config::Language;

/// Standard-library capabilities that grant filesystem, process, network or
/// IPC power to submitted code.
pub const DENIED_MODULES: &[&str] = &[
    "os",
    "subprocess",
    "shutil",
    "socket",
    "ctypes",
    "multiprocessing",
    "threading",
    "pickle",
    "tempfile",
    "pathlib",
    "fileinput",
    "glob",
    "fnmatch",
    "zipfile",
    "tarfile",
    "gzip",
    "bz2",
    "lzma",
    "mmap",
    "signal",
    "resource",
    "pwd",
    "grp",
];

const SOURCE_PATH: &str = "<user_code>";

/// Static analyzer for Python snippets.
pub struct PythonAnalyzer {
    denied: Vec<String>,
    file_policy: FileWritePolicy,
}

impl PythonAnalyzer {
    pub fn new(extra_denied: &[String]) -> Self {
        let mut denied: Vec<String> = DENIED_MODULES.iter().map(|m| m.to_string()).collect();
        denied.extend(extra_denied.iter().cloned());

        Self {
            denied,
            file_policy: FileWritePolicy::python(),
        }
    }
}

impl Default for PythonAnalyzer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Analyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extract_imports(&self, code: &str) -> ImportSet {
        let mut imports = ImportSet::new();

        match ast::Suite::parse(code, SOURCE_PATH) {
            Ok(suite) => collect_imports(&suite, &mut imports),
            Err(e) => {
                // Unparsable code is rejected by the interpreter later on
                debug!(error = %e, "Python parse failed, no imports extracted");
                return imports;
            }
        }

        for caps in dynamic_import_regex().captures_iter(code) {
            imports.insert(caps[1].to_string());
        }

        imports
    }

    fn denylist(&self) -> &[String] {
        &self.denied
    }

    fn file_policy(&self) -> &FileWritePolicy {
        &self.file_policy
    }
}

/// `__import__("x")` and `importlib.import_module("x")` with a literal name.
fn dynamic_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:__import__|import_module)\(\s*['"]([A-Za-z_][A-Za-z0-9_.]*)['"]"#)
            .expect("dynamic import regex is valid")
    })
}

fn collect_imports(body: &[ast::Stmt], imports: &mut ImportSet) {
    for stmt in body {
        match stmt {
            ast::Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    imports.insert(alias.name.as_str().to_string());
                }
            }
            ast::Stmt::ImportFrom(ast::StmtImportFrom { module, .. }) => {
                if let Some(module) = module {
                    imports.insert(module.as_str().to_string());
                }
            }
            ast::Stmt::FunctionDef(ast::StmtFunctionDef { body, .. })
            | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { body, .. })
            | ast::Stmt::ClassDef(ast::StmtClassDef { body, .. })
            | ast::Stmt::With(ast::StmtWith { body, .. })
            | ast::Stmt::AsyncWith(ast::StmtAsyncWith { body, .. }) => {
                collect_imports(body, imports);
            }
            ast::Stmt::If(ast::StmtIf { body, orelse, .. })
            | ast::Stmt::For(ast::StmtFor { body, orelse, .. })
            | ast::Stmt::AsyncFor(ast::StmtAsyncFor { body, orelse, .. })
            | ast::Stmt::While(ast::StmtWhile { body, orelse, .. }) => {
                collect_imports(body, imports);
                collect_imports(orelse, imports);
            }
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | ast::Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                collect_imports(body, imports);
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    collect_imports(&handler.body, imports);
                }
                collect_imports(orelse, imports);
                collect_imports(finalbody, imports);
            }
            ast::Stmt::Match(ast::StmtMatch { cases, .. }) => {
                for case in cases {
                    collect_imports(&case.body, imports);
                }
            }
            _ => {}
        }
    }
}
