use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnipboxConfig {
    pub sandbox: SandboxConfig,
    pub python: PythonConfig,
    pub javascript: JavaScriptConfig,
}

/// Source language of a submitted snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python, executed by a CPython subprocess
    Python,
    /// JavaScript, executed inside a Node `vm` context
    #[value(name = "javascript", alias = "js")]
    #[serde(alias = "js")]
    JavaScript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

/// Settings shared by every language backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Execution timeout when the request does not carry one
    pub default_timeout_ms: u64,
    /// Address-space limit for the harness process in MB (0 disables)
    pub memory_limit_mb: u64,
    /// Maximum number of bytes kept from each of stdout and stderr
    pub max_output_bytes: usize,
    /// File name (without extension) of the harness written to the work dir
    pub harness_file_stem: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            memory_limit_mb: 1024,
            max_output_bytes: 16 * 1024 * 1024,
            harness_file_stem: "subProcess".to_string(),
        }
    }
}

/// Python backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter used for the harness, the import probe and pip
    pub interpreter: PathBuf,
    /// Install the default-deny syscall filter before running the harness
    pub syscall_filter: bool,
    /// Install missing third-party packages before execution
    pub auto_install: bool,
    /// Deadline for each individual install attempt
    pub install_timeout_seconds: u64,
    /// Installer fallback chain; `{python}` and `{package}` are substituted
    pub install_commands: Vec<Vec<String>>,
    /// Additional import name -> package name mappings
    pub package_map: BTreeMap<String, String>,
    /// Modules denied on top of the built-in denylist
    pub extra_denied_imports: Vec<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            syscall_filter: true,
            auto_install: true,
            install_timeout_seconds: 60,
            install_commands: default_install_commands(),
            package_map: BTreeMap::new(),
            extra_denied_imports: Vec::new(),
        }
    }
}

fn default_install_commands() -> Vec<Vec<String>> {
    let chain: [&[&str]; 3] = [
        &[
            "{python}",
            "-m",
            "pip",
            "install",
            "{package}",
            "--break-system-packages",
            "--quiet",
            "--disable-pip-version-check",
        ],
        &[
            "{python}",
            "-m",
            "pip",
            "install",
            "{package}",
            "--user",
            "--quiet",
            "--disable-pip-version-check",
        ],
        &["pip3", "install", "{package}", "--break-system-packages", "--quiet"],
    ];

    chain
        .iter()
        .map(|cmd| cmd.iter().map(|part| part.to_string()).collect())
        .collect()
}

/// JavaScript backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaScriptConfig {
    /// Node.js binary used to host the `vm` context
    pub node_binary: PathBuf,
    /// Install the syscall filter for Node as well. V8 needs a much wider
    /// syscall set than CPython, so this is off unless the operator opts in.
    pub syscall_filter: bool,
}

impl Default for JavaScriptConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            syscall_filter: false,
        }
    }
}
