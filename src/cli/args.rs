use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Language;

#[derive(Parser, Debug)]
#[clap(name = "snipbox")]
#[clap(version, about = "Sandboxed execution of untrusted Python and JavaScript snippets")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SNIPBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a Python snippet
    Python(RunArgs),

    /// Execute a JavaScript snippet
    #[clap(name = "js", alias = "javascript")]
    Js(RunArgs),

    /// Show the imports and security verdict for a snippet without running it
    Analyze(AnalyzeArgs),

    /// List language backends and whether they can run here
    Backends(BackendsArgs),

    /// Initialize a new snipbox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Execution Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON request file ({"code", "variables", "tempDir", "timeoutMs"}); "-" reads stdin.
    /// Stdin is also used when neither --code nor --file is given.
    #[clap(long, short = 'r', conflicts_with_all = ["code", "file"])]
    pub request: Option<PathBuf>,

    /// Source code to execute
    #[clap(long, short = 'c', conflicts_with = "file")]
    pub code: Option<String>,

    /// Read the source code from a file
    #[clap(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Variable to inject (KEY=JSON); values that are not valid JSON are taken as strings
    #[clap(long = "var", value_parser = parse_variable)]
    pub variables: Vec<(String, serde_json::Value)>,

    /// Work directory for the harness file; a temporary one is created if omitted
    #[clap(long)]
    pub temp_dir: Option<PathBuf>,

    /// Wall-clock timeout in milliseconds
    #[clap(long)]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// Inspection Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Source language
    #[clap(long, short = 'l', value_enum, default_value = "python")]
    pub language: Language,

    /// Source file; stdin when omitted
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BackendsArgs {
    /// Also run a one-line snippet through each available backend
    #[clap(long)]
    pub check: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

// ============================================================================
// Common Types
// ============================================================================

fn parse_variable(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| "Variable format: KEY=JSON".to_string())?;
    if key.trim().is_empty() {
        return Err("Variable name must not be empty".to_string());
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
