use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::analyzer::analyzer_for;
use crate::cli::args::{
    AnalyzeArgs, BackendsArgs, ConfigAction, ConfigArgs, InitArgs, OutputFormat, RunArgs,
};
use crate::config::loader::get_config_path;
use crate::config::{Language, SnipboxConfig};
use crate::engine::Engine;
use crate::error::{Result, SnipboxError};
use crate::sandbox::{available_backends, create_backend, ExecutionRequest, ExecutionResult};

// ============================================================================
// Execution Commands
// ============================================================================

/// Execute one snippet and print the result.
pub async fn run(
    language: Language,
    args: RunArgs,
    config: SnipboxConfig,
    format: OutputFormat,
) -> Result<()> {
    let mut request = build_request(&args)?;

    // Held until the run finishes; dropping it removes the directory.
    let scratch = match &request.temp_dir {
        Some(_) => None,
        None => {
            let dir = tempfile::Builder::new().prefix("snipbox-").tempdir()?;
            debug!(path = %dir.path().display(), "Created temporary work directory");
            request.temp_dir = Some(dir.path().to_path_buf());
            Some(dir)
        }
    };

    info!(language = language.as_str(), "Executing snippet");
    let engine = Engine::new(config);
    let result = engine.run(language, &request).await;

    drop(scratch);
    output_execution_result(result, format)
}

fn build_request(args: &RunArgs) -> Result<ExecutionRequest> {
    let mut request = match (&args.code, &args.file) {
        (Some(code), _) => ExecutionRequest {
            code: code.clone(),
            ..Default::default()
        },
        (None, Some(file)) => ExecutionRequest {
            code: std::fs::read_to_string(file)?,
            ..Default::default()
        },
        (None, None) => ExecutionRequest::from_json(&read_input(args.request.as_deref())?)?,
    };

    for (key, value) in &args.variables {
        request.variables.insert(key.clone(), value.clone());
    }
    if let Some(dir) = &args.temp_dir {
        request.temp_dir = Some(dir.clone());
    }
    if let Some(timeout_ms) = args.timeout_ms {
        request.timeout_ms = Some(timeout_ms);
    }

    Ok(request)
}

/// Read a file, or stdin for `None` and `-`.
fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            Ok(input)
        }
    }
}

fn output_execution_result(result: ExecutionResult, format: OutputFormat) -> Result<()> {
    let failed = !result.is_success();
    let body = result.into_json();

    match format {
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Json => println!("{}", serde_json::to_string(&body)?),
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

// ============================================================================
// Inspection Commands
// ============================================================================

pub async fn analyze(args: AnalyzeArgs, config: SnipboxConfig, format: OutputFormat) -> Result<()> {
    let code = read_input(args.file.as_deref())?;
    let analyzer = analyzer_for(args.language, &config);
    let analysis = analyzer.analyze(&code);
    let verdict = analysis.verdict.clone().into_result();

    match format {
        OutputFormat::Text => {
            println!("Language: {}", args.language.as_str());
            if analysis.imports.is_empty() {
                println!("Imports:  (none)");
            } else {
                let imports: Vec<&str> = analysis.imports.iter().map(String::as_str).collect();
                println!("Imports:  {}", imports.join(", "));
            }
            match &verdict {
                Ok(()) => println!("Verdict:  allowed"),
                Err(e) => println!("Verdict:  denied ({})", e),
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "language": args.language,
                    "imports": analysis.imports,
                    "allowed": verdict.is_ok(),
                    "error": verdict.err().map(|e| e.to_string()),
                })
            );
        }
    }

    Ok(())
}

pub async fn backends(args: BackendsArgs, config: SnipboxConfig, format: OutputFormat) -> Result<()> {
    let infos = available_backends(&config);

    let mut healthy = Vec::with_capacity(infos.len());
    for info in &infos {
        let ok = if args.check && info.available {
            let backend = create_backend(info.language, &config)?;
            Some(backend.health_check().await?)
        } else {
            None
        };
        healthy.push(ok);
    }

    match format {
        OutputFormat::Text => {
            println!(
                "{:<12} {:<10} {:<8} DESCRIPTION",
                "BACKEND", "STATUS", "SECCOMP"
            );
            println!("{}", "-".repeat(70));
            for (info, ok) in infos.iter().zip(&healthy) {
                let status = match (info.available, ok) {
                    (false, _) => "missing",
                    (true, Some(false)) => "broken",
                    (true, _) => "ready",
                };
                let seccomp = if info.syscall_filter { "on" } else { "off" };
                println!(
                    "{:<12} {:<10} {:<8} {}",
                    info.name, status, seccomp, info.description
                );
                if let Some(reason) = &info.unavailable_reason {
                    println!("{:<12} {}", "", reason);
                }
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = infos
                .iter()
                .zip(&healthy)
                .map(|(info, ok)| {
                    serde_json::json!({
                        "name": info.name,
                        "available": info.available,
                        "syscall_filter": info.syscall_filter,
                        "description": info.description,
                        "unavailable_reason": info.unavailable_reason,
                        "healthy": ok,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let default_config = SnipboxConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| SnipboxError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a Python snippet with an injected variable");
    println!("  snipbox python --code 'result = x + 1' --var x=5");
    println!();
    println!("  # Run a JSON request from a file");
    println!("  snipbox js --request request.json");
    println!();
    println!("  # Check which backends can run here");
    println!("  snipbox backends --check");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: SnipboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| SnipboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}
