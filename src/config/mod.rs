pub mod loader;
pub mod types;

pub use loader::{get_cache_dir, get_config_path, load_config};
pub use types::{JavaScriptConfig, Language, PythonConfig, SandboxConfig, SnipboxConfig};
