//! Dependency auto-resolution for Python snippets.
//!
//! Imports found by the analyzer are mapped to installable package names,
//! probed in the target interpreter and installed when missing. Installs are
//! recorded in a process-wide [`InstalledPackageCache`].

pub mod cache;
pub mod installer;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analyzer::{root_module, ImportSet};
use crate::config::PythonConfig;
use crate::error::{Result, SnipboxError};

pub use cache::InstalledPackageCache;
pub use installer::{PackageInstaller, PipInstaller};

/// Modules shipped with the interpreter; never probed or installed.
pub const PREINSTALLED: &[&str] = &[
    "os",
    "sys",
    "json",
    "ast",
    "base64",
    "tempfile",
    "shutil",
    "urllib",
    "datetime",
    "math",
    "random",
    "collections",
    "itertools",
    "functools",
    "operator",
    "re",
    "string",
    "time",
    "calendar",
    "hashlib",
    "uuid",
    "importlib",
    "subprocess",
    "platform",
    "errno",
    "inspect",
    "io",
    "warnings",
    "typing",
    "dataclasses",
    "decimal",
    "fractions",
    "statistics",
    "textwrap",
    "copy",
    "enum",
    "abc",
    "contextlib",
    "heapq",
    "bisect",
    "array",
    "struct",
    "unicodedata",
    "pprint",
    "csv",
    "logging",
    "traceback",
];

/// Import names whose distribution is published under another name.
const DEFAULT_PACKAGE_MAP: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("cv2", "opencv-python"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("yaml", "pyyaml"),
    ("dateutil", "python-dateutil"),
    ("docx", "python-docx"),
    ("pptx", "python-pptx"),
    ("Crypto", "pycryptodome"),
    ("IPython", "ipython"),
    ("skimage", "scikit-image"),
    ("plotly.express", "plotly"),
    ("plotly.graph_objects", "plotly"),
    ("matplotlib.pyplot", "matplotlib"),
    ("mpl_toolkits", "matplotlib"),
];

/// Import identifier to installable package name.
#[derive(Debug, Clone)]
pub struct PackageMapping {
    entries: HashMap<String, String>,
}

impl PackageMapping {
    /// Built-in mappings extended (and overridden) by `extra`.
    pub fn new(extra: &BTreeMap<String, String>) -> Self {
        let mut entries: HashMap<String, String> = DEFAULT_PACKAGE_MAP
            .iter()
            .map(|(import, package)| (import.to_string(), package.to_string()))
            .collect();
        entries.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { entries }
    }

    /// Full dotted name first, then the root module, else the root itself.
    pub fn package_for(&self, import: &str) -> String {
        let root = root_module(import);
        self.entries
            .get(import)
            .or_else(|| self.entries.get(root))
            .cloned()
            .unwrap_or_else(|| root.to_string())
    }
}

impl Default for PackageMapping {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

/// Whether `import` belongs to the interpreter's own library set.
pub fn is_preinstalled(import: &str) -> bool {
    PREINSTALLED.contains(&root_module(import))
}

/// Makes every third-party import of a snippet importable, or reports
/// which packages could not be installed.
pub struct DependencyResolver {
    mapping: PackageMapping,
    installer: Arc<dyn PackageInstaller>,
    cache: Arc<InstalledPackageCache>,
}

impl DependencyResolver {
    pub fn new(
        mapping: PackageMapping,
        installer: Arc<dyn PackageInstaller>,
        cache: Arc<InstalledPackageCache>,
    ) -> Self {
        Self {
            mapping,
            installer,
            cache,
        }
    }

    /// Resolver backed by pip and the process-wide cache.
    pub fn from_config(config: &PythonConfig) -> Self {
        Self::new(
            PackageMapping::new(&config.package_map),
            Arc::new(PipInstaller::from_config(config)),
            InstalledPackageCache::global(),
        )
    }

    pub async fn resolve(&self, imports: &ImportSet) -> Result<()> {
        // root module -> package, preinstalled and already installed skipped
        let mut wanted: BTreeMap<String, String> = BTreeMap::new();
        for import in imports {
            if import.starts_with('.') || is_preinstalled(import) {
                continue;
            }
            let package = self.mapping.package_for(import);
            if self.cache.contains(&package) {
                continue;
            }
            wanted
                .entry(root_module(import).to_string())
                .or_insert(package);
        }

        if wanted.is_empty() {
            debug!("No third-party imports to resolve");
            return Ok(());
        }

        let roots: Vec<String> = wanted.keys().cloned().collect();
        let missing = self.installer.missing_modules(&roots).await?;

        if missing.is_empty() {
            debug!(modules = ?roots, "All imports already available");
            return Ok(());
        }

        info!(missing = ?missing, "Installing missing packages");

        let mut failed: Vec<String> = Vec::new();
        for module in &missing {
            let package = wanted
                .get(module)
                .cloned()
                .unwrap_or_else(|| self.mapping.package_for(module));
            if failed.contains(&package) {
                continue;
            }
            if let Err(e) = self
                .cache
                .ensure_installed(&package, self.installer.as_ref())
                .await
            {
                warn!(package = %package, error = %e, "Package installation failed");
                failed.push(package);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(SnipboxError::DependencyResolution { packages: failed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Reports every module as missing unless listed, installs unless listed.
    #[derive(Default)]
    struct FakeInstaller {
        present: Vec<String>,
        broken: Vec<String>,
        probed: Mutex<Vec<String>>,
        installed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PackageInstaller for FakeInstaller {
        async fn missing_modules(&self, modules: &[String]) -> Result<Vec<String>> {
            self.probed.lock().unwrap().extend(modules.iter().cloned());
            Ok(modules
                .iter()
                .filter(|m| !self.present.contains(m))
                .cloned()
                .collect())
        }

        async fn install(&self, package: &str) -> Result<()> {
            if self.broken.iter().any(|b| b == package) {
                return Err(SnipboxError::InstallFailed {
                    package: package.to_string(),
                    reason: "no matching distribution".to_string(),
                });
            }
            self.installed.lock().unwrap().push(package.to_string());
            Ok(())
        }
    }

    fn imports(names: &[&str]) -> ImportSet {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn resolver(installer: Arc<FakeInstaller>) -> DependencyResolver {
        DependencyResolver::new(
            PackageMapping::default(),
            installer,
            Arc::new(InstalledPackageCache::new()),
        )
    }

    #[test]
    fn test_package_mapping_lookup_order() {
        let mut extra = BTreeMap::new();
        extra.insert("yaml".to_string(), "ruamel.yaml".to_string());
        let mapping = PackageMapping::new(&extra);

        assert_eq!(mapping.package_for("PIL.Image"), "pillow");
        assert_eq!(mapping.package_for("plotly.express"), "plotly");
        assert_eq!(mapping.package_for("numpy.linalg"), "numpy");
        assert_eq!(mapping.package_for("yaml"), "ruamel.yaml");
    }

    #[test]
    fn test_preinstalled() {
        assert!(is_preinstalled("json"));
        assert!(is_preinstalled("os.path"));
        assert!(!is_preinstalled("numpy"));
    }

    #[tokio::test]
    async fn test_stdlib_only_skips_probe() {
        let installer = Arc::new(FakeInstaller::default());
        resolver(installer.clone())
            .resolve(&imports(&["json", "math", "collections.abc"]))
            .await
            .unwrap();
        assert!(installer.probed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_installs_only_missing_mapped_packages() {
        let installer = Arc::new(FakeInstaller {
            present: vec!["numpy".to_string()],
            ..Default::default()
        });
        resolver(installer.clone())
            .resolve(&imports(&["numpy", "sklearn.svm", "PIL.Image", "json"]))
            .await
            .unwrap();

        let mut installed = installer.installed.lock().unwrap().clone();
        installed.sort();
        assert_eq!(installed, vec!["pillow", "scikit-learn"]);
    }

    #[tokio::test]
    async fn test_failures_are_aggregated() {
        let installer = Arc::new(FakeInstaller {
            broken: vec!["foo".to_string(), "bar".to_string()],
            ..Default::default()
        });
        let err = resolver(installer)
            .resolve(&imports(&["foo", "bar", "requests"]))
            .await
            .unwrap_err();

        match err {
            SnipboxError::DependencyResolution { packages } => {
                assert_eq!(packages, vec!["bar", "foo"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cached_packages_are_not_probed_again() {
        let installer = Arc::new(FakeInstaller::default());
        let resolver = resolver(installer.clone());

        resolver.resolve(&imports(&["requests"])).await.unwrap();
        resolver.resolve(&imports(&["requests"])).await.unwrap();

        assert_eq!(installer.probed.lock().unwrap().len(), 1);
        assert_eq!(installer.installed.lock().unwrap().len(), 1);
    }
}
