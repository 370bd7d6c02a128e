use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;
use crate::resolver::installer::PackageInstaller;

/// Process-wide record of packages installed during this process lifetime.
///
/// Every package gets its own once-cell: concurrent callers for the same
/// package wait on a single install, and a failed install leaves the cell
/// empty so the next caller tries again.
#[derive(Default)]
pub struct InstalledPackageCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl InstalledPackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every engine in this process.
    pub fn global() -> Arc<InstalledPackageCache> {
        static GLOBAL: OnceLock<Arc<InstalledPackageCache>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(InstalledPackageCache::new()))
            .clone()
    }

    fn cell(&self, package: &str) -> Arc<OnceCell<()>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.entry(package.to_string()).or_default().clone()
    }

    /// Whether `package` was installed (or verified) by this process.
    pub fn contains(&self, package: &str) -> bool {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.get(package).is_some_and(|cell| cell.initialized())
    }

    /// Install `package` unless this process already did.
    pub async fn ensure_installed(
        &self,
        package: &str,
        installer: &dyn PackageInstaller,
    ) -> Result<()> {
        let cell = self.cell(package);

        if cell.initialized() {
            debug!(package = %package, "Package already installed in this process");
            return Ok(());
        }

        cell.get_or_try_init(|| installer.install(package))
            .await
            .map(|_| ())
    }

    /// Names of every package recorded so far.
    pub fn installed(&self) -> Vec<String> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = cells
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
