//! Package manager traits

use async_trait::async_trait;

use crate::error::PackageError;
use crate::types::{
    InstalledPackage, PackageManagerType, RebootAdvice, RepoSelection, UpdateResult,
    UpgradablePackage,
};

/// Package operations used by a patch session
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Snapshot of every installed package
    async fn list_installed(&self) -> Result<Vec<InstalledPackage>, PackageError>;

    /// Packages with an update available from the selected repositories
    async fn list_upgradable(
        &self,
        repos: &RepoSelection,
    ) -> Result<Vec<UpgradablePackage>, PackageError>;

    /// Drop cached repository metadata
    async fn clean_cache(&self) -> Result<(), PackageError>;

    /// Upgrade everything from the selected repositories
    ///
    /// Must report `changed = false` rather than failing when nothing is pending.
    async fn upgrade_all(&self, repos: &RepoSelection) -> Result<UpdateResult, PackageError>;

    /// Ask the host whether a reboot is outstanding
    async fn reboot_required(&self) -> Result<RebootAdvice, PackageError>;

    fn manager_type(&self) -> PackageManagerType;
}
