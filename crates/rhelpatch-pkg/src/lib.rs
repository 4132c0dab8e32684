//! rhelpatch-pkg: Package manager abstraction
//!
//! `PackageManager` covers what a patch session needs from the host's package
//! tooling; `DnfManager` implements it for dnf, falling back to yum on older
//! RHEL releases.

pub mod dnf;
pub mod error;
pub mod traits;
pub mod types;

pub use dnf::DnfManager;
pub use error::PackageError;
pub use traits::PackageManager;
pub use types::{
    InstalledPackage, PackageManagerType, RebootAdvice, RepoSelection, UpdateResult,
    UpgradablePackage,
};
