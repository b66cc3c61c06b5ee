// src/version.rs
//! Version lookup and global package-directory location.
//!
//! Both go through the package manager (`npm root -g`). The version is
//! cosmetic, so every failure degrades to [`UNKNOWN_VERSION`]. Locating the
//! client folder for `--tool` uses the same locator but its failure is fatal
//! to the caller.

use crate::error::LookupError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Placeholder shown when the version cannot be determined.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Name of the globally installed package that ships the client folder.
pub const DEFAULT_PACKAGE: &str = "liveserver-cli";

/// Folder inside the package served by `--tool`.
pub const CLIENT_DIR: &str = "client";

const MANIFEST_FILE: &str = "package.json";

/// Locates the directory global packages are installed into.
#[async_trait]
pub trait PackageLocator: Send + Sync {
    async fn global_root(&self) -> Result<PathBuf, LookupError>;
}

/// Supplies the version string printed in the startup banner.
#[async_trait]
pub trait VersionProvider: Send + Sync {
    /// Never fails; returns [`UNKNOWN_VERSION`] when the version is unavailable.
    async fn version(&self) -> String;
}

/// A provider returning a fixed string.
#[derive(Debug, Clone)]
pub struct FixedVersion(pub String);

#[async_trait]
impl VersionProvider for FixedVersion {
    async fn version(&self) -> String {
        self.0.clone()
    }
}

/// Looks up the global package through `npm`.
#[derive(Debug, Clone)]
pub struct NpmGlobal {
    program: String,
    package: String,
}

impl Default for NpmGlobal {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGE)
    }
}

impl NpmGlobal {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            program: "npm".to_string(),
            package: package.into(),
        }
    }

    /// Uses a different executable in place of `npm`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command_line(&self) -> String {
        format!("{} root -g", self.program)
    }

    /// Directory of the installed package, e.g. `<npm root>/liveserver-cli`.
    pub async fn package_dir(&self) -> Result<PathBuf, LookupError> {
        Ok(self.global_root().await?.join(&self.package))
    }

    /// The `client` folder inside the installed package. Not checked for existence.
    pub async fn client_dir(&self) -> Result<PathBuf, LookupError> {
        Ok(self.package_dir().await?.join(CLIENT_DIR))
    }
}

#[async_trait]
impl PackageLocator for NpmGlobal {
    async fn global_root(&self) -> Result<PathBuf, LookupError> {
        let command = self.command_line();
        debug!("Running `{}`", command);

        let output = Command::new(&self.program)
            .args(["root", "-g"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| LookupError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(LookupError::CommandFailed {
                command,
                status: output.status,
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!("`{}` wrote to stderr: {}", command, stderr);
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return Err(LookupError::EmptyOutput(command));
        }
        Ok(PathBuf::from(root))
    }
}

#[async_trait]
impl VersionProvider for NpmGlobal {
    async fn version(&self) -> String {
        lookup_version(self, &self.package).await
    }
}

#[derive(Deserialize)]
struct PackageManifest {
    version: Option<String>,
}

/// Reads the `version` field of `<package_dir>/package.json`.
pub async fn read_manifest_version(package_dir: &Path) -> Result<String, LookupError> {
    let path = package_dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| LookupError::ManifestRead {
            path: path.clone(),
            source,
        })?;
    let manifest: PackageManifest =
        serde_json::from_str(&raw).map_err(|source| LookupError::ManifestParse {
            path: path.clone(),
            source,
        })?;

    match manifest.version {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LookupError::MissingVersion(path)),
    }
}

/// Resolves the installed version of `package`, or [`UNKNOWN_VERSION`].
pub async fn lookup_version(locator: &dyn PackageLocator, package: &str) -> String {
    let result = match locator.global_root().await {
        Ok(root) => read_manifest_version(&root.join(package)).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(version) => version,
        Err(e) => {
            warn!("Could not determine version of {}: {}", package, e);
            UNKNOWN_VERSION.to_string()
        }
    }
}
