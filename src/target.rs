// src/target.rs
//! Path resolution: turns command-line input into what gets served and watched.

use crate::error::ResolutionError;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the file served for unmatched routes in directory mode.
pub const FALLBACK_FILE: &str = "index.html";

/// Which serving mode the command line selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Serve the globally installed client folder.
    Tool,
    /// Serve a single HTML file.
    File(PathBuf),
}

impl Mode {
    /// Picks the mode from the `--tool` flag and the positional HTML file.
    ///
    /// `--tool` wins when both are given; the ignored file is logged.
    pub fn from_cli(tool: bool, html_file: Option<PathBuf>) -> Result<Self, ResolutionError> {
        match (tool, html_file) {
            (true, Some(ignored)) => {
                warn!(
                    "--tool takes precedence, ignoring HTML file {}",
                    ignored.display()
                );
                Ok(Mode::Tool)
            }
            (true, None) => Ok(Mode::Tool),
            (false, Some(file)) => Ok(Mode::File(file)),
            (false, None) => Err(ResolutionError::MissingArgument),
        }
    }
}

/// What the server exposes, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeTarget {
    /// A single HTML file; its parent directory is watched so sibling assets reload too.
    File { path: PathBuf, watch_root: PathBuf },
    /// A directory of static assets with an `index.html` fallback.
    Directory { path: PathBuf, fallback_file: PathBuf },
}

impl ServeTarget {
    /// The directory subscribed to filesystem notifications.
    pub fn watch_root(&self) -> &Path {
        match self {
            ServeTarget::File { watch_root, .. } => watch_root,
            ServeTarget::Directory { path, .. } => path,
        }
    }

    /// The path given to the server, file or directory.
    pub fn path(&self) -> &Path {
        match self {
            ServeTarget::File { path, .. } | ServeTarget::Directory { path, .. } => path,
        }
    }

    /// The route a browser should open.
    pub fn entry_route(&self) -> &'static str {
        match self {
            ServeTarget::File { .. } => "/live",
            ServeTarget::Directory { .. } => "/",
        }
    }
}

/// Resolves a single HTML file target.
///
/// The path is made absolute against the current directory. It must exist and
/// carry a `.html` extension.
pub fn resolve_file(html_file: &Path) -> Result<ServeTarget, ResolutionError> {
    let absolute = absolutize(html_file);
    if !absolute.exists() {
        return Err(ResolutionError::NotFound(html_file.to_path_buf()));
    }
    if absolute.extension().and_then(|e| e.to_str()) != Some("html") || !absolute.is_file() {
        return Err(ResolutionError::InvalidExtension(html_file.to_path_buf()));
    }

    let path = absolute.canonicalize().unwrap_or(absolute);
    let watch_root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    Ok(ServeTarget::File { path, watch_root })
}

/// Resolves a directory target, such as the `--tool` client folder.
pub fn resolve_directory(dir: &Path) -> Result<ServeTarget, ResolutionError> {
    if !dir.is_dir() {
        return Err(ResolutionError::DirectoryMissing(dir.to_path_buf()));
    }
    let path = dir.canonicalize().unwrap_or_else(|_| absolutize(dir));
    let fallback_file = path.join(FALLBACK_FILE);
    Ok(ServeTarget::Directory {
        path,
        fallback_file,
    })
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
