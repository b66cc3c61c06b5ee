// src/error.rs
//! Error types shared across the resolver, watcher, version lookup and server.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to assemble the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Bad or missing command-line arguments, including `--help` and `--version`.
    #[error(transparent)]
    Args(#[from] clap::Error),

    /// A configuration file or environment value could not be used.
    #[error("Error loading configuration: {0}")]
    Figment(#[from] figment::Error),
}

/// Failure to turn command-line input into a [`ServeTarget`](crate::target::ServeTarget).
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The HTML file given on the command line does not exist.
    #[error("The HTML file \"{}\" does not exist.", .0.display())]
    NotFound(PathBuf),

    /// The file exists but is not an `.html` file.
    #[error("The file \"{}\" is not a valid HTML file (expected a .html extension).", .0.display())]
    InvalidExtension(PathBuf),

    /// The client folder used by `--tool` does not exist.
    #[error("The 'client' folder \"{}\" does not exist in the global directory.", .0.display())]
    DirectoryMissing(PathBuf),

    /// Neither `--tool` nor an HTML file was given.
    #[error("You need to either use --tool or specify an HTML file.")]
    MissingArgument,
}

/// Failure of the global package lookup (`npm root -g` and `package.json`).
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{0}` printed no directory")]
    EmptyOutput(String),

    #[error("failed to read {}: {source}", .path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} has no version field", .0.display())]
    MissingVersion(PathBuf),
}

/// Failure to register the filesystem watch.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Cannot watch \"{}\": path does not exist.", .0.display())]
    RootMissing(PathBuf),

    #[error("Failed to watch \"{}\": {source}", .path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Any failure that stops the server pipeline.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("The 'client' folder does not exist in the global directory: {0}")]
    Lookup(#[from] LookupError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
