// src/config.rs
use crate::error::ConfigError;
use crate::reload::DEFAULT_RELOAD_PORT;
use crate::version::DEFAULT_PACKAGE;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

const DEFAULT_CONFIG_FILE: &str = "liveserver.toml";
const ENV_PREFIX: &str = "LIVESERVER_";
const PROFILE: &str = "liveserver";

/// Command-line arguments for the application.
#[derive(Parser, Debug, Default)]
#[clap(
    name = "livereload",
    author,
    version,
    about = "Start a live server to serve HTML files",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a specific HTML file
    #[clap(value_name = "html-file", help = "Path to a specific HTML file")]
    pub html_file: Option<PathBuf>,

    /// Serve the client folder of the globally installed package
    #[clap(long, help = "Use the default tool to serve the client folder")]
    pub tool: bool,

    /// HTTP port
    #[clap(
        long,
        value_name = "port",
        value_parser,
        help = "Specify the port to run the server on [default: 3000]"
    )]
    pub port: Option<u16>,

    /// Reload channel port
    #[clap(
        long = "livereload",
        value_name = "lr-port",
        value_parser,
        help = "Specify the LiveReload port [default: 35729]"
    )]
    pub livereload: Option<u16>,

    /// Path to a configuration file (e.g., liveserver.toml)
    #[clap(
        short,
        long,
        value_parser,
        help = "Path to a configuration file (e.g., liveserver.toml)"
    )]
    pub config: Option<PathBuf>,

    /// Log level (e.g., trace, debug, info, warn, error)
    #[clap(
        long,
        value_parser,
        help = "Log level (e.g., trace, debug, info, warn, error)"
    )]
    pub log_level: Option<String>,
}

/// Configuration loaded from file, environment, or defaults.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq)]
pub struct FileConfig {
    /// HTTP port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Reload channel port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub livereload: Option<u16>,
    /// Log level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Name of the global package holding the client folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Explicit client folder for `--tool`, skipping the package lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_dir: Option<PathBuf>,
}

impl FileConfig {
    fn defaults() -> Self {
        FileConfig {
            port: Some(DEFAULT_HTTP_PORT),
            livereload: Some(DEFAULT_RELOAD_PORT),
            log_level: Some("info".to_string()),
            package: Some(DEFAULT_PACKAGE.to_string()),
            client_dir: None,
        }
    }
}

/// Final application configuration after merging all sources.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// `--tool` was given
    pub tool: bool,
    /// Positional HTML file, if any
    pub html_file: Option<PathBuf>,
    pub http_port: u16,
    pub reload_port: u16,
    pub log_level: String,
    pub package: String,
    pub client_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Loads the application configuration from the process arguments, file, and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::try_parse()?;
        Ok(Self::from_cli(cli_args)?)
    }

    /// Merges defaults, the TOML file, `LIVESERVER_*` variables, and then `cli_args`.
    pub fn from_cli(cli_args: CliArgs) -> Result<Self, figment::Error> {
        let config_file_path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let fig = Figment::new()
            .merge(Serialized::defaults(FileConfig::defaults()))
            .merge(Toml::file(config_file_path).nested())
            .merge(Env::prefixed(ENV_PREFIX));

        Self::from_figment(cli_args, fig)
    }

    /// Applies `cli_args` on top of an already assembled figment.
    pub fn from_figment(cli_args: CliArgs, fig: Figment) -> Result<Self, figment::Error> {
        // CLI values win over every other source.
        let overrides = FileConfig {
            port: cli_args.port,
            livereload: cli_args.livereload,
            log_level: cli_args.log_level,
            ..Default::default()
        };
        let merged: FileConfig = fig
            .merge(Serialized::globals(overrides))
            .select(PROFILE)
            .extract()?;

        Ok(AppConfig {
            tool: cli_args.tool,
            html_file: cli_args.html_file,
            http_port: merged.port.unwrap_or(DEFAULT_HTTP_PORT),
            reload_port: merged.livereload.unwrap_or(DEFAULT_RELOAD_PORT),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            package: merged
                .package
                .unwrap_or_else(|| DEFAULT_PACKAGE.to_string()),
            client_dir: merged.client_dir,
        })
    }
}

/// Ports and version fixed once the server starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub http_port: u16,
    pub reload_port: u16,
    /// Installed version, or `"unknown"`.
    pub version: String,
}

impl ServerConfig {
    pub fn new(http_port: u16, reload_port: u16, version: impl Into<String>) -> Self {
        Self {
            http_port,
            reload_port,
            version: version.into(),
        }
    }

    /// HTTP listen address on all interfaces.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.http_port))
    }

    /// Reload channel listen address on all interfaces.
    pub fn reload_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.reload_port))
    }
}
