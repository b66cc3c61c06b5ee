// src/server.rs
//! Server lifecycle.
//!
//! Startup runs as named stages so a failure points at the step that broke:
//! the version lookup runs alongside watch registration, then both listeners
//! bind, the banner prints, and the server listens until the shutdown future
//! resolves.

use crate::config::{AppConfig, ServerConfig};
use crate::error::{ServerError, WatchError};
use crate::event::ChangeEvent;
use crate::reload::{self, ReloadHub};
use crate::target::{self, Mode, ServeTarget};
use crate::version::{NpmGlobal, VersionProvider, UNKNOWN_VERSION};
use crate::watcher::{dispatch_changes, start_watching, WatchHandle};
use crate::web;
use owo_colors::{OwoColorize, Stream, Style};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Startup stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvingVersion,
    StartingWatch,
    BindingServer,
    Listening,
}

fn enter(stage: Stage) {
    debug!(?stage, "Entering stage");
}

/// Builds the [`ServeTarget`] selected by the command line.
///
/// In tool mode the client folder comes from the configuration when set,
/// otherwise from the global package directory. Failing to locate it is fatal.
pub async fn resolve_target(
    app_config: &AppConfig,
    npm: &NpmGlobal,
) -> Result<ServeTarget, ServerError> {
    match Mode::from_cli(app_config.tool, app_config.html_file.clone())? {
        Mode::File(file) => Ok(target::resolve_file(&file)?),
        Mode::Tool => {
            let dir = match &app_config.client_dir {
                Some(dir) => dir.clone(),
                None => npm.client_dir().await?,
            };
            Ok(target::resolve_directory(&dir)?)
        }
    }
}

/// The filesystem watch plus the reload hub it feeds.
pub struct WatchSession {
    handle: WatchHandle,
    hub: ReloadHub,
    dispatcher: JoinHandle<usize>,
}

impl WatchSession {
    /// Watches the target's watch root and forwards each change to a fresh hub.
    pub fn start(target: &ServeTarget) -> Result<Self, WatchError> {
        Self::with_hub(target, ReloadHub::new())
    }

    pub fn with_hub(target: &ServeTarget, hub: ReloadHub) -> Result<Self, WatchError> {
        let (event_tx, event_rx) = mpsc::channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);
        let handle = start_watching(target.watch_root(), event_tx)?;
        hub.watch(target.watch_root());
        let dispatcher = tokio::spawn(dispatch_changes(event_rx, hub.clone()));
        Ok(Self {
            handle,
            hub,
            dispatcher,
        })
    }

    pub fn hub(&self) -> &ReloadHub {
        &self.hub
    }

    pub fn handle(&self) -> &WatchHandle {
        &self.handle
    }

    /// Stops the watch and the dispatcher.
    pub fn close(mut self) {
        self.handle.stop();
        self.dispatcher.abort();
    }
}

/// A started server: watch registered, both listeners bound.
pub struct LiveServer {
    config: ServerConfig,
    target: ServeTarget,
    session: WatchSession,
    http_listener: TcpListener,
    reload_listener: TcpListener,
}

impl LiveServer {
    /// Runs every startup stage up to, but not including, [`Stage::Listening`].
    ///
    /// # Errors
    ///
    /// Watch registration and bind failures are returned as-is; there is no
    /// retry on another port.
    pub async fn start(
        target: ServeTarget,
        http_port: u16,
        reload_port: u16,
        versions: Arc<dyn VersionProvider>,
    ) -> Result<Self, ServerError> {
        enter(Stage::ResolvingVersion);
        let version_task = tokio::spawn(async move { versions.version().await });

        enter(Stage::StartingWatch);
        let session = WatchSession::start(&target)?;

        let version = version_task.await.unwrap_or_else(|e| {
            warn!("Version lookup task failed: {}", e);
            UNKNOWN_VERSION.to_string()
        });

        enter(Stage::BindingServer);
        let wanted = ServerConfig::new(http_port, reload_port, version);
        let http_listener = bind(wanted.http_addr()).await?;
        let reload_listener = bind(wanted.reload_addr()).await?;

        // Port 0 binds an ephemeral port; record what was actually bound.
        let config = ServerConfig::new(
            local_port(&http_listener, http_port),
            local_port(&reload_listener, reload_port),
            wanted.version,
        );

        Ok(Self {
            config,
            target,
            session,
            http_listener,
            reload_listener,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn target(&self) -> &ServeTarget {
        &self.target
    }

    pub fn hub(&self) -> &ReloadHub {
        self.session.hub()
    }

    /// URL a browser should open.
    pub fn http_url(&self) -> String {
        format!(
            "http://localhost:{}{}",
            self.config.http_port,
            self.target.entry_route()
        )
    }

    /// Base URL of the reload channel.
    pub fn reload_url(&self) -> String {
        format!("http://localhost:{}", self.config.reload_port)
    }

    fn print_banner(&self) {
        let label = match self.target {
            ServeTarget::File { .. } => "Local Html:",
            ServeTarget::Directory { .. } => "Local Tool:",
        };
        let link = Style::new().yellow().underline();
        let title = format!("Liveserver v{}", self.config.version);
        println!(
            "\n{}\n",
            title.if_supports_color(Stream::Stdout, |t| t.blue())
        );
        println!(
            "   {} {}",
            label.if_supports_color(Stream::Stdout, |t| t.green()),
            self.http_url()
                .if_supports_color(Stream::Stdout, |t| link.style(t))
        );
        println!(
            "   {} {}",
            "LiveReload:".if_supports_color(Stream::Stdout, |t| t.green()),
            self.reload_url()
                .if_supports_color(Stream::Stdout, |t| link.style(t))
        );
    }

    /// Prints the banner and serves until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.print_banner();
        enter(Stage::Listening);
        info!(
            "Serving {} on {}, reload channel on {}",
            self.target.path().display(),
            self.config.http_addr(),
            self.config.reload_addr()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = web::router(&self.target, self.config.reload_port);
        let reload_app = reload::router(self.session.hub().clone());

        let http = axum::serve(self.http_listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone(), "HTTP server"));
        let reload = axum::serve(self.reload_listener, reload_app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx, "Reload server"));
        let trigger = async move {
            shutdown.await;
            info!("Shutdown requested, stopping servers...");
            if shutdown_tx.send(true).is_err() {
                debug!("Servers already stopped");
            }
            Ok::<(), std::io::Error>(())
        };

        let result = tokio::try_join!(http.into_future(), reload.into_future(), trigger);
        self.session.close();
        result.map(|_| ()).map_err(ServerError::Serve)
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

fn local_port(listener: &TcpListener, requested: u16) -> u16 {
    listener
        .local_addr()
        .map(|a| a.port())
        .unwrap_or(requested)
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>, name: &'static str) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    info!("{} shutting down gracefully.", name);
}
