//! # Integration Tests for Liveserver
//!
//! Covers configuration merging, path resolution, version lookup, the HTTP
//! routes, change dispatch, an end-to-end reload over the WebSocket channel,
//! and the exit behavior of the compiled binary.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use clap::Parser;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use futures_util::StreamExt;
use liveserver::config::{AppConfig, CliArgs, FileConfig};
use liveserver::error::{LookupError, ResolutionError, ServerError};
use liveserver::event::{ChangeEvent, ChangeKind};
use liveserver::reload::{ReloadHub, ReloadMessage};
use liveserver::server::{resolve_target, LiveServer, WatchSession};
use liveserver::target::{self, Mode, ServeTarget};
use liveserver::version::{self, FixedVersion, NpmGlobal, PackageLocator, VersionProvider};
use liveserver::watcher::{dispatch_changes, start_watching, WatchState};
use liveserver::web;
use std::fs;
use std::path::{Path, PathBuf};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tower::ServiceExt;

/// Timeout for a single expected event.
const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait to be sure no further event follows.
const QUIET_WINDOW: Duration = Duration::from_millis(800);

const PAGE: &str = "<html><head></head><body><h1>Hello</h1></body></html>";

/// Creates `<dir>/site/index.html` and returns its path.
fn write_site(dir: &Path) -> PathBuf {
    let site = dir.join("site");
    fs::create_dir_all(&site).expect("Failed to create site dir");
    let page = site.join("index.html");
    fs::write(&page, PAGE).expect("Failed to write page");
    page
}

/// Fetches `uri` from `app` and returns status, content type and body.
async fn get(app: axum::Router, uri: &str) -> (StatusCode, String, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("Router failed");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    (status, content_type, String::from_utf8_lossy(&bytes).to_string())
}

/// Log sink shared between a test and its tracing subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A locator pointing at a fixed directory.
struct DirLocator(PathBuf);

#[async_trait]
impl PackageLocator for DirLocator {
    async fn global_root(&self) -> Result<PathBuf, LookupError> {
        Ok(self.0.clone())
    }
}

/// Test: CLI values override file values, which override defaults.
#[test]
fn test_config_precedence() {
    let cli_args = CliArgs::parse_from(["livereload", "./site/index.html", "--port", "4000"]);
    let fig = Figment::new()
        .merge(Serialized::defaults(FileConfig {
            port: Some(3000),
            livereload: Some(35729),
            log_level: Some("info".to_string()),
            package: Some("liveserver-cli".to_string()),
            client_dir: None,
        }))
        .merge(Toml::string("[liveserver]\nport = 5000\nlivereload = 36000\n").nested());

    let config = AppConfig::from_figment(cli_args, fig).expect("Failed to extract config");

    assert_eq!(config.http_port, 4000);
    assert_eq!(config.reload_port, 36000);
    assert_eq!(config.html_file, Some(PathBuf::from("./site/index.html")));
    assert!(!config.tool);
    assert_eq!(config.package, "liveserver-cli");
}

/// Test: Without any sources the documented defaults apply.
#[test]
fn test_config_defaults() {
    let cli_args = CliArgs::parse_from(["livereload", "--tool"]);
    let config = AppConfig::from_figment(cli_args, Figment::new()).expect("Failed to extract");
    assert_eq!(config.http_port, 3000);
    assert_eq!(config.reload_port, 35729);
    assert_eq!(config.log_level, "info");
    assert!(config.tool);
}

/// Test: A port outside u16 is rejected by the argument parser.
#[test]
fn test_config_rejects_bad_port() {
    assert!(CliArgs::try_parse_from(["livereload", "--port", "70000"]).is_err());
}

/// Test: An existing .html file resolves with its parent as watch root.
#[test]
fn test_resolve_file_watches_parent() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = write_site(temp_dir.path());

    let target = target::resolve_file(&page).expect("Resolution failed");
    let canonical = page.canonicalize().unwrap();
    assert_eq!(target.path(), canonical.as_path());
    assert_eq!(target.watch_root(), canonical.parent().unwrap());
    assert_eq!(target.entry_route(), "/live");
}

/// Test: Missing files and wrong extensions are rejected.
#[test]
fn test_resolve_file_errors() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let missing = target::resolve_file(&temp_dir.path().join("nope.html")).unwrap_err();
    assert!(matches!(missing, ResolutionError::NotFound(_)));
    assert!(missing.to_string().contains("does not exist"));

    let text = temp_dir.path().join("notes.txt");
    fs::write(&text, "hi").unwrap();
    let wrong = target::resolve_file(&text).unwrap_err();
    assert!(matches!(wrong, ResolutionError::InvalidExtension(_)));
}

/// Test: Directory targets need an existing directory.
#[test]
fn test_resolve_directory() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let target = target::resolve_directory(temp_dir.path()).expect("Resolution failed");
    match &target {
        ServeTarget::Directory {
            path,
            fallback_file,
        } => {
            assert_eq!(target.watch_root(), path.as_path());
            assert_eq!(fallback_file, &path.join("index.html"));
        }
        other => panic!("Unexpected target {:?}", other),
    }

    let err = target::resolve_directory(&temp_dir.path().join("client")).unwrap_err();
    assert!(matches!(err, ResolutionError::DirectoryMissing(_)));
    assert!(err.to_string().contains("does not exist"));
}

/// Test: Mode selection from the flag and positional argument.
#[test]
fn test_mode_selection() {
    assert!(matches!(
        Mode::from_cli(false, None),
        Err(ResolutionError::MissingArgument)
    ));
    assert_eq!(Mode::from_cli(true, None).unwrap(), Mode::Tool);
    assert_eq!(
        Mode::from_cli(true, Some(PathBuf::from("a.html"))).unwrap(),
        Mode::Tool
    );
    assert_eq!(
        Mode::from_cli(false, Some(PathBuf::from("a.html"))).unwrap(),
        Mode::File(PathBuf::from("a.html"))
    );
}

/// Test: Tool mode uses the configured client folder.
#[tokio::test]
async fn test_resolve_target_tool_mode() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let cli_args = CliArgs::parse_from(["livereload", "--tool"]);
    let mut config = AppConfig::from_figment(cli_args, Figment::new()).unwrap();
    let npm = NpmGlobal::default().with_program("/nonexistent/liveserver-npm");

    config.client_dir = Some(temp_dir.path().join("client"));
    let err = resolve_target(&config, &npm).await.unwrap_err();
    assert!(err.to_string().contains("does not exist"));

    fs::create_dir(temp_dir.path().join("client")).unwrap();
    let target = resolve_target(&config, &npm).await.expect("Resolution failed");
    assert!(matches!(target, ServeTarget::Directory { .. }));

    // Without an override the locator failure is fatal.
    config.client_dir = None;
    let err = resolve_target(&config, &npm).await.unwrap_err();
    assert!(matches!(err, ServerError::Lookup(_)));
    assert!(err.to_string().contains("does not exist"));
}

/// Test: Version lookup reads package.json and degrades to "unknown".
#[tokio::test]
async fn test_version_lookup() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let locator = DirLocator(temp_dir.path().to_path_buf());

    assert_eq!(
        version::lookup_version(&locator, "liveserver-cli").await,
        version::UNKNOWN_VERSION
    );

    let package_dir = temp_dir.path().join("liveserver-cli");
    fs::create_dir(&package_dir).unwrap();
    fs::write(package_dir.join("package.json"), "{ not json").unwrap();
    assert_eq!(
        version::lookup_version(&locator, "liveserver-cli").await,
        "unknown"
    );

    fs::write(package_dir.join("package.json"), r#"{"name":"liveserver-cli"}"#).unwrap();
    assert_eq!(
        version::lookup_version(&locator, "liveserver-cli").await,
        "unknown"
    );

    fs::write(
        package_dir.join("package.json"),
        r#"{"name":"liveserver-cli","version":"1.4.2"}"#,
    )
    .unwrap();
    assert_eq!(
        version::lookup_version(&locator, "liveserver-cli").await,
        "1.4.2"
    );

    let missing_npm = NpmGlobal::default().with_program("/nonexistent/liveserver-npm");
    assert_eq!(missing_npm.version().await, "unknown");
}

/// Test: File mode serves the HTML file at /live with the reload client injected.
#[tokio::test]
async fn test_file_mode_routes() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = write_site(temp_dir.path());
    fs::write(page.with_file_name("style.css"), "h1 { color: red }").unwrap();
    let target = target::resolve_file(&page).unwrap();
    let app = web::router(&target, 35729);

    let (status, content_type, body) = get(app.clone(), "/live").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/html"));
    assert!(body.contains("<h1>Hello</h1>"));
    assert!(body.contains(":35729/livereload.js"));
    assert!(body.find("livereload.js").unwrap() < body.find("</body>").unwrap());

    let (status, _, body) = get(app.clone(), "/style.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "h1 { color: red }");

    let (status, _, _) = get(app.clone(), "/missing/route").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Edits show up without restarting.
    fs::write(&page, "<body>changed</body>").unwrap();
    let (_, _, body) = get(app, "/live").await;
    assert!(body.contains("changed"));
}

/// Test: Directory mode serves assets and falls back to index.html.
#[tokio::test]
async fn test_directory_mode_spa_fallback() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let client = temp_dir.path().join("client");
    fs::create_dir_all(client.join("assets")).unwrap();
    fs::write(client.join("index.html"), PAGE).unwrap();
    fs::write(client.join("assets/app.js"), "console.log('app')").unwrap();
    let target = target::resolve_directory(&client).unwrap();
    let app = web::router(&target, 40000);

    let (status, _, body) = get(app.clone(), "/assets/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "console.log('app')");

    for route in ["/", "/dashboard", "/deep/client/route"] {
        let (status, content_type, body) = get(app.clone(), route).await;
        assert_eq!(status, StatusCode::OK, "route {}", route);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("<h1>Hello</h1>"));
        assert!(body.contains(":40000/livereload.js"));
    }
}

/// Test: Every change event produces exactly one reload, in order.
#[tokio::test]
async fn test_dispatch_one_reload_per_change() {
    let hub = ReloadHub::new();
    let mut client = hub.subscribe();
    let (event_tx, event_rx) = mpsc::channel(10);

    let paths = ["/site/index.html", "/site/index.html", "/site/style.css"];
    for path in paths {
        event_tx
            .send(ChangeEvent::new(path, ChangeKind::Write))
            .await
            .unwrap();
    }
    drop(event_tx);

    assert_eq!(dispatch_changes(event_rx, hub.clone()).await, paths.len());
    for path in paths {
        match client.try_recv() {
            Ok(ReloadMessage::Reload { path: got, .. }) => assert_eq!(got, path),
            other => panic!("Expected reload for {}, got {:?}", path, other),
        }
    }
    assert!(client.try_recv().is_err());
}

/// Test: Watch session lifecycle.
#[tokio::test]
async fn test_watch_session_lifecycle() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = write_site(temp_dir.path());
    let target = target::resolve_file(&page).unwrap();

    let session = WatchSession::start(&target).expect("Watch failed");
    assert_eq!(session.handle().state(), WatchState::Watching);
    assert_eq!(session.handle().root(), target.watch_root());
    assert_eq!(session.hub().watched(), vec![target.watch_root().to_path_buf()]);
    session.close();

    // Root removed between resolution and registration.
    fs::remove_dir_all(target.watch_root()).unwrap();
    assert!(WatchSession::start(&target).is_err());
}

/// Test: Overwriting a non-empty file yields exactly one change event.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_single_write_yields_one_event() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = temp_dir.path().join("index.html");
    fs::write(&page, "<body>original content here</body>").unwrap();

    let (event_tx, mut event_rx) = mpsc::channel(10);
    let mut handle = start_watching(temp_dir.path(), event_tx).expect("Watch failed");

    fs::write(&page, "<body>edited</body>").expect("Failed to edit page");

    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(QUIET_WINDOW, event_rx.recv()).await {
        events.push(event);
    }
    handle.stop();

    assert_eq!(events.len(), 1, "events: {:?}", events);
    assert_eq!(events[0].kind, ChangeKind::Write);
    assert_eq!(events[0].path.file_name(), page.file_name());
}

/// Test: Editing the served file pushes a reload to a connected browser.
#[tokio::test]
async fn test_file_edit_triggers_reload() {
    // The runtime is single-threaded, so the dispatcher logs through this
    // thread's subscriber.
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("liveserver=info"))
        .with_ansi(false)
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .finish();
    let _log_guard = tracing::subscriber::set_default(subscriber);

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = write_site(temp_dir.path());
    let target = target::resolve_file(&page).unwrap();
    let served = target.path().display().to_string();

    let versions: Arc<dyn VersionProvider> = Arc::new(FixedVersion("9.9.9".to_string()));
    let server = LiveServer::start(target, 0, 0, versions)
        .await
        .expect("Server failed to start");
    assert_eq!(server.config().version, "9.9.9");
    assert!(server.http_url().ends_with("/live"));
    let reload_port = server.config().reload_port;
    let hub = server.hub().clone();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async move {
        let _ = stop_rx.await;
    }));

    let ws_url = format!("ws://127.0.0.1:{}/livereload", reload_port);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket connect failed");
    let (ws_write, mut ws_read) = ws_stream.split();

    let hello = timeout(SHORT_TIMEOUT, ws_read.next())
        .await
        .expect("No hello")
        .unwrap()
        .unwrap();
    assert!(hello.to_text().unwrap().contains("\"command\":\"hello\""));

    fs::write(&page, "<body>edited</body>").expect("Failed to edit page");

    let mut reloaded = false;
    while let Ok(Some(Ok(msg))) = timeout(SHORT_TIMEOUT, ws_read.next()).await {
        let text = msg.to_text().unwrap_or_default().to_string();
        if text.contains("\"command\":\"reload\"") && text.contains("index.html") {
            reloaded = true;
            break;
        }
    }
    assert!(reloaded, "Did not receive a reload for the edited file");

    // One save, one reload.
    if cfg!(target_os = "linux") {
        let extra = timeout(QUIET_WINDOW, async {
            while let Some(Ok(msg)) = ws_read.next().await {
                let text = msg.to_text().unwrap_or_default().to_string();
                if text.contains("\"command\":\"reload\"") {
                    return Some(text);
                }
            }
            None
        })
        .await;
        assert!(
            !matches!(extra, Ok(Some(_))),
            "Second reload for a single write: {:?}",
            extra
        );
    }

    let output = logs.contents();
    let logged = output
        .lines()
        .any(|line| line.contains("File changed:") && line.contains(&served));
    assert!(logged, "No change log line for {} in:\n{}", served, output);

    // A disconnected browser stops counting as a client.
    assert_eq!(hub.client_count(), 1);
    drop(ws_write);
    drop(ws_read);
    let released = timeout(SHORT_TIMEOUT, async {
        while hub.client_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "Client still subscribed after disconnect");

    stop_tx.send(()).unwrap();
    let result = timeout(SHORT_TIMEOUT, server_task)
        .await
        .expect("Server did not shut down")
        .expect("Server task panicked");
    assert!(result.is_ok());
}

/// Test: A failed version lookup does not stop the server from starting.
#[tokio::test]
async fn test_unknown_version_still_starts() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = write_site(temp_dir.path());
    let target = target::resolve_file(&page).unwrap();

    let versions: Arc<dyn VersionProvider> =
        Arc::new(NpmGlobal::default().with_program("/nonexistent/liveserver-npm"));
    let server = LiveServer::start(target, 0, 0, versions)
        .await
        .expect("Server failed to start");
    assert_eq!(server.config().version, "unknown");
    assert_ne!(server.config().http_port, 0);
}

/// Test: A port already in use is a fatal bind error.
#[tokio::test]
async fn test_port_in_use_is_fatal() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let page = write_site(temp_dir.path());
    let target = target::resolve_file(&page).unwrap();

    let taken = std::net::TcpListener::bind("0.0.0.0:0").expect("Failed to bind random port");
    let port = taken.local_addr().unwrap().port();

    let versions: Arc<dyn VersionProvider> = Arc::new(FixedVersion("1.0.0".to_string()));
    match LiveServer::start(target, port, 0, versions).await {
        Err(ServerError::Bind { addr, .. }) => assert_eq!(addr.port(), port),
        Err(other) => panic!("Expected bind error, got {}", other),
        Ok(_) => panic!("Expected bind error, server started"),
    }
}

/// Runs the compiled binary in an empty directory with `args`.
fn run_cli(args: &[&str], envs: &[(&str, &str)]) -> std::process::Output {
    let work_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut command = std::process::Command::new(env!("CARGO_BIN_EXE_livereload"));
    command
        .args(args)
        .current_dir(work_dir.path())
        .env_remove("RUST_LOG")
        .env_remove("FORCE_COLOR")
        .env_remove("CLICOLOR_FORCE");
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output().expect("Failed to run livereload binary")
}

/// Test: The binary exits with status 1 on validation failures.
#[test]
fn test_cli_validation_failures() {
    let output = run_cli(&[], &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("either use --tool"));

    let output = run_cli(&["./site/missing.html", "--port", "4000"], &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"));
    // Captured stderr is not a terminal: no color codes.
    assert!(!stderr.contains('\u{1b}'), "stderr: {:?}", stderr);

    let output = run_cli(&["--port", "not-a-port"], &[]);
    assert_eq!(output.status.code(), Some(1));
}

/// Test: `--tool` without a client folder exits 1 before listening.
#[test]
fn test_cli_tool_without_client_folder() {
    let missing = std::env::temp_dir().join("liveserver-missing-client-folder");
    let output = run_cli(
        &["--tool", "--port", "4000"],
        &[("LIVESERVER_CLIENT_DIR", missing.to_str().unwrap())],
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Liveserver v"));
}
