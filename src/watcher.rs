// src/watcher.rs
use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeKind};
use crate::reload::ReloadHub;
#[cfg(target_os = "linux")]
use notify::event::{AccessKind, AccessMode};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`WatchHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Created, nothing registered yet.
    Idle,
    /// The filesystem watch is registered and events flow.
    Watching,
    /// Closed; no further events are produced.
    Stopped,
}

/// Owns the filesystem watch on a single root directory.
///
/// Dropping the handle also closes the underlying watch.
pub struct WatchHandle {
    root: PathBuf,
    state: WatchState,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("root", &self.root)
            .field("state", &self.state)
            .finish()
    }
}

impl WatchHandle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: WatchState::Idle,
            watcher: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Registers a recursive watch on the root and forwards every change to `event_tx`.
    ///
    /// A missing root is fatal; there is no retry because waiting does not make
    /// the path reappear.
    ///
    /// # Errors
    ///
    /// [`WatchError::RootMissing`] if the root does not exist, or
    /// [`WatchError::Register`] if the platform watcher refuses it.
    pub fn start(&mut self, event_tx: Sender<ChangeEvent>) -> Result<(), WatchError> {
        if self.state != WatchState::Idle {
            debug!(
                "Watch on {} already {:?}, not starting again",
                self.root.display(),
                self.state
            );
            return Ok(());
        }
        if !self.root.exists() {
            return Err(WatchError::RootMissing(self.root.clone()));
        }

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => forward_event(&event, &event_tx),
                Err(e) => error!("[Watcher] Filesystem watcher reported error: {}", e),
            })
            .map_err(|source| WatchError::Register {
                path: self.root.clone(),
                source,
            })?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Register {
                path: self.root.clone(),
                source,
            })?;

        info!("[Watcher] Watching {}", self.root.display());
        self.watcher = Some(watcher);
        self.state = WatchState::Watching;
        Ok(())
    }

    /// Closes the watch. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                debug!("[Watcher] Unwatch of {} failed: {}", self.root.display(), e);
            }
            info!("[Watcher] Stopped watching {}", self.root.display());
        }
        self.state = WatchState::Stopped;
    }
}

/// Creates a handle for `root` and starts it.
pub fn start_watching(
    root: &Path,
    event_tx: Sender<ChangeEvent>,
) -> Result<WatchHandle, WatchError> {
    let mut handle = WatchHandle::new(root);
    handle.start(event_tx)?;
    Ok(handle)
}

/// Maps a raw notify event to a [`ChangeEvent`].
///
/// Access and metadata-only notifications yield `None`. Renames carrying both
/// ends report the destination.
///
/// On Linux a single save raises one data-modify event per syscall (the
/// truncate and each write), so a write is reported once, when the writer
/// closes the file. Other backends report writes through data-modify events.
pub fn classify(event: &notify::Event) -> Option<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Remove,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Rename,
        EventKind::Modify(ModifyKind::Metadata(_)) => return None,
        #[cfg(target_os = "linux")]
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => ChangeKind::Write,
        #[cfg(target_os = "linux")]
        EventKind::Modify(ModifyKind::Data(_)) => return None,
        EventKind::Modify(_) => ChangeKind::Write,
        EventKind::Remove(_) => ChangeKind::Remove,
        _ => return None,
    };

    let path = match kind {
        ChangeKind::Rename => event.paths.last(),
        _ => event.paths.first(),
    }?;

    Some(ChangeEvent::new(path.clone(), kind))
}

fn forward_event(event: &notify::Event, event_tx: &Sender<ChangeEvent>) {
    let Some(change) = classify(event) else {
        debug!("[Watcher] Ignored event kind {:?} for {:?}", event.kind, event.paths);
        return;
    };
    debug!("[Watcher] Produced event: {:?}", change);

    // Runs on the notify thread, outside the async runtime.
    if let Err(e) = event_tx.blocking_send(change) {
        error!("[Watcher] Failed to send event to dispatcher: {}", e);
    }
}

/// Turns each change event into exactly one reload notification.
///
/// Events are handled in arrival order with no coalescing. Returns the number
/// of events dispatched once the channel closes.
pub async fn dispatch_changes(mut event_rx: Receiver<ChangeEvent>, hub: ReloadHub) -> usize {
    let mut dispatched = 0;
    while let Some(event) = event_rx.recv().await {
        info!("File changed: {} ({})", event.path.display(), event.kind);
        let clients = hub.refresh(&event.path);
        if clients == 0 {
            debug!("No reload clients connected for {}", event.path.display());
        }
        dispatched += 1;
    }
    warn!("Change event channel closed after {} events", dispatched);
    dispatched
}
