// src/lib.rs

#![doc = r#"
# Liveserver

Liveserver serves a single HTML file or a prebuilt client folder over HTTP,
watches the files behind it, and tells connected browsers to reload when
they change.

## Modules

- [`config`]: Configuration loading and merging from CLI, file, and environment.
- [`error`]: Error types for resolution, lookup, watching and serving.
- [`event`]: Change events produced by the watcher.
- [`target`]: Resolves what to serve and which directory to watch.
- [`version`]: Version lookup and global package location.
- [`watcher`]: File system watcher and change dispatch.
- [`reload`]: Reload-notification channel and browser client.
- [`web`]: HTTP routes and reload client injection.
- [`server`]: Startup stages, watch session and server lifecycle.
"#]

pub mod config;
pub mod error;
pub mod event;
pub mod reload;
pub mod server;
pub mod target;
pub mod version;
pub mod watcher;
pub mod web;
