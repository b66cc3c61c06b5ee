// src/event.rs
use std::fmt;
use std::path::PathBuf;

/// The kind of filesystem mutation behind a [`ChangeEvent`].
///
/// All kinds trigger the same reload; the kind only shows up in the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Write,
    Remove,
    Rename,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Write => "WRITE",
            ChangeKind::Remove => "REMOVE",
            ChangeKind::Rename => "RENAME",
        };
        f.write_str(s)
    }
}

/// A single change detected under the watch root.
///
/// # Fields
/// - `path`: The file or directory affected by the change.
/// - `kind`: The operation performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}
