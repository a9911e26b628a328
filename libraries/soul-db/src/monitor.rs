//! Directory monitor
//!
//! Watches library directories and turns debounced filesystem changes into
//! [`Event::FileChanged`] events on the database's event queue, where they
//! are applied like any other I/O outcome.
//!
//! # Platform Support
//!
//! - Windows: `ReadDirectoryChangesW`
//! - macOS: `FSEvents`
//! - Linux: `inotify`

use crate::config::WatcherSettings;
use crate::coordinator::Event;
use crate::error::Result;
use crossbeam_channel::Sender;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use soul_core::SoulError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Filesystem change that has been debounced and is ready for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// A file was created or moved into a watched directory
    Created(PathBuf),
    /// A file was modified
    Modified(PathBuf),
    /// A file was deleted or moved out of a watched directory
    Removed(PathBuf),
    /// A file was renamed (old path, new path)
    Renamed(PathBuf, PathBuf),
}

/// Watches directories and feeds the event queue
pub struct DirectoryMonitor {
    debounce: Duration,
    extensions: Arc<Vec<String>>,
    events: Sender<Event>,
    // The debouncer owns the watcher, so it has to stay alive
    watchers: HashMap<PathBuf, Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl DirectoryMonitor {
    pub fn new(settings: &WatcherSettings, events: Sender<Event>) -> Self {
        Self {
            debounce: Duration::from_millis(settings.debounce_ms),
            extensions: Arc::new(
                settings
                    .extensions
                    .iter()
                    .map(|e| e.to_lowercase())
                    .collect(),
            ),
            events,
            watchers: HashMap::new(),
        }
    }

    /// Start watching `path` recursively
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(SoulError::access(path.display().to_string(), "not a directory").into());
        }
        if self.watchers.contains_key(path) {
            debug!("Already watching {:?}", path);
            return Ok(());
        }

        let events = self.events.clone();
        let extensions = Arc::clone(&self.extensions);
        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(debounced) => {
                    for event in debounced {
                        let Some(change) = convert_event(&event.event) else {
                            continue;
                        };
                        if is_relevant(&change, &extensions) {
                            let _ = events.send(Event::FileChanged(change));
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        error!("Watcher error: {:?}", error);
                    }
                }
            }
        })
        .map_err(|e| SoulError::access(path.display().to_string(), e))?;

        debouncer
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| SoulError::access(path.display().to_string(), e))?;

        self.watchers.insert(path.to_path_buf(), debouncer);
        info!("Started watching: {:?}", path);
        Ok(())
    }

    /// Stop watching `path`; false if it was not watched
    pub fn unwatch(&mut self, path: &Path) -> bool {
        let removed = self.watchers.remove(path).is_some();
        if removed {
            info!("Stopped watching: {:?}", path);
        }
        removed
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watchers.contains_key(path)
    }

    pub fn watch_count(&self) -> usize {
        self.watchers.len()
    }
}

/// Convert a notify event to a `WatcherEvent`
fn convert_event(event: &notify::Event) -> Option<WatcherEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths.first().map(|p| WatcherEvent::Created(p.clone())),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            Some(WatcherEvent::Renamed(paths[0].clone(), paths[1].clone()))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.first().map(|p| WatcherEvent::Removed(p.clone()))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.first().map(|p| WatcherEvent::Created(p.clone()))
        }
        EventKind::Modify(_) => paths.first().map(|p| WatcherEvent::Modified(p.clone())),
        EventKind::Remove(_) => paths.first().map(|p| WatcherEvent::Removed(p.clone())),
        EventKind::Other => {
            // Some platforms report renames as Other
            if paths.len() == 2 {
                Some(WatcherEvent::Renamed(paths[0].clone(), paths[1].clone()))
            } else {
                paths.first().map(|p| WatcherEvent::Modified(p.clone()))
            }
        }
        _ => None,
    }
}

fn is_relevant(event: &WatcherEvent, extensions: &[String]) -> bool {
    match event {
        WatcherEvent::Created(p) | WatcherEvent::Modified(p) | WatcherEvent::Removed(p) => {
            has_extension(p, extensions)
        }
        WatcherEvent::Renamed(from, to) => {
            has_extension(from, extensions) || has_extension(to, extensions)
        }
    }
}

/// Check a path's extension against a lowercase extension list
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| *e == ext.to_lowercase()))
        .unwrap_or(false)
}

/// `file://` URI of an absolute path
pub fn path_to_uri(path: &Path) -> Option<String> {
    url::Url::from_file_path(path).ok().map(String::from)
}

/// Local path of a `file://` URI
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri).ok()?.to_file_path().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    fn extensions() -> Vec<String> {
        vec!["flac".to_string(), "mp3".to_string()]
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("test.flac"), &extensions()));
        assert!(has_extension(Path::new("test.FLAC"), &extensions()));
        assert!(has_extension(Path::new("/path/to/test.mp3"), &extensions()));
        assert!(!has_extension(Path::new("test.txt"), &extensions()));
        assert!(!has_extension(Path::new("test"), &extensions()));
    }

    #[test]
    fn test_convert_create_event() {
        let event = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/test/file.flac")],
            attrs: Default::default(),
        };

        let result = convert_event(&event);
        assert_eq!(result, Some(WatcherEvent::Created(PathBuf::from("/test/file.flac"))));
    }

    #[test]
    fn test_convert_modify_event() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Any)),
            paths: vec![PathBuf::from("/test/file.flac")],
            attrs: Default::default(),
        };

        let result = convert_event(&event);
        assert!(matches!(result, Some(WatcherEvent::Modified(_))));
    }

    #[test]
    fn test_convert_remove_event() {
        let event = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/test/file.flac")],
            attrs: Default::default(),
        };

        let result = convert_event(&event);
        assert!(matches!(result, Some(WatcherEvent::Removed(_))));
    }

    #[test]
    fn test_convert_rename_event() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/test/old.flac"), PathBuf::from("/test/new.flac")],
            attrs: Default::default(),
        };

        assert_eq!(
            convert_event(&event),
            Some(WatcherEvent::Renamed(
                PathBuf::from("/test/old.flac"),
                PathBuf::from("/test/new.flac")
            ))
        );
    }

    #[test]
    fn test_rename_relevant_if_either_side_matches() {
        let event = WatcherEvent::Renamed(PathBuf::from("/a/x.part"), PathBuf::from("/a/x.mp3"));
        assert!(is_relevant(&event, &extensions()));
        let event = WatcherEvent::Created(PathBuf::from("/a/cover.jpg"));
        assert!(!is_relevant(&event, &extensions()));
    }

    #[cfg(unix)]
    #[test]
    fn test_uri_conversion() {
        let uri = path_to_uri(Path::new("/music/a b.mp3")).unwrap();
        assert_eq!(uri, "file:///music/a%20b.mp3");
        assert_eq!(uri_to_path(&uri), Some(PathBuf::from("/music/a b.mp3")));
        assert!(path_to_uri(Path::new("relative.mp3")).is_none());
    }

    #[test]
    fn test_watch_requires_directory() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut monitor = DirectoryMonitor::new(&DbConfig::default().watcher, tx);
        let dir = tempfile::tempdir().unwrap();

        assert!(monitor.watch(&dir.path().join("missing")).is_err());
        monitor.watch(dir.path()).unwrap();
        monitor.watch(dir.path()).unwrap();
        assert_eq!(monitor.watch_count(), 1);
        assert!(monitor.unwatch(dir.path()));
        assert!(!monitor.is_watching(dir.path()));
    }
}
