//! Script discovery and change notification for the script root.

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCRIPT_EXTENSION: &str = "rhai";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChange {
    pub path: PathBuf,
    pub unit: String,
}

/// Unit id for `path` below `root`: the relative path without extension, `/`-separated.
pub fn unit_id(root: &Path, path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(SCRIPT_EXTENSION) {
        return None;
    }
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<&str> = relative.components().filter_map(|component| component.as_os_str().to_str()).collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Every script below `root` as `(unit, path)`, sorted by unit id.
pub fn discover_units(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    collect_scripts(root, &mut files).with_context(|| format!("scan scripts in {}", root.display()))?;
    let mut units: Vec<(String, PathBuf)> =
        files.into_iter().filter_map(|path| unit_id(root, &path).map(|unit| (unit, path))).collect();
    units.sort();
    Ok(units)
}

fn collect_scripts(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_scripts(&path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(SCRIPT_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

pub fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    match fs::canonicalize(&absolute) {
        Ok(canonical) => canonical,
        Err(_) => match (absolute.parent().and_then(|parent| fs::canonicalize(parent).ok()), absolute.file_name()) {
            (Some(parent), Some(name)) => parent.join(name),
            (Some(parent), None) => parent,
            (None, _) => absolute,
        },
    }
}

#[cfg(feature = "watch")]
pub use watcher::SourceWatcher;

#[cfg(feature = "watch")]
mod watcher {
    use super::{normalize_watch_path, unit_id, SourceChange};
    use anyhow::{Context, Result};
    use notify::event::ModifyKind;
    use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc::{channel, Receiver};
    use std::time::Duration;

    pub struct SourceWatcher {
        // Held so the OS watch stays registered.
        _watcher: RecommendedWatcher,
        rx: Receiver<notify::Result<Event>>,
        root: PathBuf,
    }

    impl SourceWatcher {
        pub fn new(root: impl AsRef<Path>, poll_interval: Duration) -> Result<Self> {
            let root = root.as_ref();
            if !root.exists() {
                anyhow::bail!("script root '{}' does not exist", root.display());
            }
            let root = normalize_watch_path(root);
            let (tx, rx) = channel();
            let mut watcher = notify::recommended_watcher(move |res| {
                let _ = tx.send(res);
            })?;
            watcher
                .configure(NotifyConfig::default().with_compare_contents(false).with_poll_interval(poll_interval))
                .context("configure script watcher")?;
            watcher.watch(&root, RecursiveMode::Recursive).with_context(|| format!("watch {}", root.display()))?;
            log::info!("[watch] watching {}", root.display());
            Ok(Self { _watcher: watcher, rx, root })
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        /// Changes received since the last drain, one per unit in arrival order.
        pub fn drain_changes(&mut self) -> Vec<SourceChange> {
            let mut changes: Vec<SourceChange> = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                match event {
                    Ok(event) => {
                        if !Self::is_relevant(&event.kind) {
                            continue;
                        }
                        for path in event.paths {
                            let Some(change) = self.change_for_path(path) else {
                                continue;
                            };
                            if !changes.iter().any(|seen| seen.unit == change.unit) {
                                changes.push(change);
                            }
                        }
                    }
                    Err(err) => log::warn!("[watch] watcher error: {err}"),
                }
            }
            changes
        }

        fn change_for_path(&self, path: PathBuf) -> Option<SourceChange> {
            let normalized = normalize_watch_path(&path);
            let unit = unit_id(&self.root, &normalized)?;
            Some(SourceChange { path: normalized, unit })
        }

        fn is_relevant(kind: &EventKind) -> bool {
            matches!(
                kind,
                EventKind::Modify(ModifyKind::Data(_))
                    | EventKind::Modify(ModifyKind::Name(_))
                    | EventKind::Modify(ModifyKind::Any)
                    | EventKind::Create(_)
            )
        }
    }
}
