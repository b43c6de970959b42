//! Per-load copies of native libraries.
//!
//! Opening a path the process already has mapped returns the old image, so
//! a rebuilt mod would keep running its previous code. Every load therefore
//! opens a freshly named copy: `<root>/<id>/<millis>-<pid>-<seq>-<file name>`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::debug;
use walkdir::WalkDir;

pub(crate) const CLEANUP_GRACE_PERIOD: Duration = Duration::from_secs(60);
pub(crate) const CLEANUP_MAX_DELETIONS_PER_RUN: usize = 200;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Counters from one [`cleanup_stale_shadow_copies`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowCleanupReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped_active: usize,
    pub skipped_recent: usize,
    pub skipped_unrecognized: usize,
}

impl ShadowCleanupReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Shadow copies handed out by one loader that are still mapped.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveShadows(Arc<Mutex<HashSet<PathBuf>>>);

impl ActiveShadows {
    pub(crate) fn snapshot(&self) -> HashSet<PathBuf> {
        self.0.lock().clone()
    }
}

/// Protects a shadow copy from cleanup while held; deletes it on drop.
/// Drop it after the library opened from it.
#[derive(Debug)]
pub(crate) struct ShadowLease {
    path: PathBuf,
    active: ActiveShadows,
}

impl ShadowLease {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ShadowLease {
    fn drop(&mut self) {
        self.active.0.lock().remove(&self.path);
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %err, "Shadow copy left for a later cleanup");
            }
        }
    }
}

/// Directory name for a mod id: ASCII alphanumerics, `-` and `_` only.
pub(crate) fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown-mod".to_string()
    } else {
        cleaned
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn shadow_file_name(base: &str) -> String {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}-{}", now_millis(), std::process::id(), seq, base)
}

/// `(millis, pid, seq)` of a shadow file name; `None` for anything else.
pub(crate) fn parse_shadow_file_name(name: &str) -> Option<(u64, u32, u64)> {
    let mut parts = name.splitn(4, '-');
    let millis = parts.next()?.parse().ok()?;
    let pid = parts.next()?.parse().ok()?;
    let seq = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(base) if !base.is_empty() => Some((millis, pid, seq)),
        _ => None,
    }
}

/// Copy `artifact` under `root` and mark the copy active.
pub(crate) fn create_shadow_copy(
    root: &Path,
    id: &str,
    artifact: &Path,
    active: &ActiveShadows,
) -> io::Result<ShadowLease> {
    let dir = root.join(sanitize_id(id));
    fs::create_dir_all(&dir)?;
    let base = artifact
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("module");
    let path = dir.join(shadow_file_name(base));
    fs::copy(artifact, &path)?;

    active.0.lock().insert(path.clone());
    Ok(ShadowLease {
        path,
        active: active.clone(),
    })
}

/// Delete shadow copies under `root` that are neither `protected` nor
/// younger than `grace`. Files without a shadow name are left alone.
pub(crate) fn cleanup_stale_shadow_copies(
    root: &Path,
    protected: &HashSet<PathBuf>,
    grace: Duration,
    max_deletions: usize,
) -> ShadowCleanupReport {
    let mut report = ShadowCleanupReport::default();
    if !root.is_dir() {
        return report;
    }

    let now = now_millis();
    let grace_millis = grace.as_millis() as u64;
    let entries = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok());
    for entry in entries {
        if !entry.file_type().is_file() {
            continue;
        }
        report.scanned += 1;

        let path = entry.path();
        if protected.contains(path) {
            report.skipped_active += 1;
            continue;
        }
        let Some((millis, _, _)) = entry.file_name().to_str().and_then(parse_shadow_file_name)
        else {
            report.skipped_unrecognized += 1;
            continue;
        };
        if now.saturating_sub(millis) < grace_millis {
            report.skipped_recent += 1;
            continue;
        }
        if report.deleted >= max_deletions {
            break;
        }
        match fs::remove_file(path) {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                report.failed += 1;
                debug!(path = %path.display(), error = %err, "Cannot delete shadow copy");
            }
        }
    }
    report
}
