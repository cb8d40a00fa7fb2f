//! Output resolution: find the real artifact after a transfer.
//!
//! Extraction may append its own extension, merge streams into a new file or
//! leave fragments behind. Resolution collects every plausible candidate,
//! keeps those above a size floor and promotes the largest into the final
//! namespace.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::core::config;
use crate::core::utils::session_temp_prefix;
use crate::download::error::TransferError;
use crate::download::session::SessionId;

/// A path that might be the result of the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
}

/// Collects candidates: `<base>.<ext>` for every expected extension, plus
/// every file in `dir` named `temp_<session>_*`.
///
/// Missing files and unreadable entries are skipped.
pub fn collect_candidates(dir: &Path, base: &Path, session: SessionId) -> Vec<Candidate> {
    let mut paths = BTreeSet::new();

    for ext in config::resolve::EXPECTED_EXTENSIONS {
        let mut with_ext = base.as_os_str().to_owned();
        with_ext.push(".");
        with_ext.push(ext);
        paths.insert(PathBuf::from(with_ext));
    }

    let prefix = session_temp_prefix(session);
    match fs_err::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with(&prefix) {
                    paths.insert(entry.path());
                }
            }
        }
        Err(e) => log::warn!("Cannot scan working directory: {}", e),
    }

    paths
        .into_iter()
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok()?;
            meta.is_file().then(|| Candidate { path, size: meta.len() })
        })
        .collect()
}

/// Largest candidate strictly above `min_size`.
///
/// A partially written or aborted fragment is smaller than the assembled file.
pub fn pick_largest(candidates: &[Candidate], min_size: u64) -> Option<&Candidate> {
    candidates.iter().filter(|c| c.size > min_size).max_by_key(|c| c.size)
}

/// Resolves the artifact for `base` and renames it to `final_path`.
///
/// Leftover session temporaries are removed after a successful rename.
pub fn resolve_output(
    dir: &Path,
    base: &Path,
    session: SessionId,
    final_path: &Path,
    min_size: u64,
) -> Result<PathBuf, TransferError> {
    let candidates = collect_candidates(dir, base, session);
    log::debug!(
        "Output candidates for session {}: {:?}",
        session,
        candidates.iter().map(|c| (c.path.display().to_string(), c.size)).collect::<Vec<_>>()
    );

    let winner = pick_largest(&candidates, min_size).ok_or_else(|| {
        TransferError::NoOutputFound(format!(
            "no file above {} bytes for {} ({} candidates)",
            min_size,
            base.display(),
            candidates.len()
        ))
    })?;

    log::info!(
        "Resolved output {} ({} bytes) -> {}",
        winner.path.display(),
        winner.size,
        final_path.display()
    );

    if winner.path != final_path {
        fs_err::rename(&winner.path, final_path)?;
    }

    cleanup_session_temps(dir, session, Some(final_path));
    Ok(final_path.to_path_buf())
}

/// Moves a finished direct-mode temp file into the final namespace.
pub fn promote(temp_path: &Path, final_path: &Path) -> Result<PathBuf, TransferError> {
    fs_err::rename(temp_path, final_path)?;
    Ok(final_path.to_path_buf())
}

/// Removes every temporary a session left in `dir`: `temp_<session>_*`
/// including `.part`, `.ytdl` and fragment files. Returns the number removed.
pub fn cleanup_partial_download(dir: &Path, session: SessionId) -> usize {
    cleanup_session_temps(dir, session, None)
}

fn cleanup_session_temps(dir: &Path, session: SessionId, keep: Option<&Path>) -> usize {
    let prefix = session_temp_prefix(session);
    let Ok(entries) = fs_err::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if keep.is_some_and(|k| k == path) {
            continue;
        }
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match fs_err::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("Failed to remove temp file: {}", e),
        }
    }

    if removed > 0 {
        log::debug!("Removed {} temp files for session {}", removed, session);
    }
    removed
}
