// SPDX-License-Identifier: GPL-3.0-only

//! Output file handling
//!
//! Files are written to `<target>.partial` and renamed into place once the
//! writer has flushed. A `.partial` left behind by an interrupted run is
//! reported and removed before the next write to the same target.

use crate::constants::PARTIAL_SUFFIX;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `<path>.partial`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// Whether an interrupted write left `<path>.partial` behind
pub fn has_stale_partial(path: &Path) -> bool {
    partial_path(path).exists()
}

/// Prepare to write `path`: create its directory and clear a stale partial
///
/// Returns the partial path to write to.
pub fn prepare_output(path: &Path) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let partial = partial_path(path);
    if has_stale_partial(path) {
        warn!(
            path = %partial.display(),
            "Removing incomplete output from an interrupted run"
        );
        std::fs::remove_file(&partial)?;
    }

    debug!(path = %partial.display(), "Output prepared");
    Ok(partial)
}

/// Move a completed partial file into place, replacing any previous output
pub fn finalize(partial: &Path, path: &Path) -> io::Result<PathBuf> {
    std::fs::rename(partial, path)?;
    info!(path = %path.display(), "Output saved");
    Ok(path.to_path_buf())
}

/// Remove a partial file; missing files are not an error
pub fn discard(partial: &Path) {
    match std::fs::remove_file(partial) {
        Ok(()) => debug!(path = %partial.display(), "Discarded partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %partial.display(), error = %e, "Failed to discard partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/out/record_video.obs")),
            PathBuf::from("/tmp/out/record_video.obs.partial")
        );
        assert_eq!(
            partial_path(Path::new("video.mp4")),
            PathBuf::from("video.mp4.partial")
        );
    }
}
