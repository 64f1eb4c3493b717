//! Write-to-temp-then-rename staging for downloaded packages.
//!
//! The staged file lives in an `update/` directory next to the running package
//! and carries the same file name, so the host picks it up on its next start.
//! Bytes are first written to a scratch file in that same directory; only a
//! completed download is renamed onto the staged path. Dropping a
//! [`StagedDownload`] without committing deletes the scratch file.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::UpdateError;

/// Directory, relative to the package's directory, holding staged updates.
pub const STAGING_DIR: &str = "update";

/// Returns where the update for `package` is staged.
///
/// # Errors
///
/// Returns [`UpdateError::Io`] if `package` has no file name.
///
/// # Example
///
/// ```
/// use psychics_update::staging_path_for;
/// use std::path::Path;
///
/// let staged = staging_path_for(Path::new("plugins/psychics.jar")).unwrap();
/// assert_eq!(staged, Path::new("plugins/update/psychics.jar"));
/// ```
pub fn staging_path_for(package: &Path) -> Result<PathBuf, UpdateError> {
    let file_name = package.file_name().ok_or_else(|| {
        UpdateError::io(
            "resolve package",
            package,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "package path has no file name"),
        )
    })?;
    let dir = package.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(STAGING_DIR).join(file_name))
}

/// A download in progress towards the staged path.
#[derive(Debug)]
pub struct StagedDownload {
    scratch: NamedTempFile,
    target: PathBuf,
}

impl StagedDownload {
    /// Prepares the staging directory and a scratch file inside it.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the directory or scratch file cannot be
    /// created.
    pub fn create(package: &Path) -> Result<Self, UpdateError> {
        let target = staging_path_for(package)?;
        let dir = target
            .parent()
            .map_or_else(|| PathBuf::from(STAGING_DIR), Path::to_path_buf);
        std::fs::create_dir_all(&dir).map_err(|e| UpdateError::io("create", &dir, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&dir)
            .map_err(|e| UpdateError::io("create scratch file in", &dir, e))?;
        Ok(Self { scratch, target })
    }

    /// Path the release bytes should be written to.
    #[must_use]
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Path the download will occupy once committed.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Renames the completed scratch file onto the staged path.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Io`] if the rename fails. The scratch file is
    /// removed in that case.
    pub fn commit(self) -> Result<PathBuf, UpdateError> {
        let Self { scratch, target } = self;
        scratch
            .persist(&target)
            .map_err(|e| UpdateError::io("rename onto", &target, e.error))?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_is_sibling_update_dir() {
        let staged = staging_path_for(Path::new("/srv/plugins/psychics.jar")).unwrap();
        assert_eq!(staged, Path::new("/srv/plugins/update/psychics.jar"));
    }

    #[test]
    fn staging_path_for_bare_file_name() {
        let staged = staging_path_for(Path::new("psychics.jar")).unwrap();
        assert_eq!(staged, Path::new("update/psychics.jar"));
    }

    #[test]
    fn staging_path_rejects_root() {
        assert!(staging_path_for(Path::new("/")).is_err());
    }

    #[test]
    fn commit_moves_scratch_onto_target() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("psychics.jar");
        std::fs::write(&package, b"old").unwrap();

        let staged = StagedDownload::create(&package).unwrap();
        std::fs::write(staged.scratch_path(), b"new").unwrap();
        let target = staged.commit().unwrap();

        assert_eq!(target, dir.path().join("update").join("psychics.jar"));
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(std::fs::read(&package).unwrap(), b"old");
    }

    #[test]
    fn dropping_uncommitted_download_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("psychics.jar");

        let staged = StagedDownload::create(&package).unwrap();
        let scratch = staged.scratch_path().to_path_buf();
        std::fs::write(&scratch, b"partial").unwrap();
        drop(staged);

        assert!(!scratch.exists());
        assert!(!dir.path().join("update").join("psychics.jar").exists());
    }
}
