use metrics::counter;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::registry::SOURCE_STEM;

const ID_LENGTH: u32 = 12;

/// Scratch directory owned by exactly one execution.
///
/// The directory and everything below it is removed when the value is
/// dropped, so every exit path of an execution cleans up after itself.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Creates a fresh, uniquely named directory under `base`. The stored
    /// path is absolute since child processes run with it as their cwd.
    pub fn create(base: &Path) -> io::Result<Self> {
        fs::create_dir_all(base)?;
        let base = fs::canonicalize(base)?;

        loop {
            let path = base.join(format!("ws-{}", gen_random_id(ID_LENGTH)));
            match fs::create_dir(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "created workspace");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the submitted source verbatim to `Main<extension>`.
    pub fn write_source(&self, extension: &str, content: &str) -> io::Result<PathBuf> {
        let full_path = self.path.join(format!("{SOURCE_STEM}{extension}"));
        let mut file = fs::File::create(&full_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        counter!("files_created_total").increment(1);
        Ok(full_path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let removed = match fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Submissions may chmod their own directories shut.
                make_removable(&self.path);
                fs::remove_dir_all(&self.path)
            }
            other => other,
        };
        if let Err(e) = removed {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "failed to remove workspace: {}", e);
            }
        }
    }
}

/// Gives the owner full access to `dir` and every directory below it.
/// Symlinks are not followed.
fn make_removable(dir: &Path) {
    if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
        tracing::debug!(path = %dir.display(), "cannot restore permissions: {}", e);
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
            make_removable(&entry.path());
        }
    }
}

/// Lowercase alphanumeric identifier of `length` characters.
pub fn gen_random_id(length: u32) -> String {
    (0..length)
        .filter_map(|_| char::from_digit(fastrand::u32(0..36), 36))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_alphanumeric() {
        let id = gen_random_id(10);
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(base.path()).unwrap();
        let path = workspace.path().to_path_buf();

        let source = workspace.write_source(".py", "print(1)\n").unwrap();
        fs::write(path.join("extra.txt"), "x").unwrap();
        assert_eq!(fs::read_to_string(&source).unwrap(), "print(1)\n");
        assert_eq!(source.file_name().unwrap(), "Main.py");

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn locked_directories_are_removed_too() {
        let base = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(base.path()).unwrap();
        let path = workspace.path().to_path_buf();

        let locked = path.join("locked");
        fs::create_dir_all(locked.join("inner")).unwrap();
        fs::write(locked.join("inner/data"), "x").unwrap();
        fs::set_permissions(locked.join("inner"), fs::Permissions::from_mode(0o000)).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn workspaces_do_not_collide() {
        let base = tempfile::tempdir().unwrap();
        let a = Workspace::create(base.path()).unwrap();
        let b = Workspace::create(base.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(fs::canonicalize(base.path()).unwrap()));
    }

    #[test]
    fn base_directory_is_created_on_demand() {
        let base = tempfile::tempdir().unwrap();
        let nested = base.path().join("a/b");
        let workspace = Workspace::create(&nested).unwrap();
        assert!(workspace.path().is_dir());
    }
}
